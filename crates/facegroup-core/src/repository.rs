//! Storage seams for embeddings, clusters and profile faces.
//!
//! Implementations must be shareable across threads. `replace_clusters` is
//! the one operation with a transactional contract: readers of a user's
//! clusters see either the old set or the new set, never a mix.

use crate::types::{FaceCluster, FaceEmbedding, ProfileFace};
use std::error::Error as StdError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn StdError + Send + Sync>),
    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("cluster {cluster} references unknown face {face}")]
    MissingMember { cluster: Uuid, face: Uuid },
    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Backend(Box::new(err))
    }

    pub fn corrupt(id: impl ToString, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

pub trait EmbeddingStore: Send + Sync {
    fn insert_embeddings(&self, records: &[FaceEmbedding]) -> Result<(), StoreError>;

    fn get_embedding(&self, id: Uuid) -> Result<Option<FaceEmbedding>, StoreError>;

    /// A user's embeddings in creation order.
    fn embeddings_for_user(&self, user_id: Uuid, limit: Option<usize>) -> Result<Vec<FaceEmbedding>, StoreError>;

    fn embeddings_for_photo(&self, photo_id: Uuid) -> Result<Vec<FaceEmbedding>, StoreError>;

    /// Up to `limit` embeddings across all users, oldest first.
    fn scan_embeddings(&self, limit: usize) -> Result<Vec<FaceEmbedding>, StoreError>;

    /// Remove one embedding and strip it from cluster memberships. Clusters
    /// left without members are removed too. Returns whether it existed.
    fn delete_embedding(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Remove every embedding of a photo, with the same membership cleanup.
    fn delete_photo_embeddings(&self, photo_id: Uuid) -> Result<usize, StoreError>;
}

pub trait ClusterStore: Send + Sync {
    /// Atomically swap a user's whole cluster set for `clusters`.
    ///
    /// Every member must still exist when the swap happens; otherwise the
    /// call fails with [`StoreError::MissingMember`] and the old set stays.
    fn replace_clusters(&self, user_id: Uuid, clusters: &[FaceCluster]) -> Result<(), StoreError>;

    /// A user's clusters in creation order.
    fn clusters_for_user(&self, user_id: Uuid) -> Result<Vec<FaceCluster>, StoreError>;

    fn get_cluster(&self, id: Uuid) -> Result<Option<FaceCluster>, StoreError>;

    /// Same member rule as [`ClusterStore::replace_clusters`].
    fn insert_cluster(&self, cluster: &FaceCluster) -> Result<(), StoreError>;

    fn rename_cluster(&self, id: Uuid, label: &str) -> Result<Option<FaceCluster>, StoreError>;

    fn delete_cluster(&self, id: Uuid) -> Result<bool, StoreError>;
}

pub trait ProfileStore: Send + Sync {
    fn get_profile(&self, user_id: Uuid) -> Result<Option<ProfileFace>, StoreError>;

    /// Store a profile, overwriting any existing one.
    fn put_profile(&self, user_id: Uuid, profile: &ProfileFace) -> Result<(), StoreError>;

    fn delete_profile(&self, user_id: Uuid) -> Result<bool, StoreError>;
}

/// Everything [`crate::FaceService`] needs from storage.
pub trait FaceRepository: EmbeddingStore + ClusterStore + ProfileStore {}

impl<T: EmbeddingStore + ClusterStore + ProfileStore> FaceRepository for T {}
