//! In-process repository backed by a single `RwLock`.
//!
//! Every operation takes the lock once, so cluster-set replacement is atomic
//! with respect to readers for free.

use crate::repository::{ClusterStore, EmbeddingStore, ProfileStore, StoreError};
use crate::types::{FaceCluster, FaceEmbedding, ProfileFace};
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    /// Insertion order.
    embeddings: Vec<FaceEmbedding>,
    /// Insertion order.
    clusters: Vec<FaceCluster>,
    profiles: HashMap<Uuid, ProfileFace>,
}

impl Tables {
    /// Drop `removed` from every cluster, then drop the clusters this emptied.
    fn strip_memberships(&mut self, removed: &HashSet<Uuid>) {
        let mut emptied = HashSet::new();
        for cluster in &mut self.clusters {
            let before = cluster.face_ids.len();
            cluster.face_ids.retain(|id| !removed.contains(id));
            if before > 0 && cluster.face_ids.is_empty() {
                emptied.insert(cluster.id);
            }
        }
        self.clusters.retain(|c| !emptied.contains(&c.id));
    }

    fn check_members(&self, clusters: &[FaceCluster]) -> Result<(), StoreError> {
        let known: HashSet<Uuid> = self.embeddings.iter().map(|e| e.id).collect();
        for cluster in clusters {
            if let Some(&face) = cluster.face_ids.iter().find(|id| !known.contains(id)) {
                return Err(StoreError::MissingMember { cluster: cluster.id, face });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables.write().map_err(|_| StoreError::Poisoned)
    }
}

fn by_creation<'a>(records: impl Iterator<Item = &'a FaceEmbedding>) -> Vec<FaceEmbedding> {
    let mut out: Vec<FaceEmbedding> = records.cloned().collect();
    out.sort_by_key(|e| e.created_at);
    out
}

impl EmbeddingStore for MemoryStore {
    fn insert_embeddings(&self, records: &[FaceEmbedding]) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let mut seen: HashSet<Uuid> = tables.embeddings.iter().map(|e| e.id).collect();
        if let Some(dup) = records.iter().find(|r| !seen.insert(r.id)) {
            return Err(StoreError::corrupt(dup.id, "duplicate embedding id"));
        }
        tables.embeddings.extend_from_slice(records);
        Ok(())
    }

    fn get_embedding(&self, id: Uuid) -> Result<Option<FaceEmbedding>, StoreError> {
        Ok(self.read()?.embeddings.iter().find(|e| e.id == id).cloned())
    }

    fn embeddings_for_user(&self, user_id: Uuid, limit: Option<usize>) -> Result<Vec<FaceEmbedding>, StoreError> {
        let tables = self.read()?;
        let mut out = by_creation(tables.embeddings.iter().filter(|e| e.user_id == user_id));
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    fn embeddings_for_photo(&self, photo_id: Uuid) -> Result<Vec<FaceEmbedding>, StoreError> {
        let tables = self.read()?;
        Ok(by_creation(tables.embeddings.iter().filter(|e| e.photo_id == photo_id)))
    }

    fn scan_embeddings(&self, limit: usize) -> Result<Vec<FaceEmbedding>, StoreError> {
        let tables = self.read()?;
        let mut out = by_creation(tables.embeddings.iter());
        out.truncate(limit);
        Ok(out)
    }

    fn delete_embedding(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.write()?;
        let before = tables.embeddings.len();
        tables.embeddings.retain(|e| e.id != id);
        if tables.embeddings.len() == before {
            return Ok(false);
        }
        tables.strip_memberships(&HashSet::from([id]));
        Ok(true)
    }

    fn delete_photo_embeddings(&self, photo_id: Uuid) -> Result<usize, StoreError> {
        let mut tables = self.write()?;
        let removed: HashSet<Uuid> = tables
            .embeddings
            .iter()
            .filter(|e| e.photo_id == photo_id)
            .map(|e| e.id)
            .collect();
        tables.embeddings.retain(|e| e.photo_id != photo_id);
        if !removed.is_empty() {
            tables.strip_memberships(&removed);
        }
        Ok(removed.len())
    }
}

impl ClusterStore for MemoryStore {
    fn replace_clusters(&self, user_id: Uuid, clusters: &[FaceCluster]) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        tables.check_members(clusters)?;
        tables.clusters.retain(|c| c.user_id != user_id);
        tables.clusters.extend_from_slice(clusters);
        Ok(())
    }

    fn clusters_for_user(&self, user_id: Uuid) -> Result<Vec<FaceCluster>, StoreError> {
        let tables = self.read()?;
        let mut out: Vec<FaceCluster> = tables
            .clusters
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.created_at);
        Ok(out)
    }

    fn get_cluster(&self, id: Uuid) -> Result<Option<FaceCluster>, StoreError> {
        Ok(self.read()?.clusters.iter().find(|c| c.id == id).cloned())
    }

    fn insert_cluster(&self, cluster: &FaceCluster) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if tables.clusters.iter().any(|c| c.id == cluster.id) {
            return Err(StoreError::corrupt(cluster.id, "duplicate cluster id"));
        }
        tables.check_members(std::slice::from_ref(cluster))?;
        tables.clusters.push(cluster.clone());
        Ok(())
    }

    fn rename_cluster(&self, id: Uuid, label: &str) -> Result<Option<FaceCluster>, StoreError> {
        let mut tables = self.write()?;
        Ok(tables.clusters.iter_mut().find(|c| c.id == id).map(|c| {
            c.label = label.to_string();
            c.clone()
        }))
    }

    fn delete_cluster(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.write()?;
        let before = tables.clusters.len();
        tables.clusters.retain(|c| c.id != id);
        Ok(tables.clusters.len() != before)
    }
}

impl ProfileStore for MemoryStore {
    fn get_profile(&self, user_id: Uuid) -> Result<Option<ProfileFace>, StoreError> {
        Ok(self.read()?.profiles.get(&user_id).cloned())
    }

    fn put_profile(&self, user_id: Uuid, profile: &ProfileFace) -> Result<(), StoreError> {
        self.write()?.profiles.insert(user_id, profile.clone());
        Ok(())
    }

    fn delete_profile(&self, user_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.write()?.profiles.remove(&user_id).is_some())
    }
}
