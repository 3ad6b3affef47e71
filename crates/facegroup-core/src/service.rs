//! `FaceService`: the five core operations bound to a repository.
//!
//! Every method is a bounded synchronous computation over records fetched
//! once at the start of the call. Callers that run an async runtime should
//! move clustering, enrollment and profile matching onto a blocking thread.

use crate::cluster::{self, ClusterError, ClusterParams, ClusterQuality, ParameterSuggestion};
use crate::detector::FaceDetector;
use crate::enrollment::{EnrollmentError, EnrollmentResult, ProfileEnrollment};
use crate::matching::{self, ProfileMatches, SimilarFace, PROFILE_SCAN_CAP};
use crate::quality::{QualityGate, QualityThresholds};
use crate::repository::{FaceRepository, StoreError};
use crate::types::{Detection, FaceCluster, FaceEmbedding, ProfileStatus};
use crate::vector::{self, VectorError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Vector(#[from] VectorError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error(transparent)]
    Enrollment(#[from] EnrollmentError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no profile face set for user {0}")]
    NoProfileSet(Uuid),
    #[error("cluster not found: {0}")]
    ClusterNotFound(Uuid),
    #[error("embedding not found: {0}")]
    EmbeddingNotFound(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub quality: QualityThresholds,
    /// Maximum embeddings examined by one profile match.
    pub scan_cap: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            quality: QualityThresholds::default(),
            scan_cap: PROFILE_SCAN_CAP,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub cluster_id: Uuid,
    pub label: String,
    pub face_count: usize,
    pub face_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusteringReport {
    /// Fewer than two faces; nothing was written.
    pub insufficient_data: bool,
    pub clusters_created: usize,
    pub total_faces: usize,
    pub clustered_faces: usize,
    pub noise_faces: usize,
    pub clusters: Vec<ClusterSummary>,
    pub eps: f32,
    pub min_samples: usize,
}

pub struct FaceService<S> {
    store: Arc<S>,
    config: ServiceConfig,
    enrollment: ProfileEnrollment,
}

impl<S> Clone for FaceService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config,
            enrollment: self.enrollment,
        }
    }
}

impl<S: FaceRepository> FaceService<S> {
    pub fn new(store: Arc<S>, config: ServiceConfig) -> Self {
        Self {
            store,
            config,
            enrollment: ProfileEnrollment::new(QualityGate::new(config.quality)),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    // --- embeddings ---

    /// Persist every face of one detector result. All vectors are checked
    /// before anything is written.
    pub fn record_detections(
        &self,
        user_id: Uuid,
        photo_id: Uuid,
        detection: &Detection,
    ) -> Result<Vec<FaceEmbedding>, ServiceError> {
        self.record_detection_batch(user_id, &[(photo_id, detection)])
    }

    /// Persist the detector results of several photos in one write. Any
    /// malformed vector fails the whole batch and nothing is stored.
    pub fn record_detection_batch(
        &self,
        user_id: Uuid,
        batch: &[(Uuid, &Detection)],
    ) -> Result<Vec<FaceEmbedding>, ServiceError> {
        let faces = batch
            .iter()
            .filter(|(_, detection)| detection.faces_detected)
            .flat_map(|(photo_id, detection)| detection.faces.iter().map(move |face| (*photo_id, face)));
        let mut pending = Vec::new();
        for (photo_id, face) in faces {
            vector::check_embedding(&face.embedding)?;
            pending.push((photo_id, face));
        }
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let records: Vec<FaceEmbedding> = pending
            .into_iter()
            .map(|(photo_id, face)| FaceEmbedding {
                id: Uuid::new_v4(),
                user_id,
                photo_id,
                embedding: face.embedding.clone(),
                bbox: face.bbox,
                confidence: face.confidence,
                created_at: now,
            })
            .collect();

        self.store.insert_embeddings(&records)?;
        tracing::info!(user = %user_id, photos = batch.len(), faces = records.len(), "stored face embeddings");
        Ok(records)
    }

    pub fn get_embedding(&self, id: Uuid) -> Result<FaceEmbedding, ServiceError> {
        self.store
            .get_embedding(id)?
            .ok_or(ServiceError::EmbeddingNotFound(id))
    }

    pub fn embeddings_for_user(&self, user_id: Uuid, limit: Option<usize>) -> Result<Vec<FaceEmbedding>, ServiceError> {
        Ok(self.store.embeddings_for_user(user_id, limit)?)
    }

    pub fn embeddings_for_photo(&self, photo_id: Uuid) -> Result<Vec<FaceEmbedding>, ServiceError> {
        Ok(self.store.embeddings_for_photo(photo_id)?)
    }

    pub fn delete_embedding(&self, id: Uuid) -> Result<(), ServiceError> {
        if self.store.delete_embedding(id)? {
            Ok(())
        } else {
            Err(ServiceError::EmbeddingNotFound(id))
        }
    }

    pub fn delete_photo_embeddings(&self, photo_id: Uuid) -> Result<usize, ServiceError> {
        let removed = self.store.delete_photo_embeddings(photo_id)?;
        tracing::info!(photo = %photo_id, removed, "deleted photo embeddings");
        Ok(removed)
    }

    // --- clustering ---

    /// Cluster a user's faces and replace their cluster set with the result.
    ///
    /// Faces are read before the swap. If one is deleted in between, the
    /// swap fails with [`StoreError::MissingMember`], the previous clusters
    /// stay, and the run can simply be repeated.
    pub fn run_clustering(&self, user_id: Uuid, params: ClusterParams) -> Result<ClusteringReport, ServiceError> {
        params.validate()?;
        let faces = self.store.embeddings_for_user(user_id, None)?;
        let vectors: Vec<Vec<f32>> = faces.iter().map(|f| f.embedding.clone()).collect();
        let result = cluster::cluster(&vectors, params)?;

        if result.insufficient_data {
            tracing::info!(user = %user_id, faces = faces.len(), "clustering skipped: insufficient data");
            return Ok(ClusteringReport {
                insufficient_data: true,
                clusters_created: 0,
                total_faces: faces.len(),
                clustered_faces: 0,
                noise_faces: faces.len(),
                clusters: Vec::new(),
                eps: params.eps,
                min_samples: params.min_samples,
            });
        }

        let now = Utc::now();
        let clusters: Vec<FaceCluster> = result
            .clusters
            .iter()
            .enumerate()
            .map(|(label, members)| FaceCluster {
                id: Uuid::new_v4(),
                user_id,
                face_ids: members.iter().map(|&i| faces[i].id).collect(),
                label: format!("Person {}", label + 1),
                created_at: now,
            })
            .collect();

        self.store.replace_clusters(user_id, &clusters)?;

        tracing::info!(
            user = %user_id,
            faces = faces.len(),
            clusters = clusters.len(),
            noise = result.noise.len(),
            "clustering complete"
        );

        Ok(ClusteringReport {
            insufficient_data: false,
            clusters_created: clusters.len(),
            total_faces: faces.len(),
            clustered_faces: result.clustered_count(),
            noise_faces: result.noise.len(),
            clusters: clusters
                .into_iter()
                .map(|c| ClusterSummary {
                    cluster_id: c.id,
                    face_count: c.face_ids.len(),
                    label: c.label,
                    face_ids: c.face_ids,
                })
                .collect(),
            eps: params.eps,
            min_samples: params.min_samples,
        })
    }

    pub fn suggest_parameters(&self, user_id: Uuid) -> Result<ParameterSuggestion, ServiceError> {
        let faces = self.store.embeddings_for_user(user_id, None)?;
        let vectors: Vec<Vec<f32>> = faces.into_iter().map(|f| f.embedding).collect();
        Ok(cluster::suggest_parameters(&vectors)?)
    }

    /// Cohesion score of a stored cluster. Members that no longer resolve
    /// are ignored.
    pub fn validate_cluster(&self, user_id: Uuid, cluster_id: Uuid) -> Result<ClusterQuality, ServiceError> {
        let cluster = self.owned_cluster(user_id, cluster_id)?;
        let mut vectors = Vec::with_capacity(cluster.face_ids.len());
        for id in &cluster.face_ids {
            if let Some(face) = self.store.get_embedding(*id)? {
                vectors.push(face.embedding);
            }
        }
        Ok(cluster::score_cluster_quality(&vectors)?)
    }

    // --- cluster records ---

    /// Create a cluster by hand from faces the user owns. Repeated ids are
    /// collapsed, keeping the first occurrence.
    pub fn create_cluster(
        &self,
        user_id: Uuid,
        face_ids: &[Uuid],
        label: Option<String>,
    ) -> Result<FaceCluster, ServiceError> {
        let mut seen = HashSet::new();
        let unique: Vec<Uuid> = face_ids.iter().copied().filter(|id| seen.insert(*id)).collect();

        for id in &unique {
            match self.store.get_embedding(*id)? {
                Some(face) if face.user_id == user_id => {}
                _ => return Err(ServiceError::EmbeddingNotFound(*id)),
            }
        }

        let now = Utc::now();
        let cluster = FaceCluster {
            id: Uuid::new_v4(),
            user_id,
            face_ids: unique,
            label: label.unwrap_or_else(|| format!("Cluster {}", now.format("%Y%m%d_%H%M%S"))),
            created_at: now,
        };
        self.store.insert_cluster(&cluster)?;
        tracing::info!(user = %user_id, cluster = %cluster.id, faces = cluster.face_ids.len(), "cluster created");
        Ok(cluster)
    }

    pub fn list_clusters(&self, user_id: Uuid) -> Result<Vec<FaceCluster>, ServiceError> {
        Ok(self.store.clusters_for_user(user_id)?)
    }

    pub fn get_cluster(&self, id: Uuid) -> Result<FaceCluster, ServiceError> {
        self.store.get_cluster(id)?.ok_or(ServiceError::ClusterNotFound(id))
    }

    pub fn rename_cluster(&self, id: Uuid, label: &str) -> Result<FaceCluster, ServiceError> {
        self.store
            .rename_cluster(id, label)?
            .ok_or(ServiceError::ClusterNotFound(id))
    }

    pub fn delete_cluster(&self, id: Uuid) -> Result<(), ServiceError> {
        if self.store.delete_cluster(id)? {
            Ok(())
        } else {
            Err(ServiceError::ClusterNotFound(id))
        }
    }

    fn owned_cluster(&self, user_id: Uuid, cluster_id: Uuid) -> Result<FaceCluster, ServiceError> {
        match self.store.get_cluster(cluster_id)? {
            Some(cluster) if cluster.user_id == user_id => Ok(cluster),
            _ => Err(ServiceError::ClusterNotFound(cluster_id)),
        }
    }

    // --- matching ---

    /// Faces of `user_id` similar to `query`, best first.
    pub fn find_similar(
        &self,
        user_id: Uuid,
        query: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SimilarFace>, ServiceError> {
        vector::check_embedding(query)?;
        let candidates = self.store.embeddings_for_user(user_id, None)?;
        Ok(matching::find_similar(query, &candidates, threshold, limit)?)
    }

    /// Photos across the whole corpus containing the user's profile face.
    ///
    /// Without an explicit threshold the profile's own adaptive threshold
    /// applies.
    pub fn match_profile(
        &self,
        user_id: Uuid,
        threshold: Option<f32>,
        limit: usize,
    ) -> Result<ProfileMatches, ServiceError> {
        let profile = self
            .store
            .get_profile(user_id)?
            .ok_or(ServiceError::NoProfileSet(user_id))?;
        let threshold = threshold.unwrap_or(profile.threshold);

        let scan_cap = self.config.scan_cap;
        let mut corpus = self.store.scan_embeddings(scan_cap.saturating_add(1))?;
        let scan_capped = corpus.len() > scan_cap;
        corpus.truncate(scan_cap);
        if scan_capped {
            tracing::warn!(user = %user_id, scan_cap, "profile match hit the scan cap; newer faces were not examined");
        }

        let photos = matching::match_profile(&profile, &corpus, threshold, limit);
        tracing::info!(user = %user_id, scanned = corpus.len(), photos = photos.len(), threshold, "profile match complete");

        Ok(ProfileMatches {
            photos,
            scanned: corpus.len(),
            scan_cap,
            scan_capped,
        })
    }

    // --- profile ---

    /// Enroll from encoded images and overwrite the stored profile. Nothing
    /// is written when enrollment fails.
    pub fn enroll_profile<D, I>(&self, user_id: Uuid, images: &[I], detector: &mut D) -> Result<EnrollmentResult, ServiceError>
    where
        D: FaceDetector + ?Sized,
        I: AsRef<[u8]>,
    {
        let result = self.enrollment.enroll(images, detector)?;
        self.store.put_profile(user_id, &result.profile)?;
        tracing::info!(user = %user_id, accepted = result.accepted, rejected = result.rejected, "profile face set");
        Ok(result)
    }

    pub fn enroll_profile_from_embeddings(
        &self,
        user_id: Uuid,
        vectors: &[Vec<f32>],
    ) -> Result<EnrollmentResult, ServiceError> {
        let result = self.enrollment.enroll_from_embeddings(vectors)?;
        self.store.put_profile(user_id, &result.profile)?;
        tracing::info!(user = %user_id, accepted = result.accepted, rejected = result.rejected, "profile face set from embeddings");
        Ok(result)
    }

    pub fn profile_status(&self, user_id: Uuid) -> Result<ProfileStatus, ServiceError> {
        let profile = self.store.get_profile(user_id)?;
        Ok(ProfileStatus::of(profile.as_ref()))
    }

    /// Returns whether a profile existed.
    pub fn remove_profile(&self, user_id: Uuid) -> Result<bool, ServiceError> {
        let existed = self.store.delete_profile(user_id)?;
        if existed {
            tracing::info!(user = %user_id, "profile face removed");
        }
        Ok(existed)
    }
}
