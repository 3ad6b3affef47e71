//! facegroup-core: identity grouping over detected-face embeddings.
//!
//! Turns 512-dimensional face embeddings into per-user identity clusters
//! (density-based, over cosine distance), fuses quality-gated enrollment
//! samples into a profile face, and matches that profile across the photo
//! corpus. Face detection and persistence are reached through the
//! [`FaceDetector`] and repository traits.

pub mod cluster;
pub mod detector;
pub mod enrollment;
pub mod identity;
pub mod matching;
pub mod memory;
pub mod quality;
pub mod repository;
pub mod service;
pub mod types;
pub mod vector;

#[cfg(test)]
pub(crate) mod testutil;

pub use cluster::{ClusterError, ClusterParams, ClusterQuality, ClusterResult, ParameterSuggestion};
pub use detector::{DetectorError, FaceDetector};
pub use enrollment::{EnrollmentError, EnrollmentResult, ProfileEnrollment, SampleDiagnostic};
pub use identity::normalize_user_id;
pub use matching::{PhotoMatch, ProfileMatches, SimilarFace};
pub use memory::MemoryStore;
pub use quality::{QualityGate, QualityReport, QualityThresholds, RejectionReason};
pub use repository::{ClusterStore, EmbeddingStore, FaceRepository, ProfileStore, StoreError};
pub use service::{ClusterSummary, ClusteringReport, FaceService, ServiceConfig, ServiceError};
pub use types::{
    BoundingBox, DetectedFace, Detection, FaceCluster, FaceEmbedding, ProfileFace, ProfileStatus,
    EMBEDDING_DIM,
};
pub use vector::VectorError;
