//! Profile-face enrollment: gate the samples, fuse them and derive a match threshold.
//!
//! The profile embedding is the mean of the accepted unit-normalized
//! samples and is not re-normalized, so its magnitude reflects how
//! consistent the enrollment set was. The match threshold rises with the
//! spread of the samples:
//!
//! ```text
//! threshold = clamp(0.45 + (spread - 0.2) * 0.2, 0.40, 0.55)
//! ```
//!
//! where `spread` is the mean Euclidean distance of each sample to the mean.

use crate::detector::{DetectorError, FaceDetector};
use crate::quality::{QualityGate, QualityMetrics, RejectionReason};
use crate::types::ProfileFace;
use crate::vector::{self, VectorError};
use serde::Serialize;
use thiserror::Error;

pub const BASE_THRESHOLD: f32 = 0.45;
pub const SPREAD_PIVOT: f32 = 0.2;
pub const SPREAD_GAIN: f32 = 0.2;
pub const MIN_PROFILE_THRESHOLD: f32 = 0.40;
pub const MAX_PROFILE_THRESHOLD: f32 = 0.55;

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("no acceptable enrollment samples ({} rejected)", .diagnostics.len())]
    NoAcceptableSamples { diagnostics: Vec<SampleDiagnostic> },
    #[error("fused profile embedding has zero norm")]
    DegenerateProfile,
    #[error("fused profile embedding or spread is not finite")]
    NonFiniteProfile,
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
}

/// Outcome for one enrollment input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleDiagnostic {
    pub index: usize,
    pub accepted: bool,
    pub reasons: Vec<RejectionReason>,
    /// Absent for inputs that never reached the quality gate.
    pub metrics: Option<QualityMetrics>,
}

impl SampleDiagnostic {
    fn accepted(index: usize, metrics: Option<QualityMetrics>) -> Self {
        Self {
            index,
            accepted: true,
            reasons: Vec::new(),
            metrics,
        }
    }

    fn rejected(index: usize, reasons: Vec<RejectionReason>, metrics: Option<QualityMetrics>) -> Self {
        Self {
            index,
            accepted: false,
            reasons,
            metrics,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollmentResult {
    pub profile: ProfileFace,
    pub accepted: usize,
    pub rejected: usize,
    /// Mean Euclidean distance of accepted samples to their mean.
    pub spread: f32,
    pub diagnostics: Vec<SampleDiagnostic>,
}

/// Map enrollment spread to a similarity threshold.
pub fn adaptive_threshold(spread: f32) -> f32 {
    (BASE_THRESHOLD + (spread - SPREAD_PIVOT) * SPREAD_GAIN)
        .clamp(MIN_PROFILE_THRESHOLD, MAX_PROFILE_THRESHOLD)
}

/// Fuse unit-normalized samples into a profile. Returns the profile and the
/// spread it was derived from.
pub fn fuse(samples: &[Vec<f32>]) -> Result<(ProfileFace, f32), EnrollmentError> {
    let mean = vector::mean_vector(samples);
    if mean.iter().any(|x| !x.is_finite()) {
        return Err(EnrollmentError::NonFiniteProfile);
    }
    if vector::l2_norm(&mean) == 0.0 {
        return Err(EnrollmentError::DegenerateProfile);
    }

    let spread = samples
        .iter()
        .map(|s| vector::euclidean_distance(s, &mean))
        .sum::<f32>()
        / samples.len() as f32;
    if !spread.is_finite() {
        return Err(EnrollmentError::NonFiniteProfile);
    }

    let profile = ProfileFace {
        embedding: mean,
        threshold: adaptive_threshold(spread),
    };
    Ok((profile, spread))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileEnrollment {
    gate: QualityGate,
}

impl ProfileEnrollment {
    pub fn new(gate: QualityGate) -> Self {
        Self { gate }
    }

    /// Enroll from encoded images: decode, detect, gate, then fuse the first
    /// face of every accepted image. Rejections never abort the batch.
    pub fn enroll<D, I>(&self, images: &[I], detector: &mut D) -> Result<EnrollmentResult, EnrollmentError>
    where
        D: FaceDetector + ?Sized,
        I: AsRef<[u8]>,
    {
        let mut samples = Vec::new();
        let mut diagnostics = Vec::with_capacity(images.len());

        for (index, bytes) in images.iter().enumerate() {
            let decoded = match image::load_from_memory(bytes.as_ref()) {
                Ok(img) => img,
                Err(e) => {
                    tracing::debug!(index, error = %e, "enroll: undecodable image");
                    diagnostics.push(SampleDiagnostic::rejected(
                        index,
                        vec![RejectionReason::UndecodableImage { detail: e.to_string() }],
                        None,
                    ));
                    continue;
                }
            };

            let detection = detector.detect(&decoded)?;
            let report = self.gate.evaluate(&decoded.to_luma8(), &detection);

            let face = match detection.first_face() {
                Some(face) if report.accepted => face,
                _ => {
                    tracing::debug!(index, reasons = ?report.reasons, "enroll: sample rejected");
                    diagnostics.push(SampleDiagnostic::rejected(index, report.reasons, Some(report.metrics)));
                    continue;
                }
            };

            if let Some(reason) = embedding_rejection(&face.embedding) {
                tracing::debug!(index, %reason, "enroll: unusable embedding");
                diagnostics.push(SampleDiagnostic::rejected(index, vec![reason], Some(report.metrics)));
                continue;
            }

            samples.push(vector::normalize(&face.embedding));
            diagnostics.push(SampleDiagnostic::accepted(index, Some(report.metrics)));
        }

        finish(samples, diagnostics)
    }

    /// Enroll from embeddings produced upstream, skipping detection and the
    /// quality gate. Vectors of the wrong length or with non-finite
    /// components are excluded.
    pub fn enroll_from_embeddings(&self, vectors: &[Vec<f32>]) -> Result<EnrollmentResult, EnrollmentError> {
        let mut samples = Vec::new();
        let mut diagnostics = Vec::with_capacity(vectors.len());

        for (index, v) in vectors.iter().enumerate() {
            match embedding_rejection(v) {
                None => {
                    samples.push(vector::normalize(v));
                    diagnostics.push(SampleDiagnostic::accepted(index, None));
                }
                Some(reason) => diagnostics.push(SampleDiagnostic::rejected(index, vec![reason], None)),
            }
        }

        finish(samples, diagnostics)
    }
}

fn embedding_rejection(v: &[f32]) -> Option<RejectionReason> {
    match vector::check_embedding(v) {
        Ok(()) => None,
        Err(VectorError::DimensionMismatch { actual, .. }) => Some(RejectionReason::InvalidEmbedding { dimensions: actual }),
        Err(VectorError::NonFinite { index }) => Some(RejectionReason::NonFiniteEmbedding { index }),
    }
}

fn finish(samples: Vec<Vec<f32>>, diagnostics: Vec<SampleDiagnostic>) -> Result<EnrollmentResult, EnrollmentError> {
    if samples.is_empty() {
        tracing::info!(rejected = diagnostics.len(), "enroll: no acceptable samples");
        return Err(EnrollmentError::NoAcceptableSamples { diagnostics });
    }

    let (profile, spread) = fuse(&samples)?;
    let accepted = samples.len();
    let rejected = diagnostics.len() - accepted;

    tracing::info!(
        accepted,
        rejected,
        spread,
        threshold = profile.threshold,
        "enroll: profile fused"
    );

    Ok(EnrollmentResult {
        profile,
        accepted,
        rejected,
        spread,
        diagnostics,
    })
}
