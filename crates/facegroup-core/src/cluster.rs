//! Density-based (DBSCAN) clustering over the cosine distance matrix.
//!
//! Core points need at least `min_samples` points (themselves included)
//! within `eps`; clusters grow transitively through core points and absorb
//! border points; everything else is noise. Labels are canonical: numbered
//! in first-core-point order, after undersized groups are dropped, so the
//! same input always yields the same labels.

use crate::vector::{self, VectorError};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

pub const DEFAULT_EPS: f32 = 0.3;
pub const DEFAULT_MIN_SAMPLES: usize = 2;

const SUGGEST_EPS_MIN: f32 = 0.1;
const SUGGEST_EPS_MAX: f32 = 0.5;
const SUGGEST_MIN_SAMPLES_MIN: usize = 2;
const SUGGEST_MIN_SAMPLES_MAX: usize = 5;
const SUGGEST_PERCENTILE: f32 = 95.0;
const SUGGEST_MIN_FACES: usize = 3;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("invalid clustering parameters: {0}")]
    InvalidParameters(String),
    #[error(transparent)]
    Vector(#[from] VectorError),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterParams {
    /// Maximum cosine distance between neighbors (0.3 ≙ similarity ≥ 0.7).
    pub eps: f32,
    /// Neighborhood size, self included, that makes a core point.
    pub min_samples: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            eps: DEFAULT_EPS,
            min_samples: DEFAULT_MIN_SAMPLES,
        }
    }
}

impl ClusterParams {
    pub fn validate(&self) -> Result<(), ClusterError> {
        if !(self.eps > 0.0 && self.eps < 1.0) {
            return Err(ClusterError::InvalidParameters(format!(
                "eps must lie in (0, 1), got {}",
                self.eps
            )));
        }
        if self.min_samples < 1 {
            return Err(ClusterError::InvalidParameters(
                "min_samples must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Partition of one clustering run, expressed as indices into the input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterResult {
    /// Fewer than two embeddings were supplied; nothing was clustered.
    pub insufficient_data: bool,
    /// Cluster label per input index; `None` marks noise.
    pub labels: Vec<Option<usize>>,
    /// Member indices per cluster, indexed by label, ascending.
    pub clusters: Vec<Vec<usize>>,
    /// Indices belonging to no cluster, ascending.
    pub noise: Vec<usize>,
}

impl ClusterResult {
    fn insufficient(n: usize) -> Self {
        Self {
            insufficient_data: true,
            labels: vec![None; n],
            clusters: Vec::new(),
            noise: (0..n).collect(),
        }
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    pub fn clustered_count(&self) -> usize {
        self.clusters.iter().map(Vec::len).sum()
    }
}

/// Cluster embeddings (all belonging to one user).
pub fn cluster(embeddings: &[Vec<f32>], params: ClusterParams) -> Result<ClusterResult, ClusterError> {
    params.validate()?;

    if embeddings.len() < 2 {
        return Ok(ClusterResult::insufficient(embeddings.len()));
    }

    let similarity = vector::similarity_matrix(embeddings)?;
    let distance = vector::distance_matrix(&similarity);
    let raw = dbscan(&distance, params.eps, params.min_samples);
    let result = finalize(&raw, params.min_samples);

    tracing::debug!(
        faces = embeddings.len(),
        clusters = result.cluster_count(),
        noise = result.noise.len(),
        eps = params.eps,
        min_samples = params.min_samples,
        "dbscan complete"
    );

    Ok(result)
}

/// Indices within `eps` of `point`, the point itself included.
fn region_query(distance: &Array2<f32>, point: usize, eps: f32) -> Vec<usize> {
    distance
        .row(point)
        .iter()
        .enumerate()
        .filter(|(_, &d)| d <= eps)
        .map(|(j, _)| j)
        .collect()
}

/// Raw DBSCAN labelling over a precomputed distance matrix.
fn dbscan(distance: &Array2<f32>, eps: f32, min_samples: usize) -> Vec<Option<usize>> {
    let n = distance.nrows();
    let neighborhoods: Vec<Vec<usize>> = (0..n).map(|i| region_query(distance, i, eps)).collect();
    let is_core: Vec<bool> = neighborhoods.iter().map(|nb| nb.len() >= min_samples).collect();

    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut next_label = 0;

    for start in 0..n {
        if labels[start].is_some() || !is_core[start] {
            continue;
        }
        let label = next_label;
        next_label += 1;
        labels[start] = Some(label);

        let mut frontier = VecDeque::from([start]);
        while let Some(p) = frontier.pop_front() {
            for &q in &neighborhoods[p] {
                if labels[q].is_some() {
                    continue;
                }
                labels[q] = Some(label);
                // Border points join but do not extend the cluster.
                if is_core[q] {
                    frontier.push_back(q);
                }
            }
        }
    }

    labels
}

/// Drop groups smaller than `min_samples` (members revert to noise) and
/// renumber the survivors compactly, preserving first-found order.
fn finalize(raw: &[Option<usize>], min_samples: usize) -> ClusterResult {
    let group_count = raw.iter().flatten().map(|&l| l + 1).max().unwrap_or(0);
    let mut groups: Vec<Vec<usize>> = vec![Vec::new(); group_count];
    for (i, label) in raw.iter().enumerate() {
        if let Some(l) = label {
            groups[*l].push(i);
        }
    }

    let mut labels = vec![None; raw.len()];
    let mut clusters = Vec::new();
    for members in groups.into_iter().filter(|g| g.len() >= min_samples) {
        let label = clusters.len();
        for &i in &members {
            labels[i] = Some(label);
        }
        clusters.push(members);
    }

    let noise = labels
        .iter()
        .enumerate()
        .filter(|(_, l)| l.is_none())
        .map(|(i, _)| i)
        .collect();

    ClusterResult {
        insufficient_data: false,
        labels,
        clusters,
        noise,
    }
}

/// Summary statistics of a set of pairwise similarities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityStats {
    pub mean: f32,
    pub median: f32,
    pub std: f32,
    pub min: f32,
    pub max: f32,
    pub percentile_95: f32,
}

impl SimilarityStats {
    /// Statistics over `values`; `None` when empty.
    pub fn from_values(values: &[f32]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let n = sorted.len() as f64;
        let mean = sorted.iter().map(|&v| v as f64).sum::<f64>() / n;
        let variance = sorted.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;

        Some(Self {
            mean: mean as f32,
            median: percentile(&sorted, 50.0),
            std: variance.sqrt() as f32,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            percentile_95: percentile(&sorted, SUGGEST_PERCENTILE),
        })
    }
}

/// Linear-interpolated percentile of ascending `sorted` (numpy's default method).
fn percentile(sorted: &[f32], p: f32) -> f32 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (p as f64 / 100.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = rank - lo as f64;
            (sorted[lo] as f64 + (sorted[hi] as f64 - sorted[lo] as f64) * frac) as f32
        }
    }
}

/// Heuristic starting parameters for [`cluster`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ParameterSuggestion {
    InsufficientData {
        total_faces: usize,
    },
    Suggested {
        params: ClusterParams,
        similarity_stats: SimilarityStats,
        total_faces: usize,
    },
}

/// Estimate `eps` from the 95th percentile of pairwise similarity and
/// `min_samples` from the corpus size.
pub fn suggest_parameters(embeddings: &[Vec<f32>]) -> Result<ParameterSuggestion, VectorError> {
    let n = embeddings.len();
    if n < SUGGEST_MIN_FACES {
        return Ok(ParameterSuggestion::InsufficientData { total_faces: n });
    }

    let similarity = vector::similarity_matrix(embeddings)?;
    let pairs = vector::upper_triangle(&similarity);
    let Some(stats) = SimilarityStats::from_values(&pairs) else {
        return Ok(ParameterSuggestion::InsufficientData { total_faces: n });
    };

    let eps = (1.0 - stats.percentile_95).clamp(SUGGEST_EPS_MIN, SUGGEST_EPS_MAX);
    let min_samples = (n / 4).clamp(SUGGEST_MIN_SAMPLES_MIN, SUGGEST_MIN_SAMPLES_MAX);

    Ok(ParameterSuggestion::Suggested {
        params: ClusterParams { eps, min_samples },
        similarity_stats: stats,
        total_faces: n,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityAssessment {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityAssessment {
    pub fn from_score(score: f32) -> Self {
        if score >= 90.0 {
            Self::Excellent
        } else if score >= 80.0 {
            Self::Good
        } else if score >= 70.0 {
            Self::Fair
        } else {
            Self::Poor
        }
    }
}

/// Cohesion diagnostics for one cluster's members.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClusterQuality {
    InsufficientData {
        face_count: usize,
    },
    Scored {
        face_count: usize,
        /// `mean_similarity × 100`, clamped to [0, 100].
        quality_score: f32,
        assessment: QualityAssessment,
        mean_similarity: f32,
        min_similarity: f32,
        max_similarity: f32,
        std_similarity: f32,
    },
}

pub fn score_cluster_quality(embeddings: &[Vec<f32>]) -> Result<ClusterQuality, VectorError> {
    let face_count = embeddings.len();
    if face_count < 2 {
        return Ok(ClusterQuality::InsufficientData { face_count });
    }

    let similarity = vector::similarity_matrix(embeddings)?;
    let pairs = vector::upper_triangle(&similarity);
    let Some(stats) = SimilarityStats::from_values(&pairs) else {
        return Ok(ClusterQuality::InsufficientData { face_count });
    };

    let quality_score = (stats.mean * 100.0).clamp(0.0, 100.0);
    Ok(ClusterQuality::Scored {
        face_count,
        quality_score,
        assessment: QualityAssessment::from_score(quality_score),
        mean_similarity: stats.mean,
        min_similarity: stats.min,
        max_similarity: stats.max,
        std_similarity: stats.std,
    })
}
