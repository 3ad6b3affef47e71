//! Vector math over face embeddings: normalization, cosine similarity,
//! and the pairwise similarity / distance matrices used for clustering.

use crate::types::EMBEDDING_DIM;
use ndarray::Array2;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VectorError {
    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding component {index} is not finite")]
    NonFinite { index: usize },
}

/// Fail with [`VectorError::DimensionMismatch`] unless `v` has [`EMBEDDING_DIM`] components.
pub fn check_dimension(v: &[f32]) -> Result<(), VectorError> {
    if v.len() == EMBEDDING_DIM {
        Ok(())
    } else {
        Err(VectorError::DimensionMismatch {
            expected: EMBEDDING_DIM,
            actual: v.len(),
        })
    }
}

/// [`check_dimension`], plus every component must be finite.
pub fn check_embedding(v: &[f32]) -> Result<(), VectorError> {
    check_dimension(v)?;
    match v.iter().position(|x| !x.is_finite()) {
        Some(index) => Err(VectorError::NonFinite { index }),
        None => Ok(()),
    }
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale `v` to unit length. A zero vector is returned unchanged.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = l2_norm(v);
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

/// Cosine similarity in [-1, 1]. Zero-norm input yields 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, VectorError> {
    check_dimension(a)?;
    check_dimension(b)?;

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 {
        Ok((dot / denom).clamp(-1.0, 1.0))
    } else {
        Ok(0.0)
    }
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Component-wise arithmetic mean. Empty input yields an empty vector.
pub fn mean_vector(vectors: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let mut sum = vec![0.0f32; first.len()];
    for v in vectors {
        for (acc, x) in sum.iter_mut().zip(v.iter()) {
            *acc += x;
        }
    }
    let n = vectors.len() as f32;
    sum.iter_mut().for_each(|x| *x /= n);
    sum
}

/// n×n symmetric cosine similarity matrix over normalized copies of `vectors`.
///
/// The diagonal is set to exactly 1.0 rather than recomputed.
pub fn similarity_matrix(vectors: &[Vec<f32>]) -> Result<Array2<f32>, VectorError> {
    for v in vectors {
        check_dimension(v)?;
    }
    let normalized: Vec<Vec<f32>> = vectors.iter().map(|v| normalize(v)).collect();

    let n = normalized.len();
    let mut matrix = Array2::<f32>::zeros((n, n));
    for i in 0..n {
        matrix[[i, i]] = 1.0;
        for j in (i + 1)..n {
            let sim = cosine_similarity(&normalized[i], &normalized[j])?;
            matrix[[i, j]] = sim;
            matrix[[j, i]] = sim;
        }
    }
    Ok(matrix)
}

/// Cosine distance matrix `1 - M`, with an exact-zero diagonal.
pub fn distance_matrix(similarity: &Array2<f32>) -> Array2<f32> {
    let mut distance = similarity.mapv(|s| 1.0 - s);
    distance.diag_mut().fill(0.0);
    distance
}

/// Upper-triangle (i < j) entries of a square matrix, row-major.
pub fn upper_triangle(matrix: &Array2<f32>) -> Vec<f32> {
    let n = matrix.nrows();
    let mut values = Vec::with_capacity(n * n.saturating_sub(1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            values.push(matrix[[i, j]]);
        }
    }
    values
}
