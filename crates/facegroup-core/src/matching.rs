//! Similarity search within one user's faces and profile matching across
//! the whole corpus.

use crate::types::{BoundingBox, FaceEmbedding, ProfileFace};
use crate::vector::{self, VectorError};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

pub const DEFAULT_SIMILAR_THRESHOLD: f32 = 0.45;
pub const DEFAULT_SIMILAR_LIMIT: usize = 10;
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.45;
pub const DEFAULT_MATCH_LIMIT: usize = 200;
/// Upper bound on embeddings examined by one profile match.
pub const PROFILE_SCAN_CAP: usize = 5000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarFace {
    pub face_id: Uuid,
    pub photo_id: Uuid,
    pub similarity: f32,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Rank `candidates` by cosine similarity to `query`.
///
/// Scores below `threshold` are dropped. Equal scores keep candidate order.
/// Candidates with a malformed vector are skipped; a malformed query is an
/// error.
pub fn find_similar(
    query: &[f32],
    candidates: &[FaceEmbedding],
    threshold: f32,
    limit: usize,
) -> Result<Vec<SimilarFace>, VectorError> {
    vector::check_embedding(query)?;

    let mut hits: Vec<SimilarFace> = candidates
        .iter()
        .filter_map(|face| {
            let similarity = vector::cosine_similarity(query, &face.embedding).ok()?;
            (similarity >= threshold).then(|| SimilarFace {
                face_id: face.id,
                photo_id: face.photo_id,
                similarity,
                confidence: face.confidence,
                bbox: face.bbox,
            })
        })
        .collect();

    hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    hits.truncate(limit);
    Ok(hits)
}

/// Best-scoring face of one photo.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoMatch {
    pub photo_id: Uuid,
    pub similarity: f32,
    pub face_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileMatches {
    pub photos: Vec<PhotoMatch>,
    /// Embeddings examined.
    pub scanned: usize,
    pub scan_cap: usize,
    /// More embeddings exist than the scan examined.
    pub scan_capped: bool,
}

/// Score every face in `corpus` against a profile and keep the best score
/// per photo.
///
/// Photos are returned best first; equal scores keep the order in which each
/// photo was first seen.
pub fn match_profile(profile: &ProfileFace, corpus: &[FaceEmbedding], threshold: f32, limit: usize) -> Vec<PhotoMatch> {
    let mut order: Vec<PhotoMatch> = Vec::new();
    let mut index: HashMap<Uuid, usize> = HashMap::new();

    for face in corpus {
        let Ok(similarity) = vector::cosine_similarity(&profile.embedding, &face.embedding) else {
            continue;
        };
        // A NaN threshold admits nothing.
        if similarity.partial_cmp(&threshold).map_or(true, |o| o.is_lt()) {
            continue;
        }
        match index.get(&face.photo_id) {
            Some(&slot) => {
                if similarity > order[slot].similarity {
                    order[slot].similarity = similarity;
                    order[slot].face_id = face.id;
                }
            }
            None => {
                index.insert(face.photo_id, order.len());
                order.push(PhotoMatch {
                    photo_id: face.photo_id,
                    similarity,
                    face_id: face.id,
                });
            }
        }
    }

    order.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    order.truncate(limit);
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{axis, near, record};

    #[test]
    fn test_find_similar_ranks_and_limits() {
        let user = Uuid::new_v4();
        let photo = Uuid::new_v4();
        let faces = vec![
            record(user, photo, near(0, 1, 0.6), 0),
            record(user, photo, near(0, 2, 0.95), 1),
            record(user, photo, axis(3), 2),
            record(user, photo, near(0, 4, 0.8), 3),
        ];

        let hits = find_similar(&axis(0), &faces, 0.45, 10).unwrap();
        let ids: Vec<Uuid> = hits.iter().map(|h| h.face_id).collect();
        assert_eq!(ids, vec![faces[1].id, faces[3].id, faces[0].id]);

        let top = find_similar(&axis(0), &faces, 0.45, 2).unwrap();
        assert_eq!(top.len(), 2);
        assert!((top[0].similarity - 0.95).abs() < 1e-5);
    }

    #[test]
    fn test_find_similar_no_near_duplicate_is_empty() {
        let user = Uuid::new_v4();
        let faces: Vec<FaceEmbedding> = (1..6)
            .map(|i| record(user, Uuid::new_v4(), near(0, i, 0.9), i as i64))
            .collect();
        let hits = find_similar(&axis(0), &faces, 0.99, 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_find_similar_ties_keep_order() {
        let user = Uuid::new_v4();
        let faces: Vec<FaceEmbedding> = (0..4)
            .map(|i| record(user, Uuid::new_v4(), axis(0), i))
            .collect();
        let hits = find_similar(&axis(0), &faces, 0.5, 10).unwrap();
        let ids: Vec<Uuid> = hits.iter().map(|h| h.face_id).collect();
        let expected: Vec<Uuid> = faces.iter().map(|f| f.id).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_find_similar_rejects_bad_query() {
        assert!(matches!(
            find_similar(&[1.0, 0.0], &[], 0.45, 10),
            Err(VectorError::DimensionMismatch { expected: 512, actual: 2 })
        ));
    }

    #[test]
    fn test_match_profile_uses_best_face_per_photo() {
        let profile = ProfileFace { embedding: axis(0), threshold: 0.45 };
        let user = Uuid::new_v4();
        let group = Uuid::new_v4();
        let solo = Uuid::new_v4();
        let corpus = vec![
            record(user, group, near(0, 1, 0.5), 0),
            record(user, solo, near(0, 2, 0.7), 1),
            record(user, group, near(0, 3, 0.9), 2),
            record(user, Uuid::new_v4(), axis(4), 3),
        ];

        let photos = match_profile(&profile, &corpus, 0.45, 200);
        assert_eq!(photos.len(), 2);
        assert_eq!(photos[0].photo_id, group);
        assert_eq!(photos[0].face_id, corpus[2].id);
        assert!((photos[0].similarity - 0.9).abs() < 1e-5);
        assert_eq!(photos[1].photo_id, solo);
        assert!(photos[0].similarity > photos[1].similarity);
    }

    #[test]
    fn test_match_profile_limit_and_threshold() {
        let profile = ProfileFace { embedding: axis(0), threshold: 0.45 };
        let user = Uuid::new_v4();
        let corpus: Vec<FaceEmbedding> = [0.95, 0.85, 0.75, 0.65, 0.3]
            .iter()
            .enumerate()
            .map(|(i, &s)| record(user, Uuid::new_v4(), near(0, i + 1, s), i as i64))
            .collect();

        assert_eq!(match_profile(&profile, &corpus, 0.45, 200).len(), 4);
        let top = match_profile(&profile, &corpus, 0.45, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[1].photo_id, corpus[1].photo_id);
        assert!(match_profile(&profile, &corpus, 0.99, 200).is_empty());
    }

    #[test]
    fn test_match_profile_nan_threshold_matches_nothing() {
        let profile = ProfileFace { embedding: axis(0), threshold: f32::NAN };
        let user = Uuid::new_v4();
        let corpus: Vec<FaceEmbedding> = (1..4).map(|i| record(user, Uuid::new_v4(), axis(i), i as i64)).collect();
        assert!(match_profile(&profile, &corpus, f32::NAN, 200).is_empty());
    }

    #[test]
    fn test_find_similar_rejects_non_finite_query() {
        let mut query = axis(0);
        query[1] = f32::NAN;
        assert!(matches!(
            find_similar(&query, &[], 0.45, 10),
            Err(VectorError::NonFinite { index: 1 })
        ));
    }
}
