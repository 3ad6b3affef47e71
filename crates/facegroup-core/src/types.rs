use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of every face embedding (ArcFace-style recognizers emit 512 floats).
pub const EMBEDDING_DIM: usize = 512;

/// Bounding box for a detected face, in source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Build a box from `[x1, y1, x2, y2]` corner coordinates.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1.min(x2),
            y: y1.min(y2),
            width: (x2 - x1).abs(),
            height: (y2 - y1).abs(),
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Area of the part of this box that lies inside a `width`×`height` image.
    pub fn clipped_area(&self, width: u32, height: u32) -> f32 {
        let x0 = self.x.max(0.0);
        let y0 = self.y.max(0.0);
        let x1 = (self.x + self.width).min(width as f32);
        let y1 = (self.y + self.height).min(height as f32);
        (x1 - x0).max(0.0) * (y1 - y0).max(0.0)
    }
}

/// One face as reported by the external detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFace {
    pub embedding: Vec<f32>,
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    #[serde(default)]
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Detector output for a single image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Detection {
    pub faces_detected: bool,
    #[serde(default)]
    pub faces: Vec<DetectedFace>,
}

impl Detection {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_faces(faces: Vec<DetectedFace>) -> Self {
        Self {
            faces_detected: !faces.is_empty(),
            faces,
        }
    }

    /// The detector's preferred face, if any face was found.
    pub fn first_face(&self) -> Option<&DetectedFace> {
        if self.faces_detected {
            self.faces.first()
        } else {
            None
        }
    }
}

/// A stored, identity-agnostic record of one detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceEmbedding {
    pub id: Uuid,
    pub user_id: Uuid,
    pub photo_id: Uuid,
    pub embedding: Vec<f32>,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
}

/// A hypothesized identity group within one user's faces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceCluster {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Member embedding ids, ordered and unique.
    pub face_ids: Vec<Uuid>,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

/// A user's enrolled reference face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileFace {
    /// Mean of the unit-normalized enrollment samples.
    pub embedding: Vec<f32>,
    /// Minimum cosine similarity for a corpus face to count as this person.
    pub threshold: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileStatus {
    pub has_profile: bool,
    pub threshold: Option<f32>,
}

impl ProfileStatus {
    pub fn of(profile: Option<&ProfileFace>) -> Self {
        Self {
            has_profile: profile.is_some(),
            threshold: profile.map(|p| p.threshold),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_from_corners() {
        let b = BoundingBox::from_corners(30.0, 40.0, 10.0, 10.0);
        assert_eq!(b, BoundingBox { x: 10.0, y: 10.0, width: 20.0, height: 30.0 });
        assert!((b.area() - 600.0).abs() < 1e-6);
    }

    #[test]
    fn test_bbox_clipped_area() {
        // Half the box hangs off the right edge.
        let b = BoundingBox { x: 50.0, y: 0.0, width: 100.0, height: 10.0 };
        assert!((b.clipped_area(100, 100) - 500.0).abs() < 1e-6);

        let outside = BoundingBox { x: 200.0, y: 200.0, width: 10.0, height: 10.0 };
        assert_eq!(outside.clipped_area(100, 100), 0.0);
    }

    #[test]
    fn test_first_face_requires_detection_flag() {
        let face = DetectedFace {
            embedding: vec![0.0; EMBEDDING_DIM],
            confidence: 0.9,
            bbox: BoundingBox { x: 0.0, y: 0.0, width: 1.0, height: 1.0 },
            landmarks: None,
        };
        let mut detection = Detection::with_faces(vec![face]);
        assert!(detection.first_face().is_some());

        detection.faces_detected = false;
        assert!(detection.first_face().is_none());
        assert!(Detection::empty().first_face().is_none());
    }

    #[test]
    fn test_detection_json_without_faces() {
        let detection: Detection = serde_json::from_str(r#"{"faces_detected": false}"#).unwrap();
        assert!(detection.faces.is_empty());
    }

    #[test]
    fn test_profile_status() {
        let profile = ProfileFace { embedding: vec![1.0], threshold: 0.47 };
        assert_eq!(
            ProfileStatus::of(Some(&profile)),
            ProfileStatus { has_profile: true, threshold: Some(0.47) }
        );
        assert_eq!(
            ProfileStatus::of(None),
            ProfileStatus { has_profile: false, threshold: None }
        );
    }
}
