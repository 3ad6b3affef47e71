//! Deterministic embedding fixtures shared by unit tests.

use crate::detector::{DetectorError, FaceDetector};
use crate::types::{BoundingBox, DetectedFace, Detection, FaceEmbedding, EMBEDDING_DIM};
use chrono::{Duration, TimeZone, Utc};
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::io::Cursor;
use uuid::Uuid;

/// Unit vector along axis `i`.
pub fn axis(i: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[i] = 1.0;
    v
}

/// Unit vector whose cosine similarity with `axis(base)` is exactly `sim`,
/// tilted towards `axis(toward)`.
pub fn near(base: usize, toward: usize, sim: f32) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[base] = sim;
    v[toward] = (1.0 - sim * sim).max(0.0).sqrt();
    v
}

/// Normalized `(1 - t) * axis(a) + t * axis(b)`.
pub fn blend(a: usize, b: usize, t: f32) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[a] = 1.0 - t;
    v[b] += t;
    crate::vector::normalize(&v)
}

/// Seeded random vector with components in [-1, 1).
pub fn seeded(seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..EMBEDDING_DIM).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

pub fn face(embedding: Vec<f32>) -> DetectedFace {
    DetectedFace {
        embedding,
        confidence: 0.99,
        bbox: BoundingBox { x: 10.0, y: 10.0, width: 80.0, height: 80.0 },
        landmarks: None,
    }
}

/// A stored record; `seq` orders `created_at`.
pub fn record(user_id: Uuid, photo_id: Uuid, embedding: Vec<f32>, seq: i64) -> FaceEmbedding {
    let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    FaceEmbedding {
        id: Uuid::new_v4(),
        user_id,
        photo_id,
        embedding,
        bbox: BoundingBox { x: 0.0, y: 0.0, width: 50.0, height: 50.0 },
        confidence: 0.95,
        created_at: epoch + Duration::seconds(seq),
    }
}

/// PNG bytes of a 100×100 well-exposed checkerboard (passes the default gate).
pub fn sharp_png() -> Vec<u8> {
    png(&GrayImage::from_fn(100, 100, |x, y| {
        if ((x / 4) + (y / 4)) % 2 == 0 {
            Luma([60])
        } else {
            Luma([200])
        }
    }))
}

/// PNG bytes of a 100×100 uniform mid-gray image (fails only the blur check).
pub fn blurry_png() -> Vec<u8> {
    png(&GrayImage::from_pixel(100, 100, Luma([128])))
}

fn png(img: &GrayImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

/// Detector that replays canned detections in call order and fails once
/// they run out.
pub struct ScriptedDetector {
    detections: VecDeque<Detection>,
}

impl ScriptedDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections: detections.into(),
        }
    }
}

impl FaceDetector for ScriptedDetector {
    fn detect(&mut self, _image: &DynamicImage) -> Result<Detection, DetectorError> {
        self.detections
            .pop_front()
            .ok_or_else(|| DetectorError::DetectionFailed("script exhausted".into()))
    }
}
