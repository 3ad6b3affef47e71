//! Enrollment image quality gate: sharpness, exposure and face framing.
//!
//! All checks run independently and every failing reason is reported, so a
//! single bad photo yields complete feedback.

use crate::types::{BoundingBox, Detection};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIN_SHARPNESS: f32 = 120.0;
pub const MIN_BRIGHTNESS: f32 = 60.0;
pub const MAX_BRIGHTNESS: f32 = 200.0;
pub const MIN_FACE_RATIO: f32 = 0.20;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityThresholds {
    /// Minimum Laplacian variance.
    pub min_sharpness: f32,
    pub min_brightness: f32,
    pub max_brightness: f32,
    /// Minimum face-box area as a fraction of image area.
    pub min_face_ratio: f32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_sharpness: MIN_SHARPNESS,
            min_brightness: MIN_BRIGHTNESS,
            max_brightness: MAX_BRIGHTNESS,
            min_face_ratio: MIN_FACE_RATIO,
        }
    }
}

/// Why an enrollment sample was not used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    UndecodableImage { detail: String },
    NoFaceDetected,
    Blurry { sharpness: f32, minimum: f32 },
    Underexposed { brightness: f32, minimum: f32 },
    Overexposed { brightness: f32, maximum: f32 },
    FaceTooSmall { face_ratio: f32, minimum: f32 },
    InvalidEmbedding { dimensions: usize },
    NonFiniteEmbedding { index: usize },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndecodableImage { detail } => write!(f, "image could not be decoded: {detail}"),
            Self::NoFaceDetected => write!(f, "no face detected"),
            Self::Blurry { sharpness, minimum } => {
                write!(f, "image too blurry (sharpness {sharpness:.1} < {minimum:.1})")
            }
            Self::Underexposed { brightness, minimum } => {
                write!(f, "image too dark (brightness {brightness:.1} < {minimum:.1})")
            }
            Self::Overexposed { brightness, maximum } => {
                write!(f, "image too bright (brightness {brightness:.1} > {maximum:.1})")
            }
            Self::FaceTooSmall { face_ratio, minimum } => {
                write!(f, "face too small in frame ({face_ratio:.2} < {minimum:.2})")
            }
            Self::InvalidEmbedding { dimensions } => {
                write!(f, "embedding has {dimensions} dimensions")
            }
            Self::NonFiniteEmbedding { index } => {
                write!(f, "embedding component {index} is not finite")
            }
        }
    }
}

/// Measured image properties.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub sharpness: f32,
    pub brightness: f32,
    /// Absent when no face was detected.
    pub face_ratio: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub accepted: bool,
    pub reasons: Vec<RejectionReason>,
    pub metrics: QualityMetrics,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QualityGate {
    thresholds: QualityThresholds,
}

impl QualityGate {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    /// Evaluate a grayscale image against its detection result.
    ///
    /// Framing is judged on the detector's first face.
    pub fn evaluate(&self, gray: &GrayImage, detection: &Detection) -> QualityReport {
        let t = &self.thresholds;
        let sharpness = laplacian_variance(gray);
        let brightness = mean_brightness(gray);
        let face_ratio = detection
            .first_face()
            .map(|face| face_area_ratio(&face.bbox, gray.width(), gray.height()));

        let mut reasons = Vec::new();
        if face_ratio.is_none() {
            reasons.push(RejectionReason::NoFaceDetected);
        }
        if sharpness < t.min_sharpness {
            reasons.push(RejectionReason::Blurry {
                sharpness,
                minimum: t.min_sharpness,
            });
        }
        if brightness < t.min_brightness {
            reasons.push(RejectionReason::Underexposed {
                brightness,
                minimum: t.min_brightness,
            });
        } else if brightness > t.max_brightness {
            reasons.push(RejectionReason::Overexposed {
                brightness,
                maximum: t.max_brightness,
            });
        }
        if let Some(ratio) = face_ratio {
            if ratio < t.min_face_ratio {
                reasons.push(RejectionReason::FaceTooSmall {
                    face_ratio: ratio,
                    minimum: t.min_face_ratio,
                });
            }
        }

        QualityReport {
            accepted: reasons.is_empty(),
            reasons,
            metrics: QualityMetrics {
                sharpness,
                brightness,
                face_ratio,
            },
        }
    }
}

/// Mean pixel intensity (0.0–255.0).
pub fn mean_brightness(gray: &GrayImage) -> f32 {
    let data = gray.as_raw();
    if data.is_empty() {
        return 0.0;
    }
    (data.iter().map(|&b| b as f64).sum::<f64>() / data.len() as f64) as f32
}

/// Variance of the 4-neighbour Laplacian response, a blur proxy.
///
/// Borders use reflect-101 padding. Images narrower or shorter than two
/// pixels have no measurable edges and score 0.
pub fn laplacian_variance(gray: &GrayImage) -> f32 {
    let (w, h) = (gray.width() as i64, gray.height() as i64);
    if w < 2 || h < 2 {
        return 0.0;
    }

    let px = |x: i64, y: i64| gray.get_pixel(reflect_101(x, w) as u32, reflect_101(y, h) as u32)[0] as f64;

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 0..h {
        for x in 0..w {
            let response = px(x - 1, y) + px(x + 1, y) + px(x, y - 1) + px(x, y + 1) - 4.0 * px(x, y);
            sum += response;
            sum_sq += response * response;
        }
    }

    let n = (w * h) as f64;
    let mean = sum / n;
    ((sum_sq / n) - mean * mean).max(0.0) as f32
}

/// Mirror an out-of-range index without repeating the edge pixel.
fn reflect_101(i: i64, n: i64) -> i64 {
    if i < 0 {
        -i
    } else if i >= n {
        2 * n - 2 - i
    } else {
        i
    }
}

/// Face-box area (clipped to the image) divided by image area.
pub fn face_area_ratio(bbox: &BoundingBox, width: u32, height: u32) -> f32 {
    let image_area = width as f32 * height as f32;
    if image_area <= 0.0 {
        return 0.0;
    }
    bbox.clipped_area(width, height) / image_area
}
