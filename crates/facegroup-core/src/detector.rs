//! Face detector seam.
//!
//! Detection and recognition models live outside this crate; anything that
//! turns a decoded image into faces with 512-dimensional embeddings can
//! drive enrollment by implementing [`FaceDetector`].

use crate::types::Detection;
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector unavailable: {0}")]
    Unavailable(String),
    #[error("detection failed: {0}")]
    DetectionFailed(String),
}

pub trait FaceDetector {
    /// Detect faces, ordered by detector preference (best first).
    fn detect(&mut self, image: &DynamicImage) -> Result<Detection, DetectorError>;
}

impl<D: FaceDetector + ?Sized> FaceDetector for Box<D> {
    fn detect(&mut self, image: &DynamicImage) -> Result<Detection, DetectorError> {
        (**self).detect(image)
    }
}
