//! Detector results captured upstream and shipped as JSON.
//!
//! A sidecar file maps image file names to detector output:
//!
//! ```json
//! { "IMG_0001.jpg": { "faces_detected": true, "faces": [ { "embedding": [...], "confidence": 0.98,
//!   "bbox": { "x": 10, "y": 12, "width": 80, "height": 96 } } ] } }
//! ```

use anyhow::{Context, Result};
use facegroup_core::{Detection, DetectorError, FaceDetector};
use image::DynamicImage;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

pub type SidecarFile = BTreeMap<String, Detection>;

pub fn load(path: &Path) -> Result<SidecarFile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading detections {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing detections {}", path.display()))
}

type Fingerprint = [u8; 32];

fn fingerprint(image: &DynamicImage) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(image.width().to_le_bytes());
    hasher.update(image.height().to_le_bytes());
    hasher.update(image.as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// [`FaceDetector`] that answers from a sidecar file.
///
/// Images are matched by the SHA-256 of their decoded pixels, registered
/// ahead of time together with their file name. Unknown images yield an
/// empty detection.
pub struct SidecarDetector {
    detections: SidecarFile,
    by_pixels: HashMap<Fingerprint, String>,
}

impl SidecarDetector {
    pub fn new(detections: SidecarFile) -> Self {
        Self {
            detections,
            by_pixels: HashMap::new(),
        }
    }

    /// Associate encoded image bytes with a sidecar entry. Returns false
    /// when the bytes do not decode.
    pub fn register(&mut self, name: &str, bytes: &[u8]) -> bool {
        match image::load_from_memory(bytes) {
            Ok(img) => {
                if !self.detections.contains_key(name) {
                    tracing::warn!(image = name, "no sidecar entry; treating as no face");
                }
                if let Some(previous) = self.by_pixels.insert(fingerprint(&img), name.to_string()) {
                    if previous != name {
                        tracing::warn!(
                            image = name,
                            replaces = %previous,
                            "identical pixels registered under two names; using the later entry"
                        );
                    }
                }
                true
            }
            Err(e) => {
                tracing::debug!(image = name, error = %e, "sidecar: image does not decode");
                false
            }
        }
    }
}

impl FaceDetector for SidecarDetector {
    fn detect(&mut self, image: &DynamicImage) -> Result<Detection, DetectorError> {
        let detection = self
            .by_pixels
            .get(&fingerprint(image))
            .and_then(|name| self.detections.get(name))
            .cloned()
            .unwrap_or_default();
        Ok(detection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegroup_core::{BoundingBox, DetectedFace};
    use image::{GrayImage, ImageFormat, Luma};
    use std::io::Cursor;

    fn png(value: u8) -> Vec<u8> {
        let mut bytes = Vec::new();
        GrayImage::from_pixel(8, 8, Luma([value]))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn one_face(confidence: f32) -> Detection {
        Detection::with_faces(vec![DetectedFace {
            embedding: vec![0.0; 4],
            confidence,
            bbox: BoundingBox { x: 0.0, y: 0.0, width: 4.0, height: 4.0 },
            landmarks: None,
        }])
    }

    #[test]
    fn test_detect_by_pixels() {
        let sidecar = SidecarFile::from([("a.png".to_string(), one_face(0.9)), ("b.png".to_string(), one_face(0.5))]);
        let mut detector = SidecarDetector::new(sidecar);
        let (a, b) = (png(10), png(200));
        assert!(detector.register("a.png", &a));
        assert!(detector.register("b.png", &b));

        let found = detector.detect(&image::load_from_memory(&b).unwrap()).unwrap();
        assert!((found.faces[0].confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_identical_pixels_use_latest_name() {
        let sidecar = SidecarFile::from([("a.png".to_string(), one_face(0.9)), ("copy.png".to_string(), one_face(0.4))]);
        let mut detector = SidecarDetector::new(sidecar);
        let bytes = png(77);
        assert!(detector.register("a.png", &bytes));
        assert!(detector.register("copy.png", &bytes));

        let found = detector.detect(&image::load_from_memory(&bytes).unwrap()).unwrap();
        assert!((found.faces[0].confidence - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_image_is_empty() {
        let mut detector = SidecarDetector::new(SidecarFile::new());
        let found = detector.detect(&image::load_from_memory(&png(42)).unwrap()).unwrap();
        assert!(!found.faces_detected);
        assert!(found.faces.is_empty());
    }

    #[test]
    fn test_register_rejects_garbage() {
        let mut detector = SidecarDetector::new(SidecarFile::new());
        assert!(!detector.register("x.png", b"garbage"));
    }

    #[test]
    fn test_parse_sidecar_json() {
        let parsed: SidecarFile = serde_json::from_str(
            r#"{ "IMG_1.jpg": { "faces_detected": true, "faces": [
                 { "embedding": [0.1, 0.2], "confidence": 0.98,
                   "bbox": { "x": 1, "y": 2, "width": 3, "height": 4 } } ] },
                 "IMG_2.jpg": { "faces_detected": false } }"#,
        )
        .unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["IMG_1.jpg"].faces[0].bbox.height, 4.0);
        assert!(parsed["IMG_2.jpg"].first_face().is_none());
    }
}
