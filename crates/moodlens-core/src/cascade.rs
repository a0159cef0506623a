//! Classical multi-scale cascade detector (SeetaFace funnel cascade via `rustface`).
//!
//! Used only when the YuNet stage finds nothing or fails.

use crate::types::BoundingBox;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

/// Image pyramid step between scales (each level is 1/1.05 of the previous).
const CASCADE_SCALE_FACTOR: f32 = 1.05;
/// Smallest face the cascade will report, in pixels.
const CASCADE_MIN_FACE_SIZE: u32 = 48;
/// Minimum cascade response for a merged window to count as a face.
const CASCADE_SCORE_THRESHOLD: f64 = 2.0;
const CASCADE_WINDOW_STEP: u32 = 4;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade model not found: {0}")]
    ModelNotFound(String),
    #[error("failed to load cascade model {path}: {reason}")]
    Load { path: String, reason: String },
}

/// Cascade face detector over equalized grayscale images.
pub struct CascadeDetector {
    model: rustface::Model,
}

impl CascadeDetector {
    /// Load a SeetaFace frontal cascade model from disk.
    pub fn load(model_path: &Path) -> Result<Self, CascadeError> {
        let path = model_path.display().to_string();
        let file = File::open(model_path).map_err(|_| CascadeError::ModelNotFound(path.clone()))?;
        let model = rustface::read_model(BufReader::new(file)).map_err(|e| CascadeError::Load {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        tracing::info!(path = %path, "loaded cascade model");
        Ok(Self { model })
    }

    /// Detect faces in a row-major grayscale buffer of `width` × `height` bytes.
    pub fn detect(&self, gray: &[u8], width: u32, height: u32) -> Vec<BoundingBox> {
        if width < CASCADE_MIN_FACE_SIZE || height < CASCADE_MIN_FACE_SIZE {
            return Vec::new();
        }

        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(CASCADE_MIN_FACE_SIZE);
        detector.set_score_thresh(CASCADE_SCORE_THRESHOLD);
        detector.set_pyramid_scale_factor(1.0 / CASCADE_SCALE_FACTOR);
        detector.set_slide_window_step(CASCADE_WINDOW_STEP, CASCADE_WINDOW_STEP);

        let faces = detector.detect(&rustface::ImageData::new(gray, width, height));
        tracing::debug!(count = faces.len(), width, height, "cascade detections");

        faces
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                BoundingBox {
                    x: bbox.x() as f32,
                    y: bbox.y() as f32,
                    width: bbox.width() as f32,
                    height: bbox.height() as f32,
                    confidence: face.score() as f32,
                    landmarks: None,
                }
            })
            .collect()
    }
}
