//! Face locator: primary detector with cascade fallback, largest-face selection
//! and padded crop of the equalized grayscale image.

use crate::cascade::CascadeDetector;
use crate::detector::FaceDetector;
use crate::enhance;
use crate::types::BoundingBox;
use image::{imageops, GrayImage, RgbImage};

/// Each side of the selected box grows by this fraction of its shorter side.
const CROP_PADDING_RATIO: f32 = 0.1;

/// Images handed to the detection stages for one request.
pub struct DetectionInput<'a> {
    /// Decoded color image, untouched. Only the primary detector reads it.
    pub color: &'a RgbImage,
    /// Grayscale with whole-image CLAHE applied.
    pub equalized: GrayImage,
}

impl<'a> DetectionInput<'a> {
    pub fn new(color: &'a RgbImage) -> Self {
        let equalized = enhance::equalize(&enhance::to_grayscale(color));
        Self { color, equalized }
    }

    pub fn width(&self) -> u32 {
        self.color.width()
    }

    pub fn height(&self) -> u32 {
        self.color.height()
    }
}

/// Outcome of one detection stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    /// The stage picked this box (largest area among its candidates).
    Found(BoundingBox),
    NotFound,
    /// The stage could not run. Treated like `NotFound` by the locator.
    Failed(String),
}

impl Detection {
    /// Reduce a candidate list to its largest-area box.
    pub fn from_candidates(candidates: Vec<BoundingBox>) -> Self {
        match select_largest(candidates) {
            Some(face) => Detection::Found(face),
            None => Detection::NotFound,
        }
    }
}

/// A detection stage.
pub trait FaceFinder {
    fn find(&mut self, input: &DetectionInput<'_>) -> Detection;
}

impl FaceFinder for FaceDetector {
    fn find(&mut self, input: &DetectionInput<'_>) -> Detection {
        let (width, height) = (input.width(), input.height());
        self.set_input_size(width, height);
        match self.detect(input.color.as_raw(), width, height) {
            Ok(candidates) => Detection::from_candidates(candidates),
            Err(e) => Detection::Failed(e.to_string()),
        }
    }
}

impl FaceFinder for CascadeDetector {
    fn find(&mut self, input: &DetectionInput<'_>) -> Detection {
        let (width, height) = input.equalized.dimensions();
        Detection::from_candidates(self.detect(input.equalized.as_raw(), width, height))
    }
}

/// Selected face: padded crop of the equalized grayscale image plus its box.
#[derive(Debug, Clone)]
pub struct FaceRegion {
    pub pixels: GrayImage,
    /// Detector box before padding.
    pub bbox: BoundingBox,
    /// Crop rectangle actually taken: (x, y, width, height).
    pub crop: (u32, u32, u32, u32),
}

/// Pick the candidate with the largest area, ignoring confidence.
///
/// On equal areas the earlier candidate wins.
pub fn select_largest(candidates: Vec<BoundingBox>) -> Option<BoundingBox> {
    candidates.into_iter().fold(None, |best, candidate| match best {
        Some(b) if b.area() >= candidate.area() => Some(b),
        _ => Some(candidate),
    })
}

/// Pad `bbox` by 10% of its shorter side on every edge and clamp to the image.
///
/// Returns `(x, y, width, height)`, or `None` when nothing of the box lies
/// inside the image.
pub fn padded_crop_rect(bbox: &BoundingBox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    // Integer box and padding, truncated like pixel coordinates.
    let (x, y) = (bbox.x as i64, bbox.y as i64);
    let (w, h) = (bbox.width as i64, bbox.height as i64);
    let pad = (CROP_PADDING_RATIO * w.min(h) as f32) as i64;

    let x1 = (x - pad).max(0);
    let y1 = (y - pad).max(0);
    let x2 = (x + w + pad).min(width as i64);
    let y2 = (y + h + pad).min(height as i64);

    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some((x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32))
}

/// Crop the padded face region out of the equalized grayscale image.
pub fn crop_face(equalized: &GrayImage, bbox: BoundingBox) -> Option<FaceRegion> {
    let (width, height) = equalized.dimensions();
    let crop = padded_crop_rect(&bbox, width, height)?;
    let (x, y, w, h) = crop;
    let pixels = imageops::crop_imm(equalized, x, y, w, h).to_image();
    Some(FaceRegion { pixels, bbox, crop })
}

/// Resolve the primary outcome, falling back when it did not yield a face.
///
/// `fallback` runs if the primary stage missed, failed, or found a box with
/// nothing inside the image. Returns `None` for "no face".
pub fn locate(
    input: &DetectionInput<'_>,
    primary: Detection,
    fallback: impl FnOnce() -> Detection,
) -> Option<FaceRegion> {
    let region = match primary {
        Detection::Found(face) => {
            let region = crop_face(&input.equalized, face);
            if region.is_none() {
                tracing::debug!("primary box lies outside the image; trying cascade");
            }
            region
        }
        Detection::NotFound => {
            tracing::debug!("primary detector found no face; trying cascade");
            None
        }
        Detection::Failed(reason) => {
            tracing::debug!(%reason, "primary detector failed; trying cascade");
            None
        }
    };

    let region = region.or_else(|| match fallback() {
        Detection::Found(face) => crop_face(&input.equalized, face),
        Detection::NotFound => None,
        Detection::Failed(reason) => {
            tracing::warn!(%reason, "cascade detector failed");
            None
        }
    });

    if let Some(r) = &region {
        tracing::debug!(crop = ?r.crop, confidence = r.bbox.confidence, "face located");
    }
    region
}
