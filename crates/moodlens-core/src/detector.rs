//! YuNet face detector via ONNX Runtime.
//!
//! Implements the YuNet (2023mar) anchor-free decoding over strides 8/16/32
//! with classification × objectness scoring and NMS post-processing. The
//! detector runs at the image's native resolution: call
//! [`FaceDetector::set_input_size`] before every [`FaceDetector::detect`].

use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
const YUNET_CANONICAL_SIZE: u32 = 320;
const YUNET_STRIDES: [usize; 3] = [8, 16, 32];
/// Input is zero-padded to a multiple of the largest stride.
const YUNET_ALIGN: usize = 32;
const YUNET_OUTPUT_GROUPS: [&str; 4] = ["cls", "obj", "bbox", "kps"];

pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.6;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.3;
pub const DEFAULT_TOP_K: usize = 5000;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("image is {actual_w}x{actual_h} but detector is configured for {expected_w}x{expected_h}")]
    InputSizeMismatch {
        expected_w: u32,
        expected_h: u32,
        actual_w: u32,
        actual_h: u32,
    },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Detection thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorParams {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub top_k: usize,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
            top_k: DEFAULT_TOP_K,
        }
    }
}

/// Output tensor indices for one stride: (cls_idx, obj_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize, usize);

/// Current input geometry: the image size and its stride-aligned padded size.
#[derive(Debug, Clone, Copy, PartialEq)]
struct InputGeometry {
    width: u32,
    height: u32,
    pad_w: usize,
    pad_h: usize,
}

impl InputGeometry {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pad_w: align_up(width as usize),
            pad_h: align_up(height as usize),
        }
    }
}

fn align_up(v: usize) -> usize {
    v.max(1).div_ceil(YUNET_ALIGN) * YUNET_ALIGN
}

/// YuNet-based face detector.
pub struct FaceDetector {
    session: Session,
    params: DetectorParams,
    geometry: InputGeometry,
    /// Per-stride output indices for strides [8, 16, 32].
    /// Discovered by name at load time; falls back to positional ordering.
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the YuNet ONNX model from the given path.
    pub fn load(model_path: &Path, params: DetectorParams) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        let num_outputs = output_names.len();

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded YuNet model"
        );

        if num_outputs < 12 {
            return Err(DetectorError::InferenceFailed(format!(
                "YuNet model requires 12 outputs (3 strides × cls/obj/bbox/kps), got {num_outputs}"
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "YuNet output tensor mapping");

        Ok(Self {
            session,
            params,
            geometry: InputGeometry::new(YUNET_CANONICAL_SIZE, YUNET_CANONICAL_SIZE),
            stride_indices,
        })
    }

    /// Retarget the detector to an image of `width` × `height` pixels.
    pub fn set_input_size(&mut self, width: u32, height: u32) {
        if (self.geometry.width, self.geometry.height) != (width, height) {
            self.geometry = InputGeometry::new(width, height);
            tracing::trace!(width, height, "YuNet input size set");
        }
    }

    /// Detect faces in a packed RGB frame, returning boxes sorted by confidence.
    ///
    /// The frame must match the size last passed to [`set_input_size`](Self::set_input_size).
    pub fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        let geometry = self.geometry;
        if (geometry.width, geometry.height) != (width, height) {
            return Err(DetectorError::InputSizeMismatch {
                expected_w: geometry.width,
                expected_h: geometry.height,
                actual_w: width,
                actual_h: height,
            });
        }
        let expected_len = width as usize * height as usize * 3;
        if rgb.len() < expected_len {
            return Err(DetectorError::InferenceFailed(format!(
                "frame has {} bytes, expected {expected_len}",
                rgb.len()
            )));
        }

        let input = preprocess(rgb, &geometry);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();

        for (stride_pos, &stride) in YUNET_STRIDES.iter().enumerate() {
            let (cls_idx, obj_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];

            let (_, cls) = outputs[cls_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("cls stride {stride}: {e}")))?;
            let (_, obj) = outputs[obj_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("obj stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bbox stride {stride}: {e}")))?;
            let (_, kps) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            let dets = decode_stride(
                StrideOutputs { cls, obj, bboxes, kps },
                stride,
                geometry.pad_w,
                geometry.pad_h,
                self.params.score_threshold,
            );
            all_detections.extend(dets);
        }

        let mut result = nms(all_detections, self.params.nms_threshold);
        result.truncate(self.params.top_k);

        tracing::debug!(count = result.len(), width, height, "YuNet detections");
        Ok(result)
    }
}

/// Pack an RGB frame into a zero-padded NCHW BGR float tensor.
///
/// YuNet consumes raw 0–255 intensities; no mean/std normalization.
fn preprocess(rgb: &[u8], geometry: &InputGeometry) -> Array4<f32> {
    let w = geometry.width as usize;
    let h = geometry.height as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, geometry.pad_h, geometry.pad_w));

    for y in 0..h {
        for x in 0..w {
            let i = (y * w + x) * 3;
            // RGB → BGR channel order
            tensor[[0, 0, y, x]] = rgb[i + 2] as f32;
            tensor[[0, 1, y, x]] = rgb[i + 1] as f32;
            tensor[[0, 2, y, x]] = rgb[i] as f32;
        }
    }

    tensor
}

/// Discover output tensor ordering by name.
///
/// YuNet exports name its outputs "cls_8", "obj_8", "bbox_8", "kps_8", ... If
/// the names are not recognized, falls back to the standard positional order:
///   [0-2] = cls, [3-5] = obj, [6-8] = bbox, [9-11] = kps (strides 8, 16, 32)
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = YUNET_STRIDES
        .iter()
        .map(|&stride| {
            let [cls, obj, bbox, kps] = YUNET_OUTPUT_GROUPS;
            Some((
                find(cls, stride)?,
                find(obj, stride)?,
                find(bbox, stride)?,
                find(kps, stride)?,
            ))
        })
        .collect();

    match named {
        Some(v) => {
            tracing::info!("YuNet: using name-based output tensor mapping");
            [v[0], v[1], v[2]]
        }
        None => {
            tracing::info!(
                ?names,
                "YuNet: output names not recognized, using positional mapping [0-2]=cls, [3-5]=obj, [6-8]=bbox, [9-11]=kps"
            );
            [(0, 3, 6, 9), (1, 4, 7, 10), (2, 5, 8, 11)]
        }
    }
}

/// Raw output slices for one stride level.
struct StrideOutputs<'a> {
    cls: &'a [f32],
    obj: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// Decode detections for a single stride level.
fn decode_stride(
    out: StrideOutputs<'_>,
    stride: usize,
    pad_w: usize,
    pad_h: usize,
    threshold: f32,
) -> Vec<BoundingBox> {
    let cols = pad_w / stride;
    let rows = pad_h / stride;
    let s = stride as f32;

    let mut detections = Vec::new();

    for r in 0..rows {
        for c in 0..cols {
            let idx = r * cols + c;

            let cls = out.cls.get(idx).copied().unwrap_or(0.0).clamp(0.0, 1.0);
            let obj = out.obj.get(idx).copied().unwrap_or(0.0).clamp(0.0, 1.0);
            let score = (cls * obj).sqrt();
            if score < threshold {
                continue;
            }

            let bbox_off = idx * 4;
            if bbox_off + 3 >= out.bboxes.len() {
                continue;
            }
            let cx = (c as f32 + out.bboxes[bbox_off]) * s;
            let cy = (r as f32 + out.bboxes[bbox_off + 1]) * s;
            let w = out.bboxes[bbox_off + 2].exp() * s;
            let h = out.bboxes[bbox_off + 3].exp() * s;

            let kps_off = idx * 10;
            let landmarks = if kps_off + 9 < out.kps.len() {
                let mut lms = [(0.0f32, 0.0f32); 5];
                for (i, lm) in lms.iter_mut().enumerate() {
                    *lm = (
                        (out.kps[kps_off + i * 2] + c as f32) * s,
                        (out.kps[kps_off + i * 2 + 1] + r as f32) * s,
                    );
                }
                Some(lms)
            } else {
                None
            };

            detections.push(BoundingBox {
                x: cx - w / 2.0,
                y: cy - h / 2.0,
                width: w,
                height: h,
                confidence: score,
                landmarks,
            });
        }
    }

    detections
}

/// Non-Maximum Suppression: remove overlapping detections.
///
/// Output is sorted by descending confidence.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if suppressed[j] {
                continue;
            }
            if iou(&detections[i], &detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Compute Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_w = (x2 - x1).max(0.0);
    let inter_h = (y2 - y1).max(0.0);
    let inter_area = inter_w * inter_h;

    let union_area = a.area() + b.area() - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}
