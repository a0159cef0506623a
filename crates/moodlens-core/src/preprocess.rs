//! Face crop → FER+ input tensor.

use crate::enhance::{self, CLAHE_CLIP_LIMIT, CLAHE_GRID};
use crate::locator::FaceRegion;
use ndarray::Array4;

/// FER+ input resolution (square).
pub const FERPLUS_INPUT_SIZE: usize = 64;

/// Build the (1, 1, 64, 64) classifier input from a face crop.
///
/// Runs a second CLAHE pass on the crop itself, resizes bilinearly to 64×64
/// and keeps raw 0–255 intensities (FER+ was trained without rescaling).
pub fn preprocess(region: &FaceRegion) -> Array4<f32> {
    let (width, height) = region.pixels.dimensions();
    let mut crop = region.pixels.as_raw().clone();
    enhance::clahe_enhance(&mut crop, width, height, CLAHE_GRID, CLAHE_CLIP_LIMIT);

    let size = FERPLUS_INPUT_SIZE;
    let resized = enhance::resize_bilinear(&crop, width as usize, height as usize, size, size);

    let mut tensor = Array4::<f32>::zeros((1, 1, size, size));
    for (dst, &src) in tensor.iter_mut().zip(resized.iter()) {
        *dst = src as f32;
    }
    tensor
}
