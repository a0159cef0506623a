//! Grayscale conversion, CLAHE and bilinear resampling on raw 8-bit buffers.

use image::{GrayImage, RgbImage};

/// CLAHE clip limit used for both the whole-image and the face-crop pass.
pub const CLAHE_CLIP_LIMIT: f32 = 2.0;
/// CLAHE tile grid (tiles per axis).
pub const CLAHE_GRID: u32 = 8;

/// Convert an RGB image to 8-bit luma using BT.601 weights.
pub fn to_grayscale(rgb: &RgbImage) -> GrayImage {
    let (width, height) = rgb.dimensions();
    let data = rgb
        .as_raw()
        .chunks_exact(3)
        .map(|px| {
            let luma = 299 * px[0] as u32 + 587 * px[1] as u32 + 114 * px[2] as u32;
            ((luma + 500) / 1000) as u8
        })
        .collect();
    // Length is width * height by construction.
    GrayImage::from_raw(width, height, data).unwrap_or_else(|| GrayImage::new(width, height))
}

/// Apply Contrast-Limited Adaptive Histogram Equalization (CLAHE) in-place.
///
/// Divides the image into a `grid` × `grid` arrangement of tiles, computes a
/// clipped histogram per tile, builds per-tile lookup tables, and blends the
/// four nearest tile tables bilinearly for each pixel.
///
/// `clip_limit` follows the usual convention: a bin may hold at most
/// `clip_limit * tile_pixels / 256` counts before the excess is redistributed.
/// Images narrower or shorter than the grid use one tile per pixel row/column.
pub fn clahe_enhance(gray: &mut [u8], width: u32, height: u32, grid: u32, clip_limit: f32) {
    let w = width as usize;
    let h = height as usize;
    if w == 0 || h == 0 || grid == 0 || gray.len() < w * h {
        return;
    }

    let tx = (grid as usize).min(w);
    let ty = (grid as usize).min(h);

    // Tile boundaries: tile `i` covers [i * len / n, (i + 1) * len / n).
    let bounds = |i: usize, n: usize, len: usize| (i * len / n, (i + 1) * len / n);

    let mut luts: Vec<[f32; 256]> = Vec::with_capacity(tx * ty);

    for row in 0..ty {
        let (y0, y1) = bounds(row, ty, h);
        for col in 0..tx {
            let (x0, x1) = bounds(col, tx, w);
            let tile_pixels = (y1 - y0) * (x1 - x0);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray[y * w + x] as usize] += 1;
                }
            }

            let clip = ((clip_limit * tile_pixels as f32 / 256.0) as u32).max(1);
            clip_histogram(&mut hist, clip);

            // Build LUT from the CDF, scaled to 0–255
            let scale = 255.0 / tile_pixels as f32;
            let mut lut = [0f32; 256];
            let mut acc = 0u32;
            for (v, &count) in lut.iter_mut().zip(hist.iter()) {
                acc += count;
                *v = (acc as f32 * scale).clamp(0.0, 255.0);
            }
            luts.push(lut);
        }
    }

    // Map each pixel using bilinear interpolation between tile LUTs
    for y in 0..h {
        let fy = ((y as f32 + 0.5) * ty as f32 / h as f32 - 0.5).clamp(0.0, (ty - 1) as f32);
        let r0 = fy as usize;
        let r1 = (r0 + 1).min(ty - 1);
        let dy = fy - r0 as f32;

        for x in 0..w {
            let fx = ((x as f32 + 0.5) * tx as f32 / w as f32 - 0.5).clamp(0.0, (tx - 1) as f32);
            let c0 = fx as usize;
            let c1 = (c0 + 1).min(tx - 1);
            let dx = fx - c0 as f32;

            let pixel = gray[y * w + x] as usize;
            let tl = luts[r0 * tx + c0][pixel];
            let tr = luts[r0 * tx + c1][pixel];
            let bl = luts[r1 * tx + c0][pixel];
            let br = luts[r1 * tx + c1][pixel];

            let top = tl * (1.0 - dx) + tr * dx;
            let bot = bl * (1.0 - dx) + br * dx;
            let val = top * (1.0 - dy) + bot * dy;

            gray[y * w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Clip every bin at `clip` and hand the excess back out uniformly.
///
/// The remainder that does not divide evenly goes to every `256 / residual`-th
/// bin, starting at zero.
fn clip_histogram(hist: &mut [u32; 256], clip: u32) {
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }

    let redist = excess / 256;
    for bin in hist.iter_mut() {
        *bin += redist;
    }
    let residual = (excess % 256) as usize;
    if residual > 0 {
        let step = (256 / residual).max(1);
        for bin in hist.iter_mut().step_by(step).take(residual) {
            *bin += 1;
        }
    }
}

/// CLAHE with the pipeline's fixed parameters, returning a new image.
pub fn equalize(gray: &GrayImage) -> GrayImage {
    let (width, height) = gray.dimensions();
    let mut out = gray.clone();
    clahe_enhance(&mut out, width, height, CLAHE_GRID, CLAHE_CLIP_LIMIT);
    out
}

/// Resize a grayscale buffer with bilinear interpolation (half-pixel centers).
pub fn resize_bilinear(
    src: &[u8],
    width: usize,
    height: usize,
    new_w: usize,
    new_h: usize,
) -> Vec<u8> {
    let mut resized = vec![0u8; new_w * new_h];
    if width == 0 || height == 0 || src.len() < width * height {
        return resized;
    }

    let sx_scale = width as f32 / new_w as f32;
    let sy_scale = height as f32 / new_h as f32;

    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * sy_scale - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);
        let fy = if src_y < 0.0 { 0.0 } else { fy };

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * sx_scale - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);
            let fx = if src_x < 0.0 { 0.0 } else { fx };

            let tl = src[y0 * width + x0] as f32;
            let tr = src[y0 * width + x1] as f32;
            let bl = src[y1 * width + x0] as f32;
            let br = src[y1 * width + x1] as f32;

            let val = tl * (1.0 - fx) * (1.0 - fy)
                + tr * fx * (1.0 - fy)
                + bl * (1.0 - fx) * fy
                + br * fx * fy;

            resized[y * new_w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    resized
}
