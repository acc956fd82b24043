//! Stateless raster preprocessing shared by the similarity filters.
//!
//! Every function takes a frame by reference and returns a new frame; the
//! capture timestamp is carried over unchanged.

use image::imageops::FilterType;
use image::{ImageBuffer, Rgba};
use slidewatch_common::frame::Frame;

/// ITU-R BT.601 luma of one RGB triple, rounded to the nearest level.
fn luma(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64)
        .round()
        .clamp(0.0, 255.0) as u8
}

/// Replace R, G and B with the pixel's luma. Alpha is preserved.
pub fn grayscale(frame: &Frame) -> Frame {
    let mut out = frame.clone();
    for px in out.data_mut().chunks_exact_mut(4) {
        let y = luma(px[0], px[1], px[2]);
        px[0] = y;
        px[1] = y;
        px[2] = y;
    }
    out
}

/// One luma byte per pixel, row-major.
pub fn luma_plane(frame: &Frame) -> Vec<u8> {
    frame
        .data()
        .chunks_exact(4)
        .map(|px| luma(px[0], px[1], px[2]))
        .collect()
}

/// Keep rows `[floor(h*top/100), floor(h*(1-bottom/100)))` at full width.
///
/// If the percentages leave no rows the frame is returned uncropped.
pub fn crop_vertical(frame: &Frame, top_percent: f64, bottom_percent: f64) -> Frame {
    let (width, height) = frame.dimensions();
    let h = height as f64;
    let start = (h * (top_percent / 100.0)).floor().max(0.0) as u32;
    let end = (h * (1.0 - bottom_percent / 100.0)).floor().min(h) as u32;
    if end <= start {
        return frame.clone();
    }
    if start == 0 && end == height {
        return frame.clone();
    }

    let row_bytes = width as usize * 4;
    let mut out = Frame::blank(width, end - start, frame.captured_at_ms);
    let src = &frame.data()[start as usize * row_bytes..end as usize * row_bytes];
    out.data_mut().copy_from_slice(src);
    out
}

/// Bilinear resize to `width` x `height`.
pub fn resize(frame: &Frame, width: u32, height: u32) -> Frame {
    let (width, height) = (width.max(1), height.max(1));
    if frame.dimensions() == (width, height) {
        return frame.clone();
    }
    let Some(view) =
        ImageBuffer::<Rgba<u8>, &[u8]>::from_raw(frame.width(), frame.height(), frame.data())
    else {
        return frame.clone();
    };
    let resized = image::imageops::resize(&view, width, height, FilterType::Triangle);

    let mut out = Frame::blank(width, height, frame.captured_at_ms);
    out.data_mut().copy_from_slice(resized.as_raw());
    out
}

/// Normalized 1-D Gaussian kernel with radius `ceil(3 * sigma)`.
fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (3.0 * sigma).ceil().max(0.0) as i64;
    let mut kernel: Vec<f64> = (-radius..=radius)
        .map(|x| (-((x * x) as f64) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f64 = kernel.iter().sum();
    for w in &mut kernel {
        *w /= sum;
    }
    kernel
}

/// Separable Gaussian blur of the luma channel, written back to R, G and B.
///
/// Edges are clamped. Alpha is preserved. A non-positive sigma is a no-op.
pub fn gaussian_blur(frame: &Frame, sigma: f64) -> Frame {
    if !(sigma.is_finite() && sigma > 0.0) {
        return frame.clone();
    }
    let (w, h) = (frame.width() as usize, frame.height() as usize);
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as isize;
    let src = luma_plane(frame);

    let mut horizontal = vec![0.0f64; w * h];
    for y in 0..h {
        let row = &src[y * w..(y + 1) * w];
        for x in 0..w {
            let mut acc = 0.0;
            for (i, weight) in kernel.iter().enumerate() {
                let kx = (x as isize + i as isize - radius).clamp(0, w as isize - 1) as usize;
                acc += row[kx] as f64 * weight;
            }
            horizontal[y * w + x] = acc;
        }
    }

    let mut out = frame.clone();
    let data = out.data_mut();
    for x in 0..w {
        for y in 0..h {
            let mut acc = 0.0;
            for (i, weight) in kernel.iter().enumerate() {
                let ky = (y as isize + i as isize - radius).clamp(0, h as isize - 1) as usize;
                acc += horizontal[ky * w + x] * weight;
            }
            let v = acc.round().clamp(0.0, 255.0) as u8;
            let idx = (y * w + x) * 4;
            data[idx] = v;
            data[idx + 1] = v;
            data[idx + 2] = v;
        }
    }
    out
}
