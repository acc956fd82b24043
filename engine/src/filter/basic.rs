use slidewatch_common::config::ComparisonConfig;
use slidewatch_common::frame::Frame;
use tracing::debug;

use super::traits::FrameFilter;
use super::{Method, Verdict};
use crate::raster;

/// Pixel-difference filter.
///
/// Both frames are converted to grayscale and blurred, then each pixel's
/// summed channel difference is compared against `pixel_diff_threshold`.
/// The share of differing pixels is the change ratio; the frame counts as
/// changed only when that ratio is strictly above `change_ratio_threshold`.
#[derive(Debug, Clone)]
pub struct BasicFilter {
    pixel_diff_threshold: u32,
    change_ratio_threshold: f64,
    blur_sigma: f64,
}

impl BasicFilter {
    pub fn new(pixel_diff_threshold: u32, change_ratio_threshold: f64, blur_sigma: f64) -> Self {
        Self {
            pixel_diff_threshold,
            change_ratio_threshold,
            blur_sigma,
        }
    }

    pub fn from_config(config: &ComparisonConfig) -> Self {
        Self::new(
            config.pixel_diff_threshold,
            config.change_ratio_threshold,
            config.gaussian_blur_sigma,
        )
    }

    /// Fraction of pixels whose blurred grayscale difference exceeds the pixel threshold.
    pub fn change_ratio(&self, reference: &Frame, current: &Frame) -> f64 {
        let resized;
        let current = if current.dimensions() != reference.dimensions() {
            resized = raster::resize(current, reference.width(), reference.height());
            &resized
        } else {
            current
        };

        let a = raster::gaussian_blur(&raster::grayscale(reference), self.blur_sigma);
        let b = raster::gaussian_blur(&raster::grayscale(current), self.blur_sigma);

        let differing = a
            .data()
            .chunks_exact(4)
            .zip(b.data().chunks_exact(4))
            .filter(|(p, q)| {
                let diff = p[0].abs_diff(q[0]) as u32
                    + p[1].abs_diff(q[1]) as u32
                    + p[2].abs_diff(q[2]) as u32;
                diff > self.pixel_diff_threshold
            })
            .count();

        differing as f64 / a.pixel_count() as f64
    }

    /// Strict comparison: a ratio equal to the threshold is not a change.
    pub fn is_change(&self, change_ratio: f64) -> bool {
        change_ratio > self.change_ratio_threshold
    }
}

impl FrameFilter for BasicFilter {
    fn compare(&self, reference: &Frame, current: &Frame) -> Verdict {
        let ratio = self.change_ratio(reference, current);
        let changed = self.is_change(ratio);
        debug!(
            change_ratio = format!("{:.5}", ratio),
            threshold = self.change_ratio_threshold,
            changed,
            "basic comparison"
        );
        Verdict {
            changed,
            score: ratio,
            method: Method::Basic,
        }
    }

    fn name(&self) -> &str {
        "basic"
    }
}
