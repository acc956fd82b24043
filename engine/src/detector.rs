use slidewatch_common::config::{ComparisonConfig, CropConfig};
use slidewatch_common::frame::Frame;
use tracing::debug;

use crate::filter::{FrameFilter, Strategy, Verdict};
use crate::raster;

/// Crop-normalizes frames and dispatches them to the configured strategy.
///
/// Baselines and candidates are kept in their prepared (cropped) form, so the
/// capture loop calls [`prepare`](Self::prepare) once per captured frame and
/// then [`compare`](Self::compare) against stored references.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    strategy: Strategy,
    crop: CropConfig,
}

impl ChangeDetector {
    pub fn new(strategy: Strategy, crop: CropConfig) -> Self {
        Self { strategy, crop }
    }

    pub fn from_config(comparison: &ComparisonConfig, crop: CropConfig) -> Self {
        Self::new(Strategy::from_config(comparison), crop)
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Apply the configured vertical crop.
    pub fn prepare(&self, frame: &Frame) -> Frame {
        raster::crop_vertical(frame, self.crop.top_percent, self.crop.bottom_percent)
    }

    /// Compare two already prepared frames. `current` is resized to the
    /// reference's dimensions if they differ.
    pub fn compare(&self, reference: &Frame, current: &Frame) -> Verdict {
        if reference.dimensions() != current.dimensions() {
            debug!(
                reference = ?reference.dimensions(),
                current = ?current.dimensions(),
                "frame dimensions drifted, resizing"
            );
            let resized = raster::resize(current, reference.width(), reference.height());
            return self.strategy.compare(reference, &resized);
        }
        self.strategy.compare(reference, current)
    }

    /// Crop both raw frames and compare them.
    pub fn detect(&self, reference: &Frame, current: &Frame) -> Verdict {
        self.compare(&self.prepare(reference), &self.prepare(current))
    }
}
