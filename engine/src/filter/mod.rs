//! Similarity strategies used by the change detector.

pub mod basic;
pub mod phash;
pub mod traits;

use slidewatch_common::config::{ComparisonConfig, ComparisonMethod};
use slidewatch_common::frame::Frame;

pub use basic::BasicFilter;
pub use phash::PerceptualFilter;
pub use traits::FrameFilter;

/// Which test produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Basic,
    PerceptualHash,
    Ssim,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Basic => "basic",
            Method::PerceptualHash => "phash",
            Method::Ssim => "ssim",
        }
    }
}

/// Result of comparing a frame against a reference.
///
/// `score` is method-specific: the changed-pixel ratio for `Basic`,
/// hamming distance / 64 for `PerceptualHash`, and `1 - ssim` for `Ssim`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub changed: bool,
    pub score: f64,
    pub method: Method,
}

/// The configured strategy. Closed set, selected once from config.
#[derive(Debug, Clone)]
pub enum Strategy {
    Basic(BasicFilter),
    Perceptual(PerceptualFilter),
}

impl Strategy {
    pub fn from_config(config: &ComparisonConfig) -> Self {
        match config.method {
            ComparisonMethod::Basic => Strategy::Basic(BasicFilter::from_config(config)),
            ComparisonMethod::Perceptual => Strategy::Perceptual(PerceptualFilter::from_config(config)),
        }
    }
}

impl FrameFilter for Strategy {
    fn compare(&self, reference: &Frame, current: &Frame) -> Verdict {
        match self {
            Strategy::Basic(f) => f.compare(reference, current),
            Strategy::Perceptual(f) => f.compare(reference, current),
        }
    }

    fn name(&self) -> &str {
        match self {
            Strategy::Basic(f) => f.name(),
            Strategy::Perceptual(f) => f.name(),
        }
    }
}
