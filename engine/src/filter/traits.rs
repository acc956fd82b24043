use slidewatch_common::frame::Frame;

use super::Verdict;

/// Pairwise slide-change comparison.
///
/// Implementations are pure: the verdict depends only on the two frames and
/// the filter's own thresholds. They never fail; internal faults degrade to a
/// cheaper comparison inside the implementation.
pub trait FrameFilter: Send + Sync {
    /// Compare `current` against `reference` and decide whether the content changed.
    fn compare(&self, reference: &Frame, current: &Frame) -> Verdict;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}
