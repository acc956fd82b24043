//! Slide-change detection engine.
//!
//! Frames flow from a [`ports::FrameProvider`] through the
//! [`detector::ChangeDetector`] and the verification state machine into a
//! [`ports::SlideSink`]. The [`orchestrator::TaskOrchestrator`] runs one
//! capture session per queued job.

pub mod db;
pub mod detector;
pub mod filter;
pub mod orchestrator;
pub mod postprocess;
pub mod ports;
pub mod progress;
pub mod raster;
pub mod recorder;
pub mod settings;
pub mod storage;

#[cfg(test)]
mod test_support;
