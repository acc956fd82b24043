//! Interfaces to the world outside the engine: the rendered surface, the
//! slide store and the remote progress service.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use slidewatch_common::frame::Frame;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("captured frame is blank")]
    Blank,
    #[error("capture target is not available")]
    TargetUnavailable,
    #[error("frame provider failed: {0}")]
    Provider(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("slide I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("slide encoding failed: {0}")]
    Encode(String),
    #[error("slide decoding failed: {0}")]
    Decode(String),
    #[error("slide index error: {0}")]
    Index(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("progress request failed: {0}")]
    Request(String),
    #[error("progress endpoint returned status {0}")]
    Status(u16),
}

/// Confirmation returned by a sink after a slide was persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlideAck {
    pub location: PathBuf,
}

#[async_trait]
pub trait FrameProvider: Send + Sync {
    /// Sample the capture target once.
    async fn capture_frame(&self) -> Result<Frame, CaptureError>;
}

#[async_trait]
pub trait PlaybackProbe: Send + Sync {
    /// Polled once per tick, before the capture.
    async fn is_playback_ended(&self) -> bool;
}

/// A media player exposing the capture surface.
#[async_trait]
pub trait Player: FrameProvider + PlaybackProbe {
    async fn load(&self, target: &str) -> Result<(), CaptureError>;
    async fn reload(&self) -> Result<(), CaptureError>;
    async fn is_playing(&self) -> bool;
    /// Text of a player-reported error, if one is showing.
    async fn error_indicator(&self) -> Option<String>;
    async fn set_playback_rate(&self, rate: f64);
}

#[async_trait]
pub trait SlideSink: Send + Sync {
    /// Persist one committed slide. `index` is the 1-based slide number in the session.
    async fn save_slide(
        &self,
        frame: &Frame,
        timestamp: DateTime<Local>,
        title: &str,
        index: u32,
    ) -> Result<SlideAck, SinkError>;

    /// Read back a slide saved by this sink.
    async fn load_slide(&self, ack: &SlideAck) -> Result<Frame, SinkError>;

    async fn remove_slide(&self, ack: &SlideAck) -> Result<(), SinkError>;
}

#[async_trait]
pub trait ProgressResetter: Send + Sync {
    async fn reset_remote_progress(&self, id: &str) -> Result<(), ProgressError>;
}
