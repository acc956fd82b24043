//! Scripted in-memory collaborators for unit tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use slidewatch_common::frame::Frame;

use crate::ports::{
    CaptureError, FrameProvider, PlaybackProbe, Player, ProgressError, ProgressResetter, SinkError,
    SlideAck, SlideSink,
};

#[derive(Debug, Clone)]
pub enum Shot {
    Frame(Frame),
    Blank,
    Unavailable,
}

/// Captures served for one target, in order. Once exhausted, the last shot
/// repeats unless the script ends playback.
#[derive(Debug, Clone)]
pub struct Script {
    shots: Vec<Shot>,
    ends: bool,
    plays: bool,
    error: Option<String>,
    error_at_end: Option<String>,
}

impl Script {
    pub fn new(shots: Vec<Shot>) -> Self {
        Self {
            shots,
            ends: false,
            plays: true,
            error: None,
            error_at_end: None,
        }
    }

    /// Report playback ended once every shot was served.
    pub fn ending(mut self) -> Self {
        self.ends = true;
        self
    }

    pub fn never_plays(mut self) -> Self {
        self.plays = false;
        self
    }

    pub fn with_error(mut self, message: &str) -> Self {
        self.error = Some(message.to_string());
        self
    }

    /// Show an error only once every shot was served.
    pub fn with_error_at_end(mut self, message: &str) -> Self {
        self.error_at_end = Some(message.to_string());
        self
    }
}

#[derive(Default)]
struct PlayerState {
    scripts: HashMap<String, Script>,
    current: Option<String>,
    cursor: usize,
    loads: Vec<String>,
    reloads: u32,
    rates: Vec<f64>,
    captures: u32,
}

impl PlayerState {
    fn script(&self) -> Option<&Script> {
        self.current.as_ref().and_then(|t| self.scripts.get(t))
    }
}

#[derive(Default)]
pub struct ScriptedPlayer {
    state: Mutex<PlayerState>,
}

impl ScriptedPlayer {
    /// A player already showing `script`, for session tests that skip `load`.
    pub fn single(script: Script) -> Self {
        let player = Self::default().with_target("", script);
        player.state.lock().unwrap().current = Some(String::new());
        player
    }

    pub fn with_target(self, target: &str, script: Script) -> Self {
        self.state.lock().unwrap().scripts.insert(target.to_string(), script);
        self
    }

    pub fn loads(&self) -> Vec<String> {
        self.state.lock().unwrap().loads.clone()
    }

    pub fn reloads(&self) -> u32 {
        self.state.lock().unwrap().reloads
    }

    pub fn rates(&self) -> Vec<f64> {
        self.state.lock().unwrap().rates.clone()
    }

    pub fn captures(&self) -> u32 {
        self.state.lock().unwrap().captures
    }
}

#[async_trait]
impl FrameProvider for ScriptedPlayer {
    async fn capture_frame(&self) -> Result<Frame, CaptureError> {
        let mut state = self.state.lock().unwrap();
        state.captures += 1;
        let cursor = state.cursor;
        let Some(script) = state.script() else {
            return Err(CaptureError::TargetUnavailable);
        };
        let shot = script
            .shots
            .get(cursor)
            .or_else(|| script.shots.last())
            .cloned()
            .unwrap_or(Shot::Blank);
        state.cursor += 1;
        match shot {
            Shot::Frame(f) => Ok(f),
            Shot::Blank => Err(CaptureError::Blank),
            Shot::Unavailable => Err(CaptureError::TargetUnavailable),
        }
    }
}

#[async_trait]
impl PlaybackProbe for ScriptedPlayer {
    async fn is_playback_ended(&self) -> bool {
        let state = self.state.lock().unwrap();
        state
            .script()
            .is_some_and(|s| s.ends && state.cursor >= s.shots.len())
    }
}

#[async_trait]
impl Player for ScriptedPlayer {
    async fn load(&self, target: &str) -> Result<(), CaptureError> {
        let mut state = self.state.lock().unwrap();
        state.loads.push(target.to_string());
        if !state.scripts.contains_key(target) {
            state.current = None;
            return Err(CaptureError::TargetUnavailable);
        }
        state.current = Some(target.to_string());
        state.cursor = 0;
        Ok(())
    }

    async fn reload(&self) -> Result<(), CaptureError> {
        let mut state = self.state.lock().unwrap();
        state.reloads += 1;
        state.cursor = 0;
        Ok(())
    }

    async fn is_playing(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.script().is_some_and(|s| s.plays)
    }

    async fn error_indicator(&self) -> Option<String> {
        let state = self.state.lock().unwrap();
        let script = state.script()?;
        if state.cursor >= script.shots.len() {
            if let Some(message) = &script.error_at_end {
                return Some(message.clone());
            }
        }
        script.error.clone()
    }

    async fn set_playback_rate(&self, rate: f64) {
        self.state.lock().unwrap().rates.push(rate);
    }
}

#[derive(Debug, Clone)]
pub struct SavedSlide {
    pub frame: Frame,
    pub title: String,
    pub index: u32,
    pub location: PathBuf,
}

/// Keeps every saved slide. Removed slides stay in `saved` and are listed
/// in `removed`.
#[derive(Default)]
pub struct MemorySink {
    saved: Mutex<Vec<SavedSlide>>,
    removed: Mutex<Vec<PathBuf>>,
    failing: Mutex<bool>,
}

impl MemorySink {
    pub fn saved(&self) -> Vec<SavedSlide> {
        self.saved.lock().unwrap().clone()
    }

    pub fn kept(&self) -> Vec<SavedSlide> {
        let removed = self.removed.lock().unwrap();
        self.saved()
            .into_iter()
            .filter(|s| !removed.contains(&s.location))
            .collect()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl SlideSink for MemorySink {
    async fn save_slide(
        &self,
        frame: &Frame,
        _timestamp: DateTime<Local>,
        title: &str,
        index: u32,
    ) -> Result<SlideAck, SinkError> {
        if *self.failing.lock().unwrap() {
            return Err(SinkError::Io(std::io::Error::other("disk full")));
        }
        let mut saved = self.saved.lock().unwrap();
        let location = PathBuf::from(format!("mem/{title}/{}", saved.len()));
        saved.push(SavedSlide {
            frame: frame.clone(),
            title: title.to_string(),
            index,
            location: location.clone(),
        });
        Ok(SlideAck { location })
    }

    async fn load_slide(&self, ack: &SlideAck) -> Result<Frame, SinkError> {
        self.saved
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.location == ack.location)
            .map(|s| s.frame.clone())
            .ok_or_else(|| SinkError::Decode(format!("no slide at {}", ack.location.display())))
    }

    async fn remove_slide(&self, ack: &SlideAck) -> Result<(), SinkError> {
        if *self.failing.lock().unwrap() {
            return Err(SinkError::Io(std::io::Error::other("read-only")));
        }
        self.removed.lock().unwrap().push(ack.location.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingResetter {
    calls: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingResetter {
    pub fn failing() -> Self {
        Self {
            calls: Mutex::default(),
            fail: true,
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressResetter for RecordingResetter {
    async fn reset_remote_progress(&self, id: &str) -> Result<(), ProgressError> {
        self.calls.lock().unwrap().push(id.to_string());
        if self.fail {
            Err(ProgressError::Status(503))
        } else {
            Ok(())
        }
    }
}
