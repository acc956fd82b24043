use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use slidewatch_common::frame::Frame;
use slidewatch_engine::ports::{CaptureError, FrameProvider, PlaybackProbe, Player};
use tracing::{debug, info, warn};

const EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

#[derive(Default)]
struct ReplayState {
    dir: Option<PathBuf>,
    files: Vec<PathBuf>,
    cursor: usize,
    stride: usize,
    last_error: Option<String>,
}

/// Plays back a directory of still images, one file per capture, in file
/// name order. Playback ends once every file was served.
#[derive(Default)]
pub struct ReplaySurface {
    state: Mutex<ReplayState>,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

async fn list_images(dir: &Path) -> Result<Vec<PathBuf>, CaptureError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|_| CaptureError::TargetUnavailable)?;
    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| CaptureError::Provider(e.to_string()))?
    {
        let path = entry.path();
        if is_image(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn decode(path: &Path) -> Result<Frame, CaptureError> {
    let image = image::open(path)
        .map_err(|e| CaptureError::Provider(format!("{}: {e}", path.display())))?
        .to_rgba8();
    let (width, height) = image.dimensions();
    Frame::new(width, height, image.into_raw(), chrono::Utc::now().timestamp_millis())
        .map_err(|e| CaptureError::Provider(e.to_string()))
}

impl ReplaySurface {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ReplayState>, CaptureError> {
        self.state
            .lock()
            .map_err(|_| CaptureError::Provider("replay state poisoned".into()))
    }

    async fn open(&self, dir: PathBuf) -> Result<(), CaptureError> {
        let listed = list_images(&dir).await;
        let mut state = self.lock()?;
        state.cursor = 0;
        state.last_error = None;
        state.stride = state.stride.max(1);
        match listed {
            Ok(files) => {
                info!(dir = dir.display().to_string(), files = files.len(), "replay target loaded");
                state.files = files;
                state.dir = Some(dir);
                Ok(())
            }
            Err(e) => {
                state.files.clear();
                state.dir = None;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl FrameProvider for ReplaySurface {
    async fn capture_frame(&self) -> Result<Frame, CaptureError> {
        let path = {
            let mut state = self.lock()?;
            if state.dir.is_none() {
                return Err(CaptureError::TargetUnavailable);
            }
            let Some(path) = state.files.get(state.cursor).cloned() else {
                return Err(CaptureError::Blank);
            };
            state.cursor += state.stride.max(1);
            path
        };

        let decoded = tokio::task::spawn_blocking({
            let path = path.clone();
            move || decode(&path)
        })
        .await
        .map_err(|e| CaptureError::Provider(e.to_string()))?;

        match decoded {
            Ok(frame) => {
                debug!(file = path.display().to_string(), "replayed frame");
                Ok(frame)
            }
            Err(e) => {
                warn!(error = %e, "failed to decode replay frame");
                self.lock()?.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }
}

#[async_trait]
impl PlaybackProbe for ReplaySurface {
    async fn is_playback_ended(&self) -> bool {
        self.lock()
            .map(|s| s.dir.is_some() && s.cursor >= s.files.len())
            .unwrap_or(true)
    }
}

#[async_trait]
impl Player for ReplaySurface {
    async fn load(&self, target: &str) -> Result<(), CaptureError> {
        self.open(PathBuf::from(target)).await
    }

    async fn reload(&self) -> Result<(), CaptureError> {
        let dir = self.lock()?.dir.clone();
        match dir {
            Some(dir) => self.open(dir).await,
            None => Err(CaptureError::TargetUnavailable),
        }
    }

    async fn is_playing(&self) -> bool {
        self.lock().map(|s| !s.files.is_empty()).unwrap_or(false)
    }

    async fn error_indicator(&self) -> Option<String> {
        self.lock().ok().and_then(|s| s.last_error.clone())
    }

    /// Whole-number rates above 1 skip files.
    async fn set_playback_rate(&self, rate: f64) {
        if let Ok(mut state) = self.lock() {
            state.stride = if rate.is_finite() && rate > 1.0 {
                rate.floor() as usize
            } else {
                1
            };
            debug!(rate, stride = state.stride, "playback rate set");
        }
    }
}
