use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use image::{ImageFormat, RgbaImage};
use slidewatch_common::frame::Frame;
use tracing::{debug, warn};

use crate::db::{NewSlide, SlideDb};
use crate::ports::{SinkError, SlideAck, SlideSink};
use crate::recorder::keys::slide_key;

/// Writes committed slides as PNG files under a root directory, optionally
/// recording each one in the SQLite slide index.
pub struct DirectorySink {
    root: PathBuf,
    db: Option<Arc<SlideDb>>,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>, db: Option<Arc<SlideDb>>) -> Self {
        Self {
            root: root.into(),
            db,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn encode_png(frame: &Frame) -> Result<Vec<u8>, SinkError> {
    let image = RgbaImage::from_raw(frame.width(), frame.height(), frame.data().to_vec())
        .ok_or_else(|| SinkError::Encode("buffer does not match dimensions".into()))?;
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| SinkError::Encode(e.to_string()))?;
    Ok(buf.into_inner())
}

fn decode_png(path: &Path) -> Result<Frame, SinkError> {
    let image = image::open(path)
        .map_err(|e| SinkError::Decode(format!("{}: {e}", path.display())))?
        .to_rgba8();
    let (width, height) = image.dimensions();
    Frame::new(width, height, image.into_raw(), 0).map_err(|e| SinkError::Decode(e.to_string()))
}

#[async_trait]
impl SlideSink for DirectorySink {
    async fn save_slide(
        &self,
        frame: &Frame,
        timestamp: DateTime<Local>,
        title: &str,
        index: u32,
    ) -> Result<SlideAck, SinkError> {
        let key = slide_key(title, &timestamp, index);
        let path = self.root.join(&key);
        let png = encode_png(frame)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &png).await?;
        debug!(path = path.display().to_string(), bytes = png.len(), "slide written");

        if let Some(db) = &self.db {
            let record = NewSlide {
                title,
                index,
                captured_at_ms: timestamp.timestamp_millis(),
                path: &key,
                width: frame.width(),
                height: frame.height(),
            };
            if let Err(e) = db.insert_slide(&record) {
                // The PNG is already on disk; a missing index row is recoverable.
                warn!(error = %e, path = key, "failed to index slide");
            }
        }

        Ok(SlideAck { location: path })
    }

    async fn load_slide(&self, ack: &SlideAck) -> Result<Frame, SinkError> {
        let path = ack.location.clone();
        tokio::task::spawn_blocking(move || decode_png(&path))
            .await
            .map_err(|e| SinkError::Decode(e.to_string()))?
    }

    async fn remove_slide(&self, ack: &SlideAck) -> Result<(), SinkError> {
        tokio::fs::remove_file(&ack.location).await?;
        debug!(path = ack.location.display().to_string(), "slide removed");

        if let Some(db) = &self.db {
            let key = ack
                .location
                .strip_prefix(&self.root)
                .unwrap_or(&ack.location)
                .to_string_lossy()
                .into_owned();
            if let Err(e) = db.delete_by_path(&key) {
                warn!(error = %e, path = key, "failed to drop slide from index");
            }
        }
        Ok(())
    }
}
