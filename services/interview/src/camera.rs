use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use interview_core::services::Camera;
use interview_core::types::EncodedFrame;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Serves the JPEG files of a directory as webcam frames, in name order, looping.
pub struct ImageDirCamera {
    dir: PathBuf,
    frames: Mutex<Vec<PathBuf>>,
    next: AtomicUsize,
}

impl ImageDirCamera {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            frames: Mutex::new(Vec::new()),
            next: AtomicUsize::new(0),
        }
    }
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
}

#[async_trait]
impl Camera for ImageDirCamera {
    async fn acquire(&self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to open frames directory: {}", self.dir.display()))?;
        let mut frames = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file() && is_jpeg(&path) {
                frames.push(path);
            }
        }
        if frames.is_empty() {
            bail!("No JPEG frames in {}", self.dir.display());
        }
        frames.sort();
        tracing::info!("Camera serving {} frames from {}", frames.len(), self.dir.display());

        *self.frames.lock().unwrap_or_else(PoisonError::into_inner) = frames;
        self.next.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn capture(&self) -> Result<EncodedFrame> {
        let path = {
            let frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
            if frames.is_empty() {
                bail!("Camera was not acquired");
            }
            let index = self.next.fetch_add(1, Ordering::SeqCst) % frames.len();
            frames[index].clone()
        };
        let data = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read frame {}", path.display()))?;
        Ok(EncodedFrame::jpeg(data))
    }
}
