//! Capture device discovery

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use super::capture::{CaptureSession, FrameSource, V4l2FrameSource, DEFAULT_READ_TIMEOUT};
use crate::error::{AppError, Result};

/// Opens one candidate device with the requested buffer depth
pub trait DeviceOpener: Send + Sync {
    fn open(&self, path: &Path, buffer_depth: u32) -> Result<Box<dyn FrameSource>>;
}

/// Opens V4L2 nodes as memory-mapped capture streams
#[derive(Debug, Clone)]
pub struct V4l2Opener {
    read_timeout: Duration,
}

impl V4l2Opener {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }
}

impl Default for V4l2Opener {
    fn default() -> Self {
        Self::new(DEFAULT_READ_TIMEOUT)
    }
}

impl DeviceOpener for V4l2Opener {
    fn open(&self, path: &Path, buffer_depth: u32) -> Result<Box<dyn FrameSource>> {
        let source = V4l2FrameSource::open(path, buffer_depth, self.read_timeout)?;
        Ok(Box::new(source))
    }
}

/// List `video*` nodes under `dir`, sorted by path
pub fn enumerate_device_paths(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir).map_err(|e| {
        AppError::DeviceNotFound(format!("Failed to read {}: {}", dir.display(), e))
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("video"))
        })
        .collect();
    paths.sort();

    debug!("Found {} video nodes under {}", paths.len(), dir.display());
    Ok(paths)
}

/// Probes candidates in order and keeps the first one that opens
pub struct DeviceLocator<O = V4l2Opener> {
    opener: O,
}

impl<O: DeviceOpener> DeviceLocator<O> {
    pub fn new(opener: O) -> Self {
        Self { opener }
    }

    /// Open the first usable device.
    ///
    /// Candidates after the first success are never touched.
    pub fn find(&self, candidates: &[PathBuf], buffer_depth: u32) -> Result<CaptureSession> {
        for path in candidates {
            match self.opener.open(path, buffer_depth) {
                Ok(source) => {
                    info!("Using capture device {}", path.display());
                    return Ok(CaptureSession::new(path, buffer_depth, source));
                }
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                }
            }
        }

        Err(AppError::DeviceNotFound(format!(
            "none of {} candidate(s) could be opened",
            candidates.len()
        )))
    }
}
