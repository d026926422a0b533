use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Capture device settings
    pub video: VideoConfig,
    /// Per-consumer stream settings
    pub stream: StreamConfig,
    /// Web server settings
    pub web: WebConfig,
}

impl AppConfig {
    /// Check every section; the first invalid value wins
    pub fn validate(&self) -> Result<()> {
        self.video.validate()?;
        self.stream.validate()?;
        self.web.resolve_bind_addresses()?;
        Ok(())
    }
}

/// Video capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoConfig {
    /// Pinned device path (e.g., /dev/video0); probe `device_dir` when unset
    pub device: Option<PathBuf>,
    /// Directory scanned for `video*` nodes
    pub device_dir: PathBuf,
    /// Number of driver buffers to request
    pub buffer_depth: u32,
    /// Upper bound for a single blocking frame read
    pub read_timeout_ms: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            device: None,
            device_dir: PathBuf::from("/dev"),
            buffer_depth: 1,
            read_timeout_ms: 2000,
        }
    }
}

impl VideoConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.buffer_depth < 1 {
            return Err(AppError::Config(
                "buffer size must be at least 1".to_string(),
            ));
        }
        if self.read_timeout_ms == 0 {
            return Err(AppError::Config(
                "read timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-consumer stream configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// Target frames per second for each consumer
    pub fps: f64,
    /// JPEG quality (1-100)
    pub quality: u8,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            fps: 25.0,
            quality: 30,
        }
    }
}

impl StreamConfig {
    pub fn new(fps: f64, quality: u8) -> Result<Self> {
        let config = Self { fps, quality };
        config.validate()?;
        Ok(config)
    }

    /// Pacing sleep between emitted frames
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps)
    }

    fn validate(&self) -> Result<()> {
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(AppError::Config(format!(
                "fps must be a positive number, got {}",
                self.fps
            )));
        }
        // Guards Duration::from_secs_f64 against sub-nanosecond intervals
        if self.fps > 1000.0 {
            return Err(AppError::Config(format!(
                "fps must not exceed 1000, got {}",
                self.fps
            )));
        }
        if !(1..=100).contains(&self.quality) {
            return Err(AppError::Config(format!(
                "quality must be within 1..=100, got {}",
                self.quality
            )));
        }
        Ok(())
    }
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebConfig {
    /// HTTP port
    pub http_port: u16,
    /// Bind addresses
    pub bind_addresses: Vec<String>,
    /// How long open streams get to finish once shutdown starts
    pub drain_timeout_secs: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            bind_addresses: vec!["0.0.0.0".to_string()],
            drain_timeout_secs: 5,
        }
    }
}

impl WebConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    /// Parse bind addresses, dropping duplicates and keeping order
    pub fn resolve_bind_addresses(&self) -> Result<Vec<IpAddr>> {
        let mut seen = HashSet::new();
        let mut addrs = Vec::new();
        for addr in &self.bind_addresses {
            let ip: IpAddr = addr
                .parse()
                .map_err(|_| AppError::Config(format!("Invalid bind address: {}", addr)))?;
            if seen.insert(ip) {
                addrs.push(ip);
            }
        }

        if addrs.is_empty() {
            return Err(AppError::Config("no bind address configured".to_string()));
        }
        Ok(addrs)
    }
}
