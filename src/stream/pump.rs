//! Per-consumer capture → encode → send loop

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::multipart::create_mjpeg_part;
use crate::config::StreamConfig;
use crate::error::{AppError, Result};
use crate::utils::LogThrottler;
use crate::video::{CaptureSession, EncodedFrame, FrameEncoder};
use crate::warn_throttled;

/// Pause after a failed read before the next attempt
pub const READ_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Why a pump stopped
#[derive(Debug)]
pub enum PumpExit {
    /// The consumer went away (receiver dropped)
    ConsumerGone,
    /// Process shutdown was requested
    Shutdown,
    /// The session can no longer produce frames
    Fatal(AppError),
}

/// Read one frame and encode it, both off the async runtime.
///
/// Dropping the returned future does not interrupt a read already handed to
/// the blocking pool; it completes there and its frame is discarded.
pub async fn capture_jpeg(
    session: Arc<CaptureSession>,
    encoder: Arc<dyn FrameEncoder>,
    quality: u8,
) -> Result<EncodedFrame> {
    let raw = tokio::task::spawn_blocking(move || session.read_frame())
        .await
        .map_err(|e| AppError::Internal(format!("Capture task failed: {}", e)))??;

    tokio::task::spawn_blocking(move || encoder.encode(&raw, quality))
        .await
        .map_err(|e| AppError::Internal(format!("Encode task failed: {}", e)))?
}

/// Drives one consumer's stream.
///
/// Reads from concurrent pumps are serialized by the shared session, so
/// each consumer sees a lower effective rate as more of them connect.
pub struct StreamPump {
    session: Arc<CaptureSession>,
    encoder: Arc<dyn FrameEncoder>,
    config: StreamConfig,
    cancel: CancellationToken,
    label: String,
    throttler: LogThrottler,
}

impl StreamPump {
    pub fn new(
        session: Arc<CaptureSession>,
        encoder: Arc<dyn FrameEncoder>,
        config: StreamConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            encoder,
            config,
            cancel,
            label: String::from("pump"),
            throttler: LogThrottler::default(),
        }
    }

    /// Name used in log lines (usually the client id)
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Run until the consumer disconnects, shutdown is requested or the
    /// session fails for good. Transient read and encode failures never end
    /// the loop.
    pub async fn run(self, tx: mpsc::Sender<Bytes>) -> PumpExit {
        let interval = self.config.frame_interval();
        debug!(
            "[{}] Pump started: {:.2} fps, quality {}",
            self.label, self.config.fps, self.config.quality
        );

        loop {
            let captured = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return PumpExit::Shutdown,
                _ = tx.closed() => return PumpExit::ConsumerGone,
                result = capture_jpeg(
                    self.session.clone(),
                    self.encoder.clone(),
                    self.config.quality,
                ) => result,
            };

            let frame = match captured {
                Ok(frame) => frame,
                Err(e) if e.is_fatal() => return PumpExit::Fatal(e),
                Err(AppError::EncodeFailure(reason)) => {
                    warn_throttled!(
                        self.throttler,
                        "encode",
                        "[{}] Dropping frame, encode failed: {}",
                        self.label,
                        reason
                    );
                    continue;
                }
                Err(e) => {
                    warn_throttled!(
                        self.throttler,
                        "read",
                        "[{}] Frame read failed, retrying: {}",
                        self.label,
                        e
                    );
                    if let Some(exit) = self.idle(READ_RETRY_DELAY, &tx).await {
                        return exit;
                    }
                    continue;
                }
            };

            let part = create_mjpeg_part(&frame.data, frame.content_type());
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return PumpExit::Shutdown,
                sent = tx.send(part) => {
                    if sent.is_err() {
                        return PumpExit::ConsumerGone;
                    }
                }
            }
            trace!("[{}] Sent frame #{} ({} bytes)", self.label, frame.sequence, frame.len());

            if let Some(exit) = self.idle(interval, &tx).await {
                return exit;
            }
        }
    }

    /// Sleep unless the pump is told to stop first
    async fn idle(&self, duration: Duration, tx: &mpsc::Sender<Bytes>) -> Option<PumpExit> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Some(PumpExit::Shutdown),
            _ = tx.closed() => Some(PumpExit::ConsumerGone),
            _ = tokio::time::sleep(duration) => None,
        }
    }
}
