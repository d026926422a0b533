//! Capture session and the V4L2 frame source behind it
//!
//! A [`CaptureSession`] owns the one open device handle of the process.
//! Reads from concurrent consumers are serialized by the session mutex;
//! release is idempotent and may race with a pending read.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::Format;

use super::format::{PixelFormat, Resolution};
use super::frame::RawFrame;
use crate::error::{AppError, Result};

/// Default device read timeout
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);
/// Minimum valid frame size (bytes)
const MIN_FRAME_SIZE: usize = 128;

/// A device that yields raw frames.
///
/// Dropping the source releases the underlying handle.
pub trait FrameSource: Send {
    /// Block until the next frame is available or the read times out
    fn read_frame(&mut self) -> Result<RawFrame>;

    /// Negotiated capture format, if known
    fn negotiated(&self) -> Option<(PixelFormat, Resolution)> {
        None
    }
}

/// Static description of an open session
#[derive(Debug, Clone, Serialize)]
pub struct CaptureInfo {
    pub device: PathBuf,
    pub format: Option<PixelFormat>,
    pub resolution: Option<Resolution>,
    pub buffer_depth: u32,
}

/// Exclusive owner of the open capture device
pub struct CaptureSession {
    info: CaptureInfo,
    source: Mutex<Option<Box<dyn FrameSource>>>,
    released: AtomicBool,
}

impl CaptureSession {
    pub fn new(device: impl AsRef<Path>, buffer_depth: u32, source: Box<dyn FrameSource>) -> Self {
        let negotiated = source.negotiated();
        Self {
            info: CaptureInfo {
                device: device.as_ref().to_path_buf(),
                format: negotiated.map(|(format, _)| format),
                resolution: negotiated.map(|(_, resolution)| resolution),
                buffer_depth,
            },
            source: Mutex::new(Some(source)),
            released: AtomicBool::new(false),
        }
    }

    pub fn info(&self) -> &CaptureInfo {
        &self.info
    }

    pub fn device(&self) -> &Path {
        &self.info.device
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Read the next raw frame.
    ///
    /// Blocks for at most the device read timeout plus the time other
    /// callers hold the device.
    pub fn read_frame(&self) -> Result<RawFrame> {
        if self.is_released() {
            return Err(AppError::SessionReleased);
        }

        let mut guard = self.source.lock();
        // Release may have been flagged while this caller queued on the lock
        if self.is_released() {
            return Err(AppError::SessionReleased);
        }
        let source = guard.as_mut().ok_or(AppError::SessionReleased)?;
        source.read_frame()
    }

    /// Release the device handle.
    ///
    /// Returns `true` for the call that actually released it; every later
    /// call is a no-op returning `false`. Waits for an in-flight read to
    /// return before dropping the handle.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            debug!("Capture session {:?} already released", self.info.device);
            return false;
        }

        let source = self.source.lock().take();
        drop(source);
        info!("Released capture device {}", self.info.device.display());
        true
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("info", &self.info)
            .field("released", &self.is_released())
            .finish()
    }
}

/// V4L2 capture source backed by memory-mapped buffers
pub struct V4l2FrameSource {
    path: PathBuf,
    stream: MmapStream<'static>,
    resolution: Resolution,
    format: PixelFormat,
    stride: u32,
}

impl V4l2FrameSource {
    /// Open a device, negotiate an encodable pixel format and request
    /// `buffer_count` capture buffers.
    pub fn open(path: impl AsRef<Path>, buffer_count: u32, timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let open_err = |reason: String| AppError::DeviceOpen {
            device: path.display().to_string(),
            reason,
        };

        debug!("Opening video device: {:?}", path);
        let device = Device::with_path(&path).map_err(|e| open_err(e.to_string()))?;

        let caps = device
            .query_caps()
            .map_err(|e| open_err(format!("Failed to query capabilities: {}", e)))?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(open_err("not a video capture device".to_string()));
        }

        let (fmt, format) = negotiate_format(&device).map_err(open_err)?;
        let resolution = Resolution::new(fmt.width, fmt.height);

        let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, buffer_count.max(1))
            .map_err(|e| open_err(format!("Failed to request {} buffers: {}", buffer_count, e)))?;
        stream.set_timeout(timeout);

        info!(
            "Opened camera at {}: {} ({}) {} {} stride={}",
            path.display(),
            caps.card,
            caps.driver,
            resolution,
            format,
            fmt.stride
        );

        Ok(Self {
            path,
            stream,
            resolution,
            format,
            stride: fmt.stride,
        })
    }
}

impl FrameSource for V4l2FrameSource {
    fn read_frame(&mut self) -> Result<RawFrame> {
        let (buf, meta) = CaptureStream::next(&mut self.stream)
            .map_err(|e| classify_read_error(&self.path, e))?;

        // Use actual bytes used, not buffer size
        let used = match meta.bytesused as usize {
            0 => buf.len(),
            n => n.min(buf.len()),
        };
        if used < MIN_FRAME_SIZE {
            return Err(AppError::ReadFailure(format!(
                "short frame: {} bytes (bytesused={})",
                used, meta.bytesused
            )));
        }

        Ok(RawFrame::new(
            Bytes::copy_from_slice(&buf[..used]),
            self.resolution,
            self.format,
            self.stride,
            meta.sequence as u64,
        ))
    }

    fn negotiated(&self) -> Option<(PixelFormat, Resolution)> {
        Some((self.format, self.resolution))
    }
}

impl Drop for V4l2FrameSource {
    fn drop(&mut self) {
        debug!("Closing capture stream on {:?}", self.path);
    }
}

/// Keep the device's current format when encodable, else try the preferred ones
fn negotiate_format(device: &Device) -> std::result::Result<(Format, PixelFormat), String> {
    let current = device
        .format()
        .map_err(|e| format!("Failed to get format: {}", e))?;
    if let Some(format) = PixelFormat::from_fourcc(current.fourcc) {
        return Ok((current, format));
    }

    for candidate in PixelFormat::negotiation_order() {
        let requested = Format::new(current.width, current.height, candidate.to_fourcc());
        match device.set_format(&requested) {
            Ok(actual) => {
                if let Some(format) = PixelFormat::from_fourcc(actual.fourcc) {
                    return Ok((actual, format));
                }
            }
            Err(e) => debug!("Device rejected {}: {}", candidate, e),
        }
    }

    Err(format!(
        "no encodable pixel format (device offers {})",
        current.fourcc
    ))
}

/// Map an ioctl error to a transient read failure or a lost device
fn classify_read_error(path: &Path, err: io::Error) -> AppError {
    if err.kind() == io::ErrorKind::TimedOut {
        return AppError::ReadFailure("capture timeout - no signal?".to_string());
    }

    let is_device_lost = matches!(
        err.raw_os_error(),
        Some(6)     // ENXIO - No such device or address
        | Some(19)  // ENODEV - No such device
        | Some(5)   // EIO - I/O error (device removed)
        | Some(32)  // EPIPE - Broken pipe
        | Some(108) // ESHUTDOWN - Transport endpoint shutdown
    );

    if is_device_lost {
        warn!("Video device lost: {} - {}", path.display(), err);
        return AppError::DeviceLost {
            device: path.display().to_string(),
            reason: err.to_string(),
        };
    }

    AppError::ReadFailure(err.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::sync::Arc;

    /// Scripted source: pops one outcome per read, repeats the last when empty
    pub(crate) struct ScriptedSource {
        pub outcomes: VecDeque<std::result::Result<u64, &'static str>>,
        pub drops: Arc<AtomicUsize>,
        pub reads: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        pub fn new(outcomes: Vec<std::result::Result<u64, &'static str>>) -> Self {
            Self {
                outcomes: outcomes.into(),
                drops: Arc::new(AtomicUsize::new(0)),
                reads: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    pub(crate) fn test_frame(sequence: u64) -> RawFrame {
        RawFrame::new(
            Bytes::from(vec![sequence as u8; 12]),
            Resolution::new(2, 2),
            PixelFormat::Rgb24,
            6,
            sequence,
        )
    }

    impl FrameSource for ScriptedSource {
        fn read_frame(&mut self) -> Result<RawFrame> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let outcome = if self.outcomes.len() > 1 {
                self.outcomes.pop_front()
            } else {
                self.outcomes.front().cloned()
            };
            match outcome {
                Some(Ok(sequence)) => Ok(test_frame(sequence)),
                Some(Err(reason)) => Err(AppError::ReadFailure(reason.to_string())),
                None => Err(AppError::ReadFailure("script empty".to_string())),
            }
        }
    }

    impl Drop for ScriptedSource {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Source whose read blocks until the test lets it go
    struct GatedSource {
        entered: mpsc::Sender<()>,
        gate: mpsc::Receiver<()>,
        drops: Arc<AtomicUsize>,
        reads: Arc<AtomicUsize>,
    }

    impl FrameSource for GatedSource {
        fn read_frame(&mut self) -> Result<RawFrame> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let _ = self.entered.send(());
            let _ = self.gate.recv();
            Ok(test_frame(1))
        }
    }

    impl Drop for GatedSource {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_release_is_idempotent() {
        let source = ScriptedSource::new(vec![Ok(1)]);
        let drops = source.drops.clone();
        let session = CaptureSession::new("/dev/video0", 1, Box::new(source));

        assert!(session.read_frame().is_ok());
        assert!(session.release());
        assert!(!session.release());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(matches!(session.read_frame(), Err(AppError::SessionReleased)));
    }

    #[test]
    fn test_release_during_pending_read() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let drops = Arc::new(AtomicUsize::new(0));
        let session = Arc::new(CaptureSession::new(
            "/dev/video0",
            1,
            Box::new(GatedSource {
                entered: entered_tx,
                gate: gate_rx,
                drops: drops.clone(),
                reads: Arc::new(AtomicUsize::new(0)),
            }),
        ));

        let reader = {
            let session = session.clone();
            std::thread::spawn(move || session.read_frame())
        };
        entered_rx.recv().unwrap();

        let releaser = {
            let session = session.clone();
            std::thread::spawn(move || session.release())
        };

        // Release is flagged immediately even though the read holds the device
        while !session.is_released() {
            std::thread::yield_now();
        }
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        gate_tx.send(()).unwrap();
        assert!(reader.join().unwrap().is_ok());
        assert!(releaser.join().unwrap());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(!session.release());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_queued_read_fails_after_release() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let drops = Arc::new(AtomicUsize::new(0));
        let reads = Arc::new(AtomicUsize::new(0));
        let session = Arc::new(CaptureSession::new(
            "/dev/video0",
            1,
            Box::new(GatedSource {
                entered: entered_tx,
                gate: gate_rx,
                drops: drops.clone(),
                reads: reads.clone(),
            }),
        ));

        let first = {
            let session = session.clone();
            std::thread::spawn(move || session.read_frame())
        };
        entered_rx.recv().unwrap();

        // Second reader passes the released check and waits on the device lock
        let queued = {
            let session = session.clone();
            std::thread::spawn(move || session.read_frame())
        };
        std::thread::sleep(Duration::from_millis(50));

        let releaser = {
            let session = session.clone();
            std::thread::spawn(move || session.release())
        };
        while !session.is_released() {
            std::thread::yield_now();
        }

        gate_tx.send(()).unwrap();
        assert!(first.join().unwrap().is_ok());
        assert!(matches!(
            queued.join().unwrap(),
            Err(AppError::SessionReleased)
        ));
        assert!(releaser.join().unwrap());
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reads_are_serialized() {
        let source = ScriptedSource::new(vec![Ok(1)]);
        let reads = source.reads.clone();
        let session = Arc::new(CaptureSession::new("/dev/video0", 1, Box::new(source)));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let session = session.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        session.read_frame().unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(reads.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_classify_read_error() {
        let path = Path::new("/dev/video0");
        let timeout = io::Error::new(io::ErrorKind::TimedOut, "VIDIOC_DQBUF");
        assert!(matches!(
            classify_read_error(path, timeout),
            AppError::ReadFailure(_)
        ));

        let gone = io::Error::from_raw_os_error(19);
        assert!(matches!(
            classify_read_error(path, gone),
            AppError::DeviceLost { .. }
        ));

        let busy = io::Error::from_raw_os_error(16);
        assert!(matches!(
            classify_read_error(path, busy),
            AppError::ReadFailure(_)
        ));
    }
}
