//! Video capture and encoding
//!
//! Device discovery, the shared capture session and the still-image encoder
//! feeding every stream pump.

pub mod capture;
pub mod convert;
pub mod device;
pub mod encoder;
pub mod format;
pub mod frame;

pub use capture::{CaptureInfo, CaptureSession, FrameSource, V4l2FrameSource};
pub use convert::Yuv420pBuffer;
pub use device::{enumerate_device_paths, DeviceLocator, DeviceOpener, V4l2Opener};
pub use encoder::{EncodedFrame, FrameEncoder, JpegEncoder};
pub use format::{PixelFormat, Resolution};
pub use frame::RawFrame;
