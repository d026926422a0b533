//! Still-image encoding for the MJPEG stream

pub mod jpeg;
pub mod traits;

pub use jpeg::JpegEncoder;
pub use traits::{EncodedFormat, EncodedFrame, FrameEncoder};
