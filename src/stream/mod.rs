//! MJPEG streaming over HTTP
//!
//! # Components
//!
//! - `StreamPump` - per-consumer read, encode, send and pace loop
//! - `StreamPublisher` - turns a pump into a lazily polled response body
//! - `ClientRegistry` - connected consumers and their statistics
//! - `multipart` - part framing and a reader for it

pub mod clients;
pub mod multipart;
pub mod publisher;
pub mod pump;

pub use clients::{ClientGuard, ClientRegistry, ClientStats};
pub use multipart::{create_mjpeg_part, MultipartPart, MultipartReader};
pub use publisher::StreamPublisher;
pub use pump::{capture_jpeg, PumpExit, StreamPump};
