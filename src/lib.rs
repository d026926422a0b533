//! camrelay - relay a local UVC camera as an MJPEG stream over HTTP
//!
//! One capture session is opened at startup and shared by every
//! `multipart/x-mixed-replace` consumer; each consumer runs its own
//! read → encode → send → pace loop against it.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod state;
pub mod stream;
pub mod utils;
pub mod video;
pub mod web;

pub use error::{AppError, Result};
