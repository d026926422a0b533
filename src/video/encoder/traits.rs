//! Encoder traits and common types

use bytes::Bytes;

use crate::error::Result;
use crate::video::format::Resolution;
use crate::video::frame::RawFrame;

/// Encoded frame output
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Encoded data
    pub data: Bytes,
    /// Output format
    pub format: EncodedFormat,
    /// Resolution
    pub resolution: Resolution,
    /// Sequence number of the raw frame this was encoded from
    pub sequence: u64,
}

impl EncodedFrame {
    pub fn jpeg(data: Bytes, resolution: Resolution, sequence: u64) -> Self {
        Self {
            data,
            format: EncodedFormat::Jpeg,
            resolution,
            sequence,
        }
    }

    /// MIME type announced in the multipart part header
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Encoded output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodedFormat {
    Jpeg,
}

impl EncodedFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            EncodedFormat::Jpeg => "image/jpeg",
        }
    }
}

impl std::fmt::Display for EncodedFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodedFormat::Jpeg => write!(f, "JPEG"),
        }
    }
}

/// Still-image encoder for raw capture frames.
///
/// Implementations hold no per-call mutable state, so one instance is shared
/// by every consumer's pump.
pub trait FrameEncoder: Send + Sync {
    /// Get encoder name
    fn name(&self) -> &str;

    /// Encode a raw frame at the given quality (1-100)
    fn encode(&self, frame: &RawFrame, quality: u8) -> Result<EncodedFrame>;
}
