//! Raw frame data structure

use bytes::Bytes;

use super::format::{PixelFormat, Resolution};

/// One buffer read from the capture device.
///
/// Owned by the pump iteration that read it and dropped after encoding.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Frame bytes as delivered by the driver
    data: Bytes,
    /// Frame resolution
    pub resolution: Resolution,
    /// Pixel format
    pub format: PixelFormat,
    /// Stride (bytes per line, 0 for compressed formats)
    pub stride: u32,
    /// Driver sequence number
    pub sequence: u64,
}

impl RawFrame {
    pub fn new(
        data: Bytes,
        resolution: Resolution,
        format: PixelFormat,
        stride: u32,
        sequence: u64,
    ) -> Self {
        Self {
            data,
            resolution,
            format,
            stride,
            sequence,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row stride, falling back to the packed width for drivers reporting 0
    pub fn effective_stride(&self) -> usize {
        if self.stride > 0 {
            return self.stride as usize;
        }
        self.format
            .bytes_per_pixel()
            .map(|bpp| self.resolution.width as usize * bpp)
            .unwrap_or(0)
    }

    /// Check JPEG start-of-image marker (compressed formats only)
    pub fn has_jpeg_header(&self) -> bool {
        self.format.is_compressed() && self.data.starts_with(&[0xFF, 0xD8])
    }
}
