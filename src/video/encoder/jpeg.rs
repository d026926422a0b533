//! JPEG encoder implementation
//!
//! Encodes raw capture frames (MJPEG, YUYV/YVYU/UYVY, RGB24, BGR24) with
//! turbojpeg. Packed 4:2:2 input is converted to I420 first and compressed
//! with turbojpeg's YUV encoder (skips internal color conversion). MJPEG input
//! is decoded and re-encoded so the configured quality always applies.

use bytes::Bytes;
use turbojpeg::{Compressor, Decompressor, Image, PixelFormat as TJPixelFormat, Subsamp, YuvImage};

use super::traits::{EncodedFrame, FrameEncoder};
use crate::error::{AppError, Result};
use crate::video::convert::{packed422_to_yuv420p, Yuv420pBuffer};
use crate::video::format::{PixelFormat, Resolution};
use crate::video::frame::RawFrame;

/// JPEG encoder using turbojpeg
///
/// ```text
/// YUYV/YVYU/UYVY ──convert──> I420 ──turbojpeg──> JPEG
/// RGB24/BGR24 ──────────────────────turbojpeg──> JPEG
/// MJPEG ──turbojpeg decode──> RGB24 ──turbojpeg──> JPEG
/// ```
///
/// turbojpeg handles are not thread-safe, so a compressor is created per call
/// and the encoder itself stays shareable.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegEncoder;

impl JpegEncoder {
    /// Create a new JPEG encoder (4:2:0 chroma subsampling)
    pub fn new() -> Self {
        Self
    }

    fn compressor(&self, quality: u8) -> Result<Compressor> {
        let mut compressor = Compressor::new().map_err(|e| {
            AppError::EncodeFailure(format!("Failed to create turbojpeg compressor: {}", e))
        })?;

        compressor
            .set_quality(quality.clamp(1, 100) as i32)
            .map_err(|e| AppError::EncodeFailure(format!("Failed to set JPEG quality: {}", e)))?;
        compressor
            .set_subsamp(Subsamp::Sub2x2)
            .map_err(|e| AppError::EncodeFailure(format!("Failed to set subsampling: {}", e)))?;

        Ok(compressor)
    }

    /// Encode a packed 4:2:2 frame via an I420 intermediate
    fn encode_packed422(&self, frame: &RawFrame, quality: u8) -> Result<Vec<u8>> {
        let mut i420 = Yuv420pBuffer::new(frame.resolution);
        packed422_to_yuv420p(frame.data(), frame.effective_stride(), frame.format, &mut i420)?;

        let yuv_image = YuvImage {
            pixels: i420.as_bytes(),
            width: frame.resolution.width as usize,
            height: frame.resolution.height as usize,
            align: 1,
            subsamp: Subsamp::Sub2x2,
        };

        self.compressor(quality)?
            .compress_yuv_to_vec(yuv_image)
            .map_err(|e| AppError::EncodeFailure(format!("JPEG compression failed: {}", e)))
    }

    /// Encode a 3-byte-per-pixel frame
    fn encode_rgb(&self, frame: &RawFrame, quality: u8, format: TJPixelFormat) -> Result<Vec<u8>> {
        let width = frame.resolution.width as usize;
        let height = frame.resolution.height as usize;
        let pitch = frame.effective_stride();
        let expected_size = pitch * height;

        if pitch < width * 3 || frame.len() < expected_size {
            return Err(AppError::EncodeFailure(format!(
                "{} data too small: {} < {}",
                frame.format,
                frame.len(),
                expected_size
            )));
        }

        let image = Image {
            pixels: &frame.data()[..expected_size],
            width,
            pitch,
            height,
            format,
        };

        self.compressor(quality)?
            .compress_to_vec(image)
            .map_err(|e| AppError::EncodeFailure(format!("JPEG compression failed: {}", e)))
    }

    /// Decode an MJPEG frame and re-encode it at the requested quality
    fn reencode_jpeg(&self, frame: &RawFrame, quality: u8) -> Result<(Vec<u8>, Resolution)> {
        if !frame.has_jpeg_header() {
            return Err(AppError::EncodeFailure(format!(
                "{} frame #{} has no JPEG start-of-image marker",
                frame.format, frame.sequence
            )));
        }

        let mut decompressor = Decompressor::new().map_err(|e| {
            AppError::EncodeFailure(format!("Failed to create turbojpeg decoder: {}", e))
        })?;

        let header = decompressor
            .read_header(frame.data())
            .map_err(|e| AppError::EncodeFailure(format!("turbojpeg read_header failed: {}", e)))?;

        let pitch = header.width * 3;
        let mut image = Image {
            pixels: vec![0u8; header.height * pitch],
            width: header.width,
            pitch,
            height: header.height,
            format: TJPixelFormat::RGB,
        };

        decompressor
            .decompress(frame.data(), image.as_deref_mut())
            .map_err(|e| AppError::EncodeFailure(format!("turbojpeg decode failed: {}", e)))?;

        let jpeg = self
            .compressor(quality)?
            .compress_to_vec(image.as_deref())
            .map_err(|e| AppError::EncodeFailure(format!("JPEG compression failed: {}", e)))?;

        Ok((jpeg, Resolution::new(header.width as u32, header.height as u32)))
    }
}

impl FrameEncoder for JpegEncoder {
    fn name(&self) -> &str {
        "JPEG (turbojpeg)"
    }

    fn encode(&self, frame: &RawFrame, quality: u8) -> Result<EncodedFrame> {
        if frame.is_empty() {
            return Err(AppError::EncodeFailure("empty frame".to_string()));
        }

        let (data, resolution) = match frame.format {
            PixelFormat::Mjpeg | PixelFormat::Jpeg => self.reencode_jpeg(frame, quality)?,
            PixelFormat::Yuyv | PixelFormat::Yvyu | PixelFormat::Uyvy => {
                (self.encode_packed422(frame, quality)?, frame.resolution)
            }
            PixelFormat::Rgb24 => (
                self.encode_rgb(frame, quality, TJPixelFormat::RGB)?,
                frame.resolution,
            ),
            PixelFormat::Bgr24 => (
                self.encode_rgb(frame, quality, TJPixelFormat::BGR)?,
                frame.resolution,
            ),
        };

        Ok(EncodedFrame::jpeg(Bytes::from(data), resolution, frame.sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Gradient with deterministic noise so quality changes the output size
    fn synthetic_rgb(width: u32, height: u32) -> Vec<u8> {
        let mut seed = 0x2545_f491_u32;
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                let noise = (seed >> 24) as u8 / 4;
                pixels.push(((x * 255 / width) as u8).wrapping_add(noise));
                pixels.push(((y * 255 / height) as u8).wrapping_add(noise));
                pixels.push((((x + y) * 127 / (width + height)) as u8).wrapping_add(noise));
            }
        }
        pixels
    }

    fn rgb_frame(width: u32, height: u32) -> RawFrame {
        RawFrame::new(
            Bytes::from(synthetic_rgb(width, height)),
            Resolution::new(width, height),
            PixelFormat::Rgb24,
            width * 3,
            1,
        )
    }

    fn decoded_size(jpeg: &[u8]) -> (usize, usize) {
        let header = turbojpeg::read_header(jpeg).unwrap();
        (header.width, header.height)
    }

    #[test]
    fn test_lower_quality_is_not_larger() {
        let encoder = JpegEncoder::new();
        let frame = rgb_frame(320, 240);

        let low = encoder.encode(&frame, 10).unwrap();
        let high = encoder.encode(&frame, 90).unwrap();

        assert!(low.len() <= high.len(), "{} > {}", low.len(), high.len());
        assert_eq!(low.content_type(), "image/jpeg");
    }

    #[test]
    fn test_encode_yuyv() {
        let encoder = JpegEncoder::new();
        let (width, height) = (64u32, 48u32);
        let mut yuyv = Vec::with_capacity((width * height * 2) as usize);
        for y in 0..height {
            for x in (0..width).step_by(2) {
                yuyv.extend_from_slice(&[(x + y) as u8, 128, (x + y + 1) as u8, 128]);
            }
        }
        let frame = RawFrame::new(
            Bytes::from(yuyv),
            Resolution::new(width, height),
            PixelFormat::Yuyv,
            width * 2,
            3,
        );

        let encoded = encoder.encode(&frame, 50).unwrap();
        assert!(encoded.data.starts_with(&[0xFF, 0xD8]));
        assert_eq!(decoded_size(&encoded.data), (64, 48));
        assert_eq!(encoded.sequence, 3);
    }

    #[test]
    fn test_reencode_mjpeg() {
        let encoder = JpegEncoder::new();
        let source = encoder.encode(&rgb_frame(160, 120), 95).unwrap();
        let mjpeg = RawFrame::new(source.data.clone(), Resolution::VGA, PixelFormat::Mjpeg, 0, 9);

        let encoded = encoder.encode(&mjpeg, 10).unwrap();
        // Resolution comes from the JPEG header, not the frame metadata
        assert_eq!(encoded.resolution, Resolution::new(160, 120));
        assert_eq!(decoded_size(&encoded.data), (160, 120));
        assert!(encoded.len() <= source.len());
    }

    #[test]
    fn test_short_buffer_fails() {
        let encoder = JpegEncoder::new();
        let frame = RawFrame::new(
            Bytes::from(vec![0u8; 100]),
            Resolution::new(64, 48),
            PixelFormat::Bgr24,
            0,
            1,
        );
        assert!(matches!(
            encoder.encode(&frame, 30),
            Err(AppError::EncodeFailure(_))
        ));
    }

    #[test]
    fn test_mjpeg_without_soi_marker_fails() {
        let encoder = JpegEncoder::new();
        let frame = RawFrame::new(
            Bytes::from(vec![0u8; 256]),
            Resolution::VGA,
            PixelFormat::Mjpeg,
            0,
            4,
        );
        match encoder.encode(&frame, 30) {
            Err(AppError::EncodeFailure(reason)) => assert!(reason.contains("start-of-image")),
            other => panic!("unexpected result: {:?}", other.map(|f| f.len())),
        }
    }

    #[test]
    fn test_corrupt_mjpeg_fails() {
        let encoder = JpegEncoder::new();
        let frame = RawFrame::new(
            Bytes::from_static(&[0xFF, 0xD8, 0x01, 0x02, 0x03]),
            Resolution::VGA,
            PixelFormat::Mjpeg,
            0,
            1,
        );
        assert!(matches!(
            encoder.encode(&frame, 30),
            Err(AppError::EncodeFailure(_))
        ));
    }
}
