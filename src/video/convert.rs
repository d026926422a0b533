//! Pixel format conversion utilities
//!
//! Packed 4:2:2 capture formats (YUYV, YVYU, UYVY) are converted to planar
//! YUV420P so the JPEG encoder can compress them without its own color
//! conversion pass.

use crate::error::{AppError, Result};
use crate::video::format::{PixelFormat, Resolution};

/// YUV420P buffer with separate Y, U, V planes
pub struct Yuv420pBuffer {
    /// Raw buffer containing all planes
    data: Vec<u8>,
    width: u32,
    height: u32,
    /// U plane offset (Y plane starts at 0)
    u_offset: usize,
    /// V plane offset
    v_offset: usize,
}

impl Yuv420pBuffer {
    /// Create a new YUV420P buffer for the given resolution
    pub fn new(resolution: Resolution) -> Self {
        // YUV420P: Y = width*height, U = width*height/4, V = width*height/4
        let y_size = resolution.pixels() as usize;
        let uv_size = y_size / 4;

        Self {
            data: vec![0u8; y_size + uv_size * 2],
            width: resolution.width,
            height: resolution.height,
            u_offset: y_size,
            v_offset: y_size + uv_size,
        }
    }

    /// Get the raw buffer as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn y_plane(&self) -> &[u8] {
        &self.data[..self.u_offset]
    }

    pub fn u_plane(&self) -> &[u8] {
        &self.data[self.u_offset..self.v_offset]
    }

    pub fn v_plane(&self) -> &[u8] {
        &self.data[self.v_offset..]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

/// Byte positions of (Y0, U, Y1, V) inside one 4-byte packed macropixel
fn packed_layout(format: PixelFormat) -> Option<[usize; 4]> {
    match format {
        PixelFormat::Yuyv => Some([0, 1, 2, 3]),
        PixelFormat::Yvyu => Some([0, 3, 2, 1]),
        PixelFormat::Uyvy => Some([1, 0, 3, 2]),
        _ => None,
    }
}

/// Convert a packed 4:2:2 frame into a YUV420P buffer.
///
/// Chroma of each vertical pair of rows is averaged. Width and height must be
/// even; `stride` is the source row length in bytes.
pub fn packed422_to_yuv420p(
    src: &[u8],
    stride: usize,
    format: PixelFormat,
    dst: &mut Yuv420pBuffer,
) -> Result<()> {
    let [y0_at, u_at, y1_at, v_at] = packed_layout(format).ok_or_else(|| {
        AppError::EncodeFailure(format!("{} is not a packed 4:2:2 format", format))
    })?;

    let width = dst.width as usize;
    let height = dst.height as usize;
    if width == 0 || height == 0 {
        return Err(AppError::EncodeFailure(format!(
            "empty {} frame: {}x{}",
            format, width, height
        )));
    }
    if width % 2 != 0 || height % 2 != 0 {
        return Err(AppError::EncodeFailure(format!(
            "4:2:2 conversion needs even dimensions, got {}x{}",
            width, height
        )));
    }
    if stride < width * 2 {
        return Err(AppError::EncodeFailure(format!(
            "stride {} too small for width {}",
            stride, width
        )));
    }
    let needed = stride * (height - 1) + width * 2;
    if src.len() < needed {
        return Err(AppError::EncodeFailure(format!(
            "{} data too small: {} < {}",
            format,
            src.len(),
            needed
        )));
    }

    let half_width = width / 2;
    let (y_plane, uv_planes) = dst.data.split_at_mut(dst.u_offset);
    let (u_plane, v_plane) = uv_planes.split_at_mut(dst.v_offset - dst.u_offset);

    for row in (0..height).step_by(2) {
        let row0 = &src[row * stride..row * stride + width * 2];
        let row1 = &src[(row + 1) * stride..(row + 1) * stride + width * 2];
        let y_row0 = row * width;
        let y_row1 = (row + 1) * width;
        let uv_row = (row / 2) * half_width;

        for (pair, (px0, px1)) in row0.chunks_exact(4).zip(row1.chunks_exact(4)).enumerate() {
            let col = pair * 2;
            y_plane[y_row0 + col] = px0[y0_at];
            y_plane[y_row0 + col + 1] = px0[y1_at];
            y_plane[y_row1 + col] = px1[y0_at];
            y_plane[y_row1 + col + 1] = px1[y1_at];

            u_plane[uv_row + pair] = ((px0[u_at] as u16 + px1[u_at] as u16) / 2) as u8;
            v_plane[uv_row + pair] = ((px0[v_at] as u16 + px1[v_at] as u16) / 2) as u8;
        }
    }

    Ok(())
}
