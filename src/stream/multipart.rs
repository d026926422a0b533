//! `multipart/x-mixed-replace` framing
//!
//! Every part is written as
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! \r\n
//! <payload>\r\n
//! ```
//!
//! with no `Content-Length` header, so a reader splits parts on the next
//! boundary line.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Response content type for the stream endpoint
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const PART_START: &[u8] = b"--frame\r\n";
const NEXT_PART: &[u8] = b"\r\n--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Frame one payload as a complete multipart part
pub fn create_mjpeg_part(payload: &[u8], content_type: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(64 + content_type.len() + payload.len());

    buf.put_slice(PART_START);
    buf.put_slice(b"Content-Type: ");
    buf.put_slice(content_type.as_bytes());
    buf.put_slice(b"\r\n\r\n");
    buf.put_slice(payload);
    buf.put_slice(b"\r\n");

    buf.freeze()
}

/// One decoded part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartPart {
    pub content_type: Option<String>,
    pub payload: Bytes,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MultipartError {
    #[error("expected boundary line at offset {0}")]
    MissingBoundary(usize),

    #[error("part headers are not valid UTF-8")]
    InvalidHeader,

    #[error("stream ended inside a part")]
    Truncated,
}

/// Incremental reader for the body produced by [`create_mjpeg_part`]
#[derive(Debug, Default)]
pub struct MultipartReader {
    buf: BytesMut,
    consumed: usize,
}

impl MultipartReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes received from the transport
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete part, if the following boundary has already arrived.
    ///
    /// The last part of a stream only completes in [`MultipartReader::finish`].
    pub fn next_part(&mut self) -> Result<Option<MultipartPart>, MultipartError> {
        let Some((header_end, content_type)) = self.parse_head()? else {
            return Ok(None);
        };

        let body_start = header_end + HEADER_END.len();
        let Some(body_len) = find(&self.buf[body_start..], NEXT_PART) else {
            return Ok(None);
        };

        let payload = Bytes::copy_from_slice(&self.buf[body_start..body_start + body_len]);
        // Keep the boundary of the following part in the buffer
        let advance = body_start + body_len + 2;
        self.buf.advance(advance);
        self.consumed += advance;

        Ok(Some(MultipartPart {
            content_type,
            payload,
        }))
    }

    /// Consume the final part once the transport has closed
    pub fn finish(mut self) -> Result<Option<MultipartPart>, MultipartError> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let (header_end, content_type) = self.parse_head()?.ok_or(MultipartError::Truncated)?;
        let body = &self.buf[header_end + HEADER_END.len()..];
        let payload = body.strip_suffix(b"\r\n").ok_or(MultipartError::Truncated)?;

        Ok(Some(MultipartPart {
            content_type,
            payload: Bytes::copy_from_slice(payload),
        }))
    }

    /// Locate the end of the current part's header block
    fn parse_head(&self) -> Result<Option<(usize, Option<String>)>, MultipartError> {
        let prefix = self.buf.len().min(PART_START.len());
        if self.buf[..prefix] != PART_START[..prefix] {
            return Err(MultipartError::MissingBoundary(self.consumed));
        }
        if self.buf.len() < PART_START.len() {
            return Ok(None);
        }

        // Search from the boundary's own CRLF so an empty header block matches
        let search_from = PART_START.len() - 2;
        let Some(offset) = find(&self.buf[search_from..], HEADER_END) else {
            return Ok(None);
        };
        let header_end = search_from + offset;

        let headers = if header_end > PART_START.len() {
            std::str::from_utf8(&self.buf[PART_START.len()..header_end])
                .map_err(|_| MultipartError::InvalidHeader)?
        } else {
            ""
        };
        let content_type = headers.split("\r\n").find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("content-type")
                .then(|| value.trim().to_string())
        });

        Ok(Some((header_end, content_type)))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
