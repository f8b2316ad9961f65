//! Frame type and the multipart wire framing shared by the live stream
//! and the recorder.
//!
//! Chunk format (one per frame, identical on the wire and on disk, so a
//! stored recording is directly playable as a multipart stream):
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <n>\r\n
//! \r\n
//! <n bytes of JPEG>\r\n
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// Multipart boundary token, without the leading dashes.
pub const BOUNDARY: &str = "frame";

/// One captured image. Immutable once captured; ownership transfers to
/// exactly one consumer per capture.
#[derive(Debug, Clone)]
pub struct Frame {
    /// JPEG payload
    pub payload: Bytes,
}

impl Frame {
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Encode one frame as a multipart chunk.
pub fn multipart_chunk(frame: &Frame) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        frame.payload.len()
    );
    let mut buf = BytesMut::with_capacity(header.len() + frame.payload.len() + 2);
    buf.put_slice(header.as_bytes());
    buf.put_slice(&frame.payload);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Content-Type header value for a multipart stream or stored recording.
pub fn multipart_content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={}", BOUNDARY)
}
