//! Frame extraction from a byte stream.

use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

use crate::error::Result;
use crate::frame::{FRAME_OVERHEAD, Frame};
use crate::types::START_BYTE;

/// Extract every complete frame from `buf`.
///
/// Returns the decoded frames (each one independently `Ok` or `Err`) and the
/// number of bytes consumed. A trailing partial frame is not consumed, and
/// bytes before a start delimiter are skipped.
pub fn decode_frames(buf: &[u8]) -> (Vec<Result<Frame>>, usize) {
    let mut frames = Vec::new();
    let mut pos = 0;

    loop {
        let skipped = buf[pos..]
            .iter()
            .position(|b| *b == START_BYTE)
            .unwrap_or(buf.len() - pos);
        if skipped > 0 {
            debug!(skipped, "discarding bytes before start delimiter");
            pos += skipped;
        }

        // Need the start byte and both length bytes.
        if buf.len() - pos < 3 {
            break;
        }

        let body_len = u16::from_be_bytes([buf[pos + 1], buf[pos + 2]]) as usize;
        let total = body_len + FRAME_OVERHEAD;
        if buf.len() - pos < total {
            trace!(have = buf.len() - pos, need = total, "waiting for rest of frame");
            break;
        }

        frames.push(Frame::from_bytes(&buf[pos..pos + total]));
        pos += total;
    }

    (frames, pos)
}

/// A buffered reader for API frames.
///
/// This handles partial reads and accumulates data until complete frames
/// are available.
#[derive(Debug)]
pub struct FrameReader {
    buffer: BytesMut,
}

impl FrameReader {
    /// Create a new frame reader.
    pub fn new() -> Self {
        Self::with_capacity(512)
    }

    /// Create a new frame reader with a specific buffer capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Add data to the internal buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Decode all complete frames currently buffered.
    ///
    /// A frame that fails to decode is returned as an `Err` in its position;
    /// the frames after it are still decoded.
    pub fn parse_all(&mut self) -> Vec<Result<Frame>> {
        let (frames, consumed) = decode_frames(&self.buffer);
        self.buffer.advance(consumed);
        frames
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Get the number of bytes in the buffer.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}
