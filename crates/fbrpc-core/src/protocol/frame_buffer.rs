//! Stream reassembly for length-prefixed frames.
//!
//! # Why a buffer is needed (for beginners)
//!
//! TCP is a *stream* protocol.  A single `read()` may return less than one
//! frame (partial read) or bytes from several frames at once (coalesced read).
//! [`FrameBuffer`] accumulates raw bytes and hands out frames only once the
//! length prefix says they are complete; trailing partial bytes stay in the
//! buffer until the next read supplies the rest.
//!
//! # Error recovery
//!
//! Because every frame declares its own length, a frame with a bad header
//! (unknown kind, length shorter than the header) can be skipped without
//! losing alignment: the buffer drops exactly `4 + length` bytes and reports
//! the error.  A length above the configured maximum is different: the
//! buffer refuses to allocate for it and the error is fatal
//! ([`ProtocolError::is_fatal`]).

use tracing::trace;

use crate::protocol::codec::ProtocolError;
use crate::protocol::frame::{peek_length, Frame, DEFAULT_MAX_FRAME_LEN, LENGTH_PREFIX_SIZE};

/// Accumulates bytes read from a stream and extracts complete frames.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    max_frame_len: u32,
}

impl FrameBuffer {
    /// Creates an empty buffer with the default 16 MiB frame limit.
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Creates an empty buffer that rejects length prefixes above `max_frame_len`.
    pub fn with_max_frame_len(max_frame_len: u32) -> Self {
        Self {
            buf: Vec::with_capacity(4096),
            max_frame_len,
        }
    }

    /// Appends freshly read bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet returned as frames.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Extracts the next complete frame.
    ///
    /// - `None`: more bytes are needed.
    /// - `Some(Ok(frame))`: one frame was removed from the buffer.
    /// - `Some(Err(e))` with `!e.is_fatal()`: one bad frame was removed from
    ///   the buffer; keep calling.
    /// - `Some(Err(e))` with `e.is_fatal()`: nothing was removed; the stream
    ///   must be closed.
    pub fn next_frame(&mut self) -> Option<Result<Frame, ProtocolError>> {
        let length = peek_length(&self.buf)?;
        if length > self.max_frame_len {
            return Some(Err(ProtocolError::FrameTooLarge {
                declared: length as usize,
                max: self.max_frame_len as usize,
            }));
        }

        let total = LENGTH_PREFIX_SIZE + length as usize;
        if self.buf.len() < total {
            trace!(
                buffered = self.buf.len(),
                needed = total,
                "waiting for rest of frame"
            );
            return None;
        }

        let result = Frame::parse_body(&self.buf[LENGTH_PREFIX_SIZE..total]);
        // `drain(..total)` shifts the carried-over bytes to the front.
        self.buf.drain(..total);
        Some(result)
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
