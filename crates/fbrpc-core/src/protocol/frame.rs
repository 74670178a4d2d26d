//! Frame layout shared by every message on the wire.
//!
//! Wire format:
//! ```text
//! [length:4][kind:1][correlation_id:4][schema_id:2][payload:N]
//! ```
//! `length` counts every byte after itself (`7 + N`).  All multi-byte
//! integers are big-endian.  Event frames carry a correlation id of 0.

use crate::protocol::codec::{decode_payload, encode_payload, ProtocolError, WireMessage};
use crate::protocol::messages::{RpcErrorMessage, SchemaId};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of the fixed header that follows the length prefix.
pub const FRAME_HEADER_SIZE: usize = 7;

/// Default upper bound on the length prefix (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Correlation id carried by event frames.
pub const EVENT_CORRELATION_ID: u32 = 0;

// ── Frame kind ────────────────────────────────────────────────────────────────

/// Message-kind discriminant in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    Request = 0x01,
    Response = 0x02,
    Event = 0x03,
    /// Correlated reply carrying an [`RpcErrorMessage`] instead of a response.
    Error = 0x04,
}

impl TryFrom<u8> for FrameKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(FrameKind::Request),
            0x02 => Ok(FrameKind::Response),
            0x03 => Ok(FrameKind::Event),
            0x04 => Ok(FrameKind::Error),
            _ => Err(()),
        }
    }
}

// ── Frame ─────────────────────────────────────────────────────────────────────

/// One complete frame with its payload still encoded.
///
/// The payload is decoded lazily (see [`Frame::decode_payload`]) so a bad
/// payload can be attributed to a single request or event instead of the
/// whole stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub correlation_id: u32,
    /// Raw schema id; may name a schema this build does not know.
    pub schema_id: u16,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(kind: FrameKind, correlation_id: u32, schema_id: u16, payload: Vec<u8>) -> Self {
        Self {
            kind,
            correlation_id,
            schema_id,
            payload,
        }
    }

    /// Builds a request frame for a typed message.
    pub fn request<M: WireMessage>(correlation_id: u32, msg: &M) -> Result<Self, ProtocolError> {
        Self::typed(FrameKind::Request, correlation_id, msg)
    }

    /// Builds a response frame for a typed message.
    pub fn response<M: WireMessage>(correlation_id: u32, msg: &M) -> Result<Self, ProtocolError> {
        Self::typed(FrameKind::Response, correlation_id, msg)
    }

    /// Builds an event frame (correlation id 0) for a typed message.
    pub fn event<M: WireMessage>(msg: &M) -> Result<Self, ProtocolError> {
        Self::typed(FrameKind::Event, EVENT_CORRELATION_ID, msg)
    }

    /// Builds an error reply for the request `correlation_id`.
    pub fn error(correlation_id: u32, err: &RpcErrorMessage) -> Result<Self, ProtocolError> {
        Self::typed(FrameKind::Error, correlation_id, err)
    }

    fn typed<M: WireMessage>(
        kind: FrameKind,
        correlation_id: u32,
        msg: &M,
    ) -> Result<Self, ProtocolError> {
        Ok(Self::new(
            kind,
            correlation_id,
            M::SCHEMA as u16,
            encode_payload(msg)?,
        ))
    }

    /// Total encoded size including the length prefix.
    pub fn encoded_len(&self) -> usize {
        LENGTH_PREFIX_SIZE + FRAME_HEADER_SIZE + self.payload.len()
    }

    /// Resolves the schema id, if known.
    pub fn schema(&self) -> Result<SchemaId, ProtocolError> {
        SchemaId::try_from(self.schema_id).map_err(|_| ProtocolError::UnknownSchema(self.schema_id))
    }

    /// Decodes the payload as `M`, checking that the header names `M`'s schema.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::UnexpectedSchema`] if the header carries another
    /// schema, otherwise whatever [`decode_payload`] reports.
    pub fn decode_payload<M: WireMessage>(&self) -> Result<M, ProtocolError> {
        if self.schema_id != M::SCHEMA as u16 {
            return Err(ProtocolError::UnexpectedSchema {
                expected: M::SCHEMA,
                actual: self.schema_id,
            });
        }
        decode_payload(&self.payload)
    }

    /// Encodes the frame including its length prefix.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::PayloadTooLarge`] if the frame does not fit the
    /// 4-byte length prefix.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let body_len = FRAME_HEADER_SIZE + self.payload.len();
        let length = u32::try_from(body_len)
            .map_err(|_| ProtocolError::PayloadTooLarge(self.payload.len()))?;

        let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + body_len);
        buf.extend_from_slice(&length.to_be_bytes());
        buf.push(self.kind as u8);
        buf.extend_from_slice(&self.correlation_id.to_be_bytes());
        buf.extend_from_slice(&self.schema_id.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Parses the bytes that follow the length prefix (header + payload).
    ///
    /// # Errors
    ///
    /// [`ProtocolError::MalformedFrame`] if `body` is shorter than the header,
    /// [`ProtocolError::UnknownFrameKind`] for an unrecognized kind byte.
    pub fn parse_body(body: &[u8]) -> Result<Self, ProtocolError> {
        if body.len() < FRAME_HEADER_SIZE {
            return Err(ProtocolError::MalformedFrame {
                declared: body.len(),
            });
        }
        let kind = FrameKind::try_from(body[0]).map_err(|_| ProtocolError::UnknownFrameKind(body[0]))?;
        let correlation_id = u32::from_be_bytes([body[1], body[2], body[3], body[4]]);
        let schema_id = u16::from_be_bytes([body[5], body[6]]);
        Ok(Self::new(
            kind,
            correlation_id,
            schema_id,
            body[FRAME_HEADER_SIZE..].to_vec(),
        ))
    }
}

/// Reads the length prefix at the start of `bytes`, if present.
pub fn peek_length(bytes: &[u8]) -> Option<u32> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = bytes.get(..LENGTH_PREFIX_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(prefix))
}

/// Decodes one [`Frame`] from the beginning of `bytes`.
///
/// Returns the frame and the total number of bytes consumed (prefix +
/// header + payload), so the caller can advance their read cursor.
///
/// # Errors
///
/// [`ProtocolError::InsufficientData`] if `bytes` does not yet hold a complete
/// frame; otherwise see [`Frame::parse_body`].
///
/// # Examples
///
/// ```rust
/// use fbrpc_core::protocol::frame::{decode_frame, Frame};
/// use fbrpc_core::protocol::messages::DelayAddResponse;
///
/// let frame = Frame::response(7, &DelayAddResponse { sum: 300 }).unwrap();
/// let bytes = frame.encode().unwrap();
/// let (decoded, consumed) = decode_frame(&bytes).unwrap();
/// assert_eq!(decoded, frame);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn decode_frame(bytes: &[u8]) -> Result<(Frame, usize), ProtocolError> {
    let length = peek_length(bytes).ok_or(ProtocolError::InsufficientData {
        needed: LENGTH_PREFIX_SIZE,
        available: bytes.len(),
    })? as usize;

    let total = LENGTH_PREFIX_SIZE + length;
    if bytes.len() < total {
        return Err(ProtocolError::InsufficientData {
            needed: total,
            available: bytes.len(),
        });
    }

    let frame = Frame::parse_body(&bytes[LENGTH_PREFIX_SIZE..total])?;
    Ok((frame, total))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
