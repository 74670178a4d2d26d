//! Payload codec for fbrpc message schemas.
//!
//! Payload layout per schema (all multi-byte integers are big-endian, strings
//! are a 2-byte length prefix followed by UTF-8 bytes):
//!
//! ```text
//! HelloWorldRequest   [name:str]
//! HelloWorldResponse  [message:str]
//! DelayAddRequest     [a:i32][b:i32]
//! DelayAddResponse    [sum:i32]
//! RpcError            [code:u16][message:str?]
//! ObjectCreateEvent   [id:i32][data:str?]
//! ```
//!
//! Fields marked `?` are optional: a payload that ends before them decodes
//! with the field's default.  Bytes after the last known field are ignored, so
//! a newer peer may append fields without breaking older readers.

use thiserror::Error;

use crate::protocol::messages::{
    DelayAddRequest, DelayAddResponse, HelloWorldRequest, HelloWorldResponse, ObjectCreateEvent,
    RpcErrorMessage, RpcMessage, SchemaId,
};

/// Errors that can occur during frame or payload encoding/decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The kind byte in the frame header is not a recognized value.
    #[error("unknown frame kind: 0x{0:02X}")]
    UnknownFrameKind(u8),

    /// The schema id in the frame header is not a recognized value.
    #[error("unknown schema id: 0x{0:04X}")]
    UnknownSchema(u16),

    /// The frame carries a different schema than the caller expected.
    #[error("unexpected schema: expected {expected}, got 0x{actual:04X}")]
    UnexpectedSchema { expected: SchemaId, actual: u16 },

    /// The payload could not be parsed (too short, UTF-8 error, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The length prefix is smaller than the fixed frame header.
    #[error("malformed frame: declared length {declared} is shorter than the header")]
    MalformedFrame { declared: usize },

    /// The length prefix exceeds the configured maximum frame length.
    #[error("frame too large: declared {declared} bytes, maximum is {max}")]
    FrameTooLarge { declared: usize, max: usize },

    /// A string field does not fit its 2-byte length prefix.
    #[error("string field of {0} bytes exceeds the 65535-byte limit")]
    StringTooLong(usize),

    /// The encoded payload does not fit the 4-byte length prefix.
    #[error("payload of {0} bytes does not fit in a frame")]
    PayloadTooLarge(usize),
}

impl ProtocolError {
    /// Returns `true` when the byte stream can no longer be trusted to be
    /// aligned on a frame boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::FrameTooLarge { .. })
    }
}

// ── Typed schema trait ────────────────────────────────────────────────────────

/// A payload type with a fixed wire schema.
pub trait WireMessage: Sized {
    /// Schema id written into the frame header.
    const SCHEMA: SchemaId;

    /// Length in bytes of the shortest valid payload (all required fields,
    /// with empty strings).
    const MIN_LEN: usize;

    fn write_fields(&self, w: &mut PayloadWriter) -> Result<(), ProtocolError>;

    fn read_fields(r: &mut PayloadReader<'_>) -> Result<Self, ProtocolError>;
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a typed payload (without frame header).
///
/// Encoding is deterministic: the same value always yields the same bytes.
///
/// # Errors
///
/// Returns [`ProtocolError::StringTooLong`] if a string field exceeds the
/// 2-byte length prefix.
///
/// # Examples
///
/// ```rust
/// use fbrpc_core::protocol::codec::{decode_payload, encode_payload};
/// use fbrpc_core::protocol::messages::DelayAddRequest;
///
/// let req = DelayAddRequest { a: 100, b: 200 };
/// let bytes = encode_payload(&req).unwrap();
/// assert_eq!(bytes.len(), 8);
/// assert_eq!(decode_payload::<DelayAddRequest>(&bytes).unwrap(), req);
/// ```
pub fn encode_payload<M: WireMessage>(msg: &M) -> Result<Vec<u8>, ProtocolError> {
    let mut w = PayloadWriter::with_capacity(M::MIN_LEN);
    msg.write_fields(&mut w)?;
    Ok(w.into_bytes())
}

/// Decodes a typed payload (without frame header).
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if `payload` is shorter than the
/// schema minimum or a field cannot be parsed.
pub fn decode_payload<M: WireMessage>(payload: &[u8]) -> Result<M, ProtocolError> {
    if payload.len() < M::MIN_LEN {
        return Err(ProtocolError::MalformedPayload(format!(
            "{}: need at least {} bytes, got {}",
            M::SCHEMA,
            M::MIN_LEN,
            payload.len()
        )));
    }
    let mut r = PayloadReader::new(payload, M::SCHEMA);
    M::read_fields(&mut r)
}

/// Encodes any [`RpcMessage`] payload.
///
/// # Errors
///
/// See [`encode_payload`].
pub fn encode_message(msg: &RpcMessage) -> Result<Vec<u8>, ProtocolError> {
    match msg {
        RpcMessage::HelloWorldRequest(m) => encode_payload(m),
        RpcMessage::HelloWorldResponse(m) => encode_payload(m),
        RpcMessage::DelayAddRequest(m) => encode_payload(m),
        RpcMessage::DelayAddResponse(m) => encode_payload(m),
        RpcMessage::RpcError(m) => encode_payload(m),
        RpcMessage::ObjectCreateEvent(m) => encode_payload(m),
    }
}

/// Decodes a payload selected by its raw schema id.
///
/// # Errors
///
/// Returns [`ProtocolError::UnknownSchema`] for an unrecognized id, or
/// [`ProtocolError::MalformedPayload`] if the bytes do not fit the schema.
pub fn decode_message(schema_id: u16, payload: &[u8]) -> Result<RpcMessage, ProtocolError> {
    let schema =
        SchemaId::try_from(schema_id).map_err(|_| ProtocolError::UnknownSchema(schema_id))?;
    match schema {
        SchemaId::HelloWorldRequest => decode_payload(payload).map(RpcMessage::HelloWorldRequest),
        SchemaId::HelloWorldResponse => {
            decode_payload(payload).map(RpcMessage::HelloWorldResponse)
        }
        SchemaId::DelayAddRequest => decode_payload(payload).map(RpcMessage::DelayAddRequest),
        SchemaId::DelayAddResponse => decode_payload(payload).map(RpcMessage::DelayAddResponse),
        SchemaId::RpcError => decode_payload(payload).map(RpcMessage::RpcError),
        SchemaId::ObjectCreateEvent => decode_payload(payload).map(RpcMessage::ObjectCreateEvent),
    }
}

// ── Per-schema field layouts ──────────────────────────────────────────────────

impl WireMessage for HelloWorldRequest {
    const SCHEMA: SchemaId = SchemaId::HelloWorldRequest;
    const MIN_LEN: usize = 2;

    fn write_fields(&self, w: &mut PayloadWriter) -> Result<(), ProtocolError> {
        w.put_str(&self.name)
    }

    fn read_fields(r: &mut PayloadReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            name: r.read_str("name")?,
        })
    }
}

impl WireMessage for HelloWorldResponse {
    const SCHEMA: SchemaId = SchemaId::HelloWorldResponse;
    const MIN_LEN: usize = 2;

    fn write_fields(&self, w: &mut PayloadWriter) -> Result<(), ProtocolError> {
        w.put_str(&self.message)
    }

    fn read_fields(r: &mut PayloadReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            message: r.read_str("message")?,
        })
    }
}

impl WireMessage for DelayAddRequest {
    const SCHEMA: SchemaId = SchemaId::DelayAddRequest;
    const MIN_LEN: usize = 8;

    fn write_fields(&self, w: &mut PayloadWriter) -> Result<(), ProtocolError> {
        w.put_i32(self.a);
        w.put_i32(self.b);
        Ok(())
    }

    fn read_fields(r: &mut PayloadReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            a: r.read_i32("a")?,
            b: r.read_i32("b")?,
        })
    }
}

impl WireMessage for DelayAddResponse {
    const SCHEMA: SchemaId = SchemaId::DelayAddResponse;
    const MIN_LEN: usize = 4;

    fn write_fields(&self, w: &mut PayloadWriter) -> Result<(), ProtocolError> {
        w.put_i32(self.sum);
        Ok(())
    }

    fn read_fields(r: &mut PayloadReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            sum: r.read_i32("sum")?,
        })
    }
}

impl WireMessage for RpcErrorMessage {
    const SCHEMA: SchemaId = SchemaId::RpcError;
    const MIN_LEN: usize = 2;

    fn write_fields(&self, w: &mut PayloadWriter) -> Result<(), ProtocolError> {
        w.put_u16(self.code);
        w.put_str(&self.message)
    }

    fn read_fields(r: &mut PayloadReader<'_>) -> Result<Self, ProtocolError> {
        let code = r.read_u16("code")?;
        let message = r.read_optional_str("message")?.unwrap_or_default();
        Ok(Self { code, message })
    }
}

impl WireMessage for ObjectCreateEvent {
    const SCHEMA: SchemaId = SchemaId::ObjectCreateEvent;
    const MIN_LEN: usize = 4;

    fn write_fields(&self, w: &mut PayloadWriter) -> Result<(), ProtocolError> {
        w.put_i32(self.id);
        w.put_str(&self.data)
    }

    fn read_fields(r: &mut PayloadReader<'_>) -> Result<Self, ProtocolError> {
        let id = r.read_i32("id")?;
        let data = r.read_optional_str("data")?.unwrap_or_default();
        Ok(Self { id, data })
    }
}

// ── Field writer / reader ─────────────────────────────────────────────────────

/// Append-only payload builder.
#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Writes a 2-byte length prefix followed by the UTF-8 string bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::StringTooLong`] instead of truncating.
    pub fn put_str(&mut self, s: &str) -> Result<(), ProtocolError> {
        let bytes = s.as_bytes();
        let len = u16::try_from(bytes.len()).map_err(|_| ProtocolError::StringTooLong(bytes.len()))?;
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a payload that reports schema and field name on failure.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    offset: usize,
    schema: SchemaId,
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8], schema: SchemaId) -> Self {
        Self {
            buf,
            offset: 0,
            schema,
        }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    fn take(&mut self, n: usize, field: &str) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::MalformedPayload(format!(
                "{}.{field}: need {n} bytes at offset {}, got {}",
                self.schema,
                self.offset,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    pub fn read_u16(&mut self, field: &str) -> Result<u16, ProtocolError> {
        let b = self.take(2, field)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_i32(&mut self, field: &str) -> Result<i32, ProtocolError> {
        let b = self.take(4, field)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a 2-byte length prefix and then that many UTF-8 bytes.
    pub fn read_str(&mut self, field: &str) -> Result<String, ProtocolError> {
        let len = self.read_u16(field)? as usize;
        let bytes = self.take(len, field)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| {
                ProtocolError::MalformedPayload(format!("{}.{field}: invalid UTF-8: {e}", self.schema))
            })
    }

    /// Like [`read_str`](Self::read_str), but returns `None` when the payload
    /// ends before the field starts.
    pub fn read_optional_str(&mut self, field: &str) -> Result<Option<String>, ProtocolError> {
        if self.remaining() == 0 {
            return Ok(None);
        }
        self.read_str(field).map(Some)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
