//! All fbrpc message schemas.
//!
//! Every payload type carried on the wire has a distinct [`SchemaId`].  The
//! schema id travels in the frame header so the receiver can pick the right
//! decode routine without looking at the payload.
//!
//! Field order within a payload is fixed; see the codec module for the exact
//! byte layout of each schema.

use serde::{Deserialize, Serialize};

use crate::protocol::codec::WireMessage;

// ── Schema identifiers ────────────────────────────────────────────────────────

/// Schema identifier carried in every frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum SchemaId {
    // RPC payloads (0x0001–0x00FD)
    HelloWorldRequest = 0x0001,
    HelloWorldResponse = 0x0002,
    DelayAddRequest = 0x0003,
    DelayAddResponse = 0x0004,
    // Error replies
    RpcError = 0x00FE,
    // Server-pushed events (0x0100–0x01FF)
    ObjectCreateEvent = 0x0100,
}

impl TryFrom<u16> for SchemaId {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, ()> {
        match value {
            0x0001 => Ok(SchemaId::HelloWorldRequest),
            0x0002 => Ok(SchemaId::HelloWorldResponse),
            0x0003 => Ok(SchemaId::DelayAddRequest),
            0x0004 => Ok(SchemaId::DelayAddResponse),
            0x00FE => Ok(SchemaId::RpcError),
            0x0100 => Ok(SchemaId::ObjectCreateEvent),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for SchemaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}(0x{:04X})", self, *self as u16)
    }
}

// ── RPC payloads ──────────────────────────────────────────────────────────────

/// HELLO_WORLD request (0x0001).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloWorldRequest {
    /// Name the server should greet.
    pub name: String,
}

/// HELLO_WORLD response (0x0002).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloWorldResponse {
    /// Greeting produced by the server.
    pub message: String,
}

/// DELAY_ADD request (0x0003): the server answers with `a + b`, possibly after
/// an artificial delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayAddRequest {
    pub a: i32,
    pub b: i32,
}

/// DELAY_ADD response (0x0004).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayAddResponse {
    pub sum: i32,
}

/// Error reply (0x00FE), sent in an `Error`-kind frame in place of a response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorMessage {
    /// Application-defined error code.
    pub code: u16,
    /// Optional human-readable description; empty when the server omitted it.
    pub message: String,
}

// ── Events ────────────────────────────────────────────────────────────────────

/// Filter key type shared by all event schemas.
pub type FilterKey = i32;

/// OBJECT_CREATE event (0x0100), pushed by the server without a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCreateEvent {
    /// Filter key: subscribers registered with the same id receive this event.
    pub id: FilterKey,
    /// Event body.  Optional on the wire; defaults to the empty string.
    pub data: String,
}

/// Subscription filter for [`ObjectCreateEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventDataFilter {
    pub id: FilterKey,
}

impl EventDataFilter {
    pub fn new(id: FilterKey) -> Self {
        Self { id }
    }
}

// ── Typed RPC / event bindings ────────────────────────────────────────────────

/// Binds a request schema to the response schema the server answers with.
pub trait Request: WireMessage {
    /// Decoded type of a successful reply.
    type Response: WireMessage;

    /// Method name used in log output.
    const METHOD: &'static str;
}

impl Request for HelloWorldRequest {
    type Response = HelloWorldResponse;
    const METHOD: &'static str = "helloWorld";
}

impl Request for DelayAddRequest {
    type Response = DelayAddResponse;
    const METHOD: &'static str = "delayAdd";
}

/// A server-pushed event schema that subscribers can filter on.
pub trait Event: WireMessage + Send + Sync + 'static {
    /// Value a subscriber registers to select events.
    type Filter: Copy + Send + Sync + 'static;

    /// Key carried by this event instance.
    fn filter_key(&self) -> FilterKey;

    /// Key selected by a subscription filter.
    fn key_of(filter: &Self::Filter) -> FilterKey;

    /// Borrows the typed event out of a decoded [`RpcMessage`], if it is one.
    fn from_message(msg: &RpcMessage) -> Option<&Self>;
}

impl Event for ObjectCreateEvent {
    type Filter = EventDataFilter;

    fn filter_key(&self) -> FilterKey {
        self.id
    }

    fn key_of(filter: &EventDataFilter) -> FilterKey {
        filter.id
    }

    fn from_message(msg: &RpcMessage) -> Option<&Self> {
        match msg {
            RpcMessage::ObjectCreateEvent(e) => Some(e),
            _ => None,
        }
    }
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// Any decoded fbrpc payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcMessage {
    HelloWorldRequest(HelloWorldRequest),
    HelloWorldResponse(HelloWorldResponse),
    DelayAddRequest(DelayAddRequest),
    DelayAddResponse(DelayAddResponse),
    RpcError(RpcErrorMessage),
    ObjectCreateEvent(ObjectCreateEvent),
}

impl RpcMessage {
    /// Returns the [`SchemaId`] corresponding to this message variant.
    pub fn schema_id(&self) -> SchemaId {
        match self {
            RpcMessage::HelloWorldRequest(_) => SchemaId::HelloWorldRequest,
            RpcMessage::HelloWorldResponse(_) => SchemaId::HelloWorldResponse,
            RpcMessage::DelayAddRequest(_) => SchemaId::DelayAddRequest,
            RpcMessage::DelayAddResponse(_) => SchemaId::DelayAddResponse,
            RpcMessage::RpcError(_) => SchemaId::RpcError,
            RpcMessage::ObjectCreateEvent(_) => SchemaId::ObjectCreateEvent,
        }
    }

    /// Filter key of an event message; `None` for non-event payloads.
    pub fn filter_key(&self) -> Option<FilterKey> {
        match self {
            RpcMessage::ObjectCreateEvent(e) => Some(e.filter_key()),
            _ => None,
        }
    }
}
