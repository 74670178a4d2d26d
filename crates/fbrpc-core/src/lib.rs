//! # fbrpc-core
//!
//! Wire protocol shared by the fbrpc client and any server that speaks it.
//! It has no dependencies on sockets or an async runtime.
//!
//! # Architecture overview (for beginners)
//!
//! fbrpc is a request/response protocol with server-pushed events, carried
//! over a single byte stream.  Every unit on the wire is a *frame*:
//!
//! ```text
//! [length:4][kind:1][correlation_id:4][schema_id:2][payload:N]
//! ```
//!
//! - **`protocol::frame`** – the frame header and its encode/decode.
//! - **`protocol::codec`** – the payload layout of each schema (big-endian
//!   integers, length-prefixed UTF-8 strings, optional trailing fields).
//! - **`protocol::messages`** – the typed request, response and event structs,
//!   and the traits that pair a request with its response.
//! - **`protocol::frame_buffer`** – reassembly of frames from arbitrary reads.
//! - **`protocol::sequence`** – the correlation-id counter.

pub mod protocol;

pub use protocol::codec::{decode_message, encode_message, ProtocolError, WireMessage};
pub use protocol::frame::{decode_frame, Frame, FrameKind};
pub use protocol::messages::{Event, Request, RpcMessage, SchemaId};
