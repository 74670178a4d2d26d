//! Protocol module containing the frame layout, payload codec and schemas.

pub mod codec;
pub mod frame;
pub mod frame_buffer;
pub mod messages;
pub mod sequence;

pub use codec::{decode_message, encode_message, ProtocolError, WireMessage};
pub use frame::{decode_frame, Frame, FrameKind};
pub use frame_buffer::FrameBuffer;
pub use messages::*;
pub use sequence::CorrelationCounter;
