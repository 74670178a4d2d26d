//! Application layer of the fbrpc client.
//!
//! Nothing here touches a socket.  The transport is reached only through the
//! [`correlator::FrameSink`] and [`router::FrameSource`] traits, which the
//! infrastructure layer implements over TCP.
//!
//! - **`correlator`** – pending-request table; matches replies to callers by
//!   correlation id.
//! - **`dispatcher`** – event subscriptions and filtered fan-out.
//! - **`router`** – sends each inbound frame to the correlator or the
//!   dispatcher and runs the receive loop.

pub mod correlator;
pub mod dispatcher;
pub mod router;
