//! fbrpc-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does fbrpc-client do? (for beginners)
//!
//! The client talks to an fbrpc server over one TCP connection:
//!
//! 1. Connects to the server (one attempt, bounded by a timeout).
//! 2. Sends typed requests (`hello_world`, `delay_add`, …) as binary frames,
//!    each tagged with a fresh correlation id.
//! 3. Reads frames continuously on a background task.  Replies are matched
//!    to their callers by correlation id, so many calls can be in flight and
//!    the server may answer them in any order.
//! 4. Delivers server-pushed events to every subscriber whose filter matches
//!    the event's key.
//!
//! Start with [`ExampleApi`].

/// Application layer: correlation, event dispatch and frame routing.
pub mod application;

/// Infrastructure layer: TCP transport and configuration.
pub mod infrastructure;

pub mod client;
pub mod error;

pub use application::dispatcher::{EventReceiver, SubscriptionHandle};
pub use client::{ConnectStatus, Connected, ConnectionEvent, ExampleApi};
pub use error::{ClientError, ConnectError, ConnectErrorKind, DisconnectReason};
pub use infrastructure::config::{ClientConfig, ConfigError, Endpoint};
pub use infrastructure::transport::ConnectionState;
