//! Infrastructure layer of the fbrpc client.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `fbrpc_core`, but MUST NOT be imported by the `application` layer.
//!
//! - **`config`** – `ClientConfig` and `Endpoint`, loaded from TOML.
//! - **`transport`** – TCP connect, the writer task behind
//!   [`transport::TcpFrameSink`], and the framed [`transport::FrameReader`].

pub mod config;
pub mod transport;
