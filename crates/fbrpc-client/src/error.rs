//! Error types for the fbrpc client.

use std::time::Duration;

use fbrpc_core::ProtocolError;
use thiserror::Error;

use crate::infrastructure::config::Endpoint;

/// Why a connect attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectErrorKind {
    /// The host name could not be resolved.
    Resolve,
    /// The peer actively refused the connection.
    Refused,
    /// No answer within the configured connect timeout.
    TimedOut,
    /// Any other socket error.
    Io,
}

/// Returned by `connect`; the client never retries on its own.
#[derive(Debug, Error)]
#[error("failed to connect to {endpoint}: {message}")]
pub struct ConnectError {
    pub endpoint: Endpoint,
    pub kind: ConnectErrorKind,
    pub message: String,
}

impl ConnectError {
    pub fn new(endpoint: &Endpoint, kind: ConnectErrorKind, message: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.clone(),
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn from_io(endpoint: &Endpoint, err: &std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::ConnectionRefused => ConnectErrorKind::Refused,
            std::io::ErrorKind::TimedOut => ConnectErrorKind::TimedOut,
            _ => ConnectErrorKind::Io,
        };
        Self::new(endpoint, kind, err.to_string())
    }
}

/// Errors seen by a caller awaiting an RPC.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A read or write on the established connection failed.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The request or its response could not be encoded/decoded.
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] ProtocolError),

    /// No response arrived within the request deadline.
    #[error("request {correlation_id} timed out after {timeout:?}")]
    RequestTimeout {
        correlation_id: u32,
        timeout: Duration,
    },

    /// The connection ended (or was never open) before a response arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// The server answered with an error reply.
    #[error("server error {code}: {message}")]
    Remote { code: u16, message: String },

    /// The next correlation id is still pending after the counter wrapped.
    #[error("correlation id {0} is still pending")]
    CorrelationIdInUse(u32),

    /// The pending-request table is full.
    #[error("too many pending requests (limit {limit})")]
    TooManyPending { limit: usize },
}

/// Why a connection's receive loop ended.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `close()` or a replacing `connect()` on this client.
    #[error("closed locally")]
    Local,
    /// The peer closed the stream (EOF).
    #[error("closed by peer")]
    PeerClosed,
    /// A read or write failed.
    #[error("I/O error: {0}")]
    Io(String),
    /// The stream can no longer be split into frames.
    #[error("protocol error: {0}")]
    Protocol(ProtocolError),
}
