//! Routes inbound frames by kind and drives the receive loop.
//!
//! | Kind       | Destination                 |
//! |------------|-----------------------------|
//! | `Response` | correlator                  |
//! | `Error`    | correlator                  |
//! | `Event`    | event dispatcher            |
//! | `Request`  | logged and discarded        |

use std::sync::Arc;

use async_trait::async_trait;
use fbrpc_core::protocol::{Frame, FrameKind, ProtocolError};
use tracing::{debug, info, warn};

use crate::application::correlator::Correlator;
use crate::application::dispatcher::EventDispatcher;
use crate::error::DisconnectReason;

/// Inbound half of a connection as seen by the receive loop.
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame off the wire.
    ///
    /// `Some(Err(_))` is a bad frame that has already been skipped; `None`
    /// means the connection is finished.
    async fn next_frame(&mut self) -> Option<Result<Frame, ProtocolError>>;

    /// Why the source finished.  Only meaningful after `next_frame` returned
    /// `None`.
    fn close_reason(&self) -> DisconnectReason;
}

/// Where a frame was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Correlator,
    Dispatcher,
    Discarded,
}

pub struct FrameRouter {
    correlator: Arc<Correlator>,
    dispatcher: Arc<EventDispatcher>,
}

impl FrameRouter {
    pub fn new(correlator: Arc<Correlator>, dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            correlator,
            dispatcher,
        }
    }

    pub fn route(&self, frame: Frame) -> Route {
        match frame.kind {
            FrameKind::Response | FrameKind::Error => {
                self.correlator.on_frame(frame);
                Route::Correlator
            }
            FrameKind::Event => {
                self.dispatcher.on_frame(&frame);
                Route::Dispatcher
            }
            FrameKind::Request => {
                warn!(
                    correlation_id = frame.correlation_id,
                    schema = frame.schema_id,
                    "server sent a request frame; discarding"
                );
                Route::Discarded
            }
        }
    }

    /// Reads frames until the source finishes, then rejects whatever is
    /// still pending.
    ///
    /// Bad frames are logged and skipped; they never end the loop.
    pub async fn run<S: FrameSource>(&self, mut source: S) -> DisconnectReason {
        let mut routed = 0u64;
        while let Some(next) = source.next_frame().await {
            match next {
                Ok(frame) => {
                    debug!(
                        kind = ?frame.kind,
                        correlation_id = frame.correlation_id,
                        schema = frame.schema_id,
                        "frame received"
                    );
                    self.route(frame);
                    routed += 1;
                }
                Err(e) => warn!("skipping malformed frame: {e}"),
            }
        }
        let reason = source.close_reason();
        info!(%reason, frames = routed, "receive loop finished");
        self.correlator.on_connection_closed();
        reason
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
