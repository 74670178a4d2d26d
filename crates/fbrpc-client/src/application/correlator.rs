//! Matches response frames to the requests that caused them.
//!
//! # How correlation works (for beginners)
//!
//! Many requests can be in flight on one connection, and the server may answer
//! them in any order.  Every request frame therefore carries a *correlation
//! id*.  Before the frame is written, the correlator records the id in its
//! pending table together with a one-shot channel.  When a `Response` or
//! `Error` frame arrives with the same id, the entry is removed and the frame
//! is delivered through the channel to whoever is awaiting the
//! [`PendingCall`].
//!
//! The entry is registered *before* the frame is handed to the transport, so
//! a reply that arrives before `submit` returns still finds its caller.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fbrpc_core::protocol::{CorrelationCounter, Frame, FrameKind, RpcErrorMessage};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::ClientError;

/// How many cancelled ids are remembered so their late replies are dropped
/// without a warning.
const CANCELLED_HISTORY: usize = 256;

type Reply = Result<Frame, ClientError>;

// ── Transport seam ────────────────────────────────────────────────────────────

/// Outbound half of a connection as seen by the correlator.
///
/// Implemented by the TCP transport; mocked in unit tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Writes one fully encoded frame.  Resolves once the bytes are on the
    /// socket or the write has failed.
    async fn send_frame(&self, bytes: Vec<u8>) -> Result<(), ClientError>;
}

// ── Pending table ─────────────────────────────────────────────────────────────

struct PendingEntry {
    schema_id: u16,
    submitted_at: Instant,
    reply: oneshot::Sender<Reply>,
}

#[derive(Default)]
struct PendingTable {
    entries: HashMap<u32, PendingEntry>,
    cancelled: VecDeque<u32>,
    closed: bool,
}

/// Per-connection request correlator.
pub struct Correlator {
    table: Mutex<PendingTable>,
    ids: CorrelationCounter,
    sink: Arc<dyn FrameSink>,
    max_pending: usize,
}

impl Correlator {
    pub fn new(sink: Arc<dyn FrameSink>, max_pending: usize) -> Self {
        Self::with_counter(sink, max_pending, CorrelationCounter::new())
    }

    /// Uses `ids` instead of a fresh counter starting at 1.
    pub fn with_counter(sink: Arc<dyn FrameSink>, max_pending: usize, ids: CorrelationCounter) -> Self {
        Self {
            table: Mutex::new(PendingTable::default()),
            ids,
            sink,
            max_pending,
        }
    }

    fn table(&self) -> MutexGuard<'_, PendingTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a pending request, then sends it.
    ///
    /// # Errors
    ///
    /// - [`ClientError::ConnectionClosed`] once the connection has closed; the
    ///   sink is not touched.
    /// - [`ClientError::TooManyPending`] when the table is full.
    /// - [`ClientError::CorrelationIdInUse`] when the counter has wrapped onto
    ///   an id that is still awaiting its reply.
    /// - Whatever the sink reports if the write fails.  The entry is removed
    ///   again in every error case.
    pub async fn submit(
        self: &Arc<Self>,
        schema_id: u16,
        payload: Vec<u8>,
    ) -> Result<PendingCall, ClientError> {
        let (tx, rx) = oneshot::channel();
        let correlation_id = {
            let mut table = self.table();
            if table.closed {
                return Err(ClientError::ConnectionClosed);
            }
            if table.entries.len() >= self.max_pending {
                return Err(ClientError::TooManyPending {
                    limit: self.max_pending,
                });
            }
            let id = self.ids.next();
            if table.entries.contains_key(&id) {
                warn!(correlation_id = id, "correlation id still pending after wraparound");
                return Err(ClientError::CorrelationIdInUse(id));
            }
            table.entries.insert(
                id,
                PendingEntry {
                    schema_id,
                    submitted_at: Instant::now(),
                    reply: tx,
                },
            );
            id
        };

        let mut call = PendingCall {
            correlation_id,
            reply: rx,
            correlator: Arc::downgrade(self),
            settled: false,
        };

        if let Err(err) = self.send(correlation_id, schema_id, payload).await {
            call.settled = true;
            self.table().entries.remove(&correlation_id);
            return Err(err);
        }
        debug!(correlation_id, schema = schema_id, "request sent");
        Ok(call)
    }

    async fn send(&self, correlation_id: u32, schema_id: u16, payload: Vec<u8>) -> Result<(), ClientError> {
        let bytes = Frame::new(FrameKind::Request, correlation_id, schema_id, payload).encode()?;
        self.sink.send_frame(bytes).await
    }

    /// Resolves the pending request named by a `Response` or `Error` frame.
    ///
    /// Replies for ids that are not pending are discarded.  Ids recently
    /// cancelled by their caller are discarded quietly; anything else logs a
    /// warning.
    pub fn on_frame(&self, frame: Frame) {
        let correlation_id = frame.correlation_id;
        let entry = {
            let mut table = self.table();
            match table.entries.remove(&correlation_id) {
                Some(entry) => entry,
                None => {
                    if let Some(pos) = table.cancelled.iter().position(|id| *id == correlation_id) {
                        table.cancelled.remove(pos);
                        debug!(correlation_id, "discarding reply to cancelled request");
                    } else {
                        warn!(correlation_id, kind = ?frame.kind, "reply for unknown correlation id; discarding");
                    }
                    return;
                }
            }
        };

        debug!(
            correlation_id,
            schema = entry.schema_id,
            elapsed_ms = entry.submitted_at.elapsed().as_millis() as u64,
            "request resolved"
        );
        let kind = frame.kind;
        let reply = match kind {
            FrameKind::Error => Err(remote_error(&frame)),
            _ => Ok(frame),
        };
        if entry.reply.send(reply).is_err() {
            debug!(correlation_id, "caller went away before the reply arrived");
        }
    }

    /// Removes a pending request without resolving it.
    ///
    /// Returns `false` if the id was not pending.
    pub fn cancel(&self, correlation_id: u32) -> bool {
        let mut table = self.table();
        if table.entries.remove(&correlation_id).is_none() {
            return false;
        }
        if table.cancelled.len() == CANCELLED_HISTORY {
            table.cancelled.pop_front();
        }
        table.cancelled.push_back(correlation_id);
        debug!(correlation_id, "request cancelled");
        true
    }

    /// Rejects every pending request with [`ClientError::ConnectionClosed`] and
    /// refuses all later submissions.
    pub fn on_connection_closed(&self) {
        let drained: Vec<PendingEntry> = {
            let mut table = self.table();
            table.closed = true;
            table.cancelled.clear();
            table.entries.drain().map(|(_, entry)| entry).collect()
        };
        if !drained.is_empty() {
            info!(count = drained.len(), "rejecting pending requests: connection closed");
        }
        for entry in drained {
            let _ = entry.reply.send(Err(ClientError::ConnectionClosed));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.table().closed
    }

    pub fn pending_count(&self) -> usize {
        self.table().entries.len()
    }

    /// Ids currently awaiting a reply, ascending.
    pub fn pending_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.table().entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

fn remote_error(frame: &Frame) -> ClientError {
    match frame.decode_payload::<RpcErrorMessage>() {
        Ok(err) => ClientError::Remote {
            code: err.code,
            message: err.message,
        },
        Err(e) => {
            warn!(correlation_id = frame.correlation_id, "undecodable error reply: {e}");
            ClientError::MalformedPayload(e)
        }
    }
}

// ── PendingCall ───────────────────────────────────────────────────────────────

/// The caller's side of a submitted request.
///
/// Awaiting it yields the reply frame.  Dropping it before the reply arrives
/// cancels the request; a late reply is then discarded.
#[must_use = "dropping a PendingCall cancels the request"]
pub struct PendingCall {
    correlation_id: u32,
    reply: oneshot::Receiver<Reply>,
    correlator: Weak<Correlator>,
    settled: bool,
}

impl PendingCall {
    pub fn correlation_id(&self) -> u32 {
        self.correlation_id
    }

    /// Awaits the reply for at most `timeout`; `None` waits indefinitely.
    ///
    /// # Errors
    ///
    /// [`ClientError::RequestTimeout`] when the deadline passes first.  The
    /// request is cancelled in that case.
    pub async fn wait_timeout(mut self, timeout: Option<Duration>) -> Reply {
        let Some(limit) = timeout else {
            return self.await;
        };
        match tokio::time::timeout(limit, &mut self).await {
            Ok(reply) => reply,
            Err(_) => {
                warn!(correlation_id = self.correlation_id, ?limit, "request timed out");
                Err(ClientError::RequestTimeout {
                    correlation_id: self.correlation_id,
                    timeout: limit,
                })
            }
        }
    }
}

impl Future for PendingCall {
    type Output = Reply;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Reply> {
        let this = &mut *self;
        match Pin::new(&mut this.reply).poll(cx) {
            Poll::Ready(result) => {
                this.settled = true;
                // A dropped sender means the correlator itself went away.
                Poll::Ready(result.unwrap_or_else(|_| Err(ClientError::ConnectionClosed)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(correlator) = self.correlator.upgrade() {
            correlator.cancel(self.correlation_id);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
