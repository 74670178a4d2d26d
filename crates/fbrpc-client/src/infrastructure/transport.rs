//! TCP transport for the fbrpc client.
//!
//! One connection is split into two halves:
//!
//! - **Write side** – a dedicated writer task owns the socket's write half.
//!   Callers hand it encoded frames through a bounded `mpsc` queue
//!   ([`TcpFrameSink`]) and get an acknowledgement once the bytes are written.
//!   Frames are written whole and in the order they were queued.
//! - **Read side** – [`FrameReader`] owns the read half and a
//!   [`FrameBuffer`], turning arbitrary reads into complete frames.
//!
//! Both halves watch the same [`ShutdownSignal`].  Whichever side sees the
//! connection end first (local close, EOF, I/O error, fatal framing error)
//! triggers it with a reason, and the other side stops too.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fbrpc_core::protocol::{Frame, FrameBuffer, ProtocolError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::correlator::FrameSink;
use crate::application::router::FrameSource;
use crate::error::{ClientError, ConnectError, ConnectErrorKind, DisconnectReason};
use crate::infrastructure::config::Endpoint;

/// Size of each socket read.
const READ_CHUNK_SIZE: usize = 8 * 1024;

// ── Connection state ──────────────────────────────────────────────────────────

/// Lifecycle of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

// ── Connect ───────────────────────────────────────────────────────────────────

/// Resolves `endpoint` and opens a TCP connection, giving up after `timeout`.
///
/// Each resolved address is tried once, in order.  There is no retry.
///
/// # Errors
///
/// [`ConnectError`] with [`ConnectErrorKind::Resolve`] when the name does not
/// resolve, [`ConnectErrorKind::TimedOut`] when `timeout` elapses, otherwise
/// the kind of the last socket error.
pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<TcpStream, ConnectError> {
    match tokio::time::timeout(timeout, connect_any(endpoint)).await {
        Ok(result) => result,
        Err(_) => Err(ConnectError::new(
            endpoint,
            ConnectErrorKind::TimedOut,
            format!("no answer within {timeout:?}"),
        )),
    }
}

async fn connect_any(endpoint: &Endpoint) -> Result<TcpStream, ConnectError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((endpoint.address.as_str(), endpoint.port))
        .await
        .map_err(|e| ConnectError::new(endpoint, ConnectErrorKind::Resolve, e.to_string()))?
        .collect();

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(%addr, "could not set TCP_NODELAY: {e}");
                }
                info!(%endpoint, peer = %addr, "connected");
                return Ok(stream);
            }
            Err(e) => {
                debug!(%addr, "connect attempt failed: {e}");
                last_err = Some(e);
            }
        }
    }

    Err(match last_err {
        Some(e) => ConnectError::from_io(endpoint, &e),
        None => ConnectError::new(endpoint, ConnectErrorKind::Resolve, "name resolved to no addresses"),
    })
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// One-shot, first-reason-wins stop signal shared by both connection halves.
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<Option<DisconnectReason>>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Records `reason` unless a reason was already recorded, and returns the
    /// reason now in effect.
    pub fn trigger(&self, reason: DisconnectReason) -> DisconnectReason {
        let mut reason = Some(reason);
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = reason.take();
                true
            } else {
                false
            }
        });
        self.reason().unwrap_or(DisconnectReason::Local)
    }

    pub fn reason(&self) -> Option<DisconnectReason> {
        self.tx.borrow().clone()
    }

    pub fn is_triggered(&self) -> bool {
        self.tx.borrow().is_some()
    }

    fn subscribe(&self) -> watch::Receiver<Option<DisconnectReason>> {
        self.tx.subscribe()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

// ── Open ──────────────────────────────────────────────────────────────────────

/// The two halves of an open connection plus the writer task.
pub struct Transport {
    pub peer: SocketAddr,
    pub sink: TcpFrameSink,
    pub reader: FrameReader,
    pub writer: JoinHandle<()>,
}

/// Splits `stream` and spawns its writer task.
///
/// # Errors
///
/// Fails only if the peer address of `stream` cannot be read.
pub fn open(
    stream: TcpStream,
    max_frame_len: u32,
    queue_capacity: usize,
    shutdown: &ShutdownSignal,
) -> io::Result<Transport> {
    let peer = stream.peer_addr()?;
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::channel(queue_capacity.max(1));

    let writer = tokio::spawn(write_loop(rx, write_half, shutdown.clone()));
    let reader = FrameReader {
        read_half,
        buffer: FrameBuffer::with_max_frame_len(max_frame_len),
        chunk: vec![0u8; READ_CHUNK_SIZE],
        stop: shutdown.subscribe(),
        signal: shutdown.clone(),
        reason: None,
        peer,
    };

    Ok(Transport {
        peer,
        sink: TcpFrameSink { tx },
        reader,
        writer,
    })
}

// ── Write side ────────────────────────────────────────────────────────────────

struct Outbound {
    bytes: Vec<u8>,
    written: oneshot::Sender<io::Result<()>>,
}

/// Queues encoded frames for the writer task.
#[derive(Clone)]
pub struct TcpFrameSink {
    tx: mpsc::Sender<Outbound>,
}

#[async_trait]
impl FrameSink for TcpFrameSink {
    async fn send_frame(&self, bytes: Vec<u8>) -> Result<(), ClientError> {
        let (written, done) = oneshot::channel();
        self.tx
            .send(Outbound { bytes, written })
            .await
            .map_err(|_| ClientError::ConnectionClosed)?;
        match done.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ClientError::Io(e)),
            // Writer stopped before reaching this frame.
            Err(_) => Err(ClientError::ConnectionClosed),
        }
    }
}

async fn write_loop(
    mut rx: mpsc::Receiver<Outbound>,
    mut write_half: OwnedWriteHalf,
    signal: ShutdownSignal,
) {
    let mut stop = signal.subscribe();
    loop {
        let next = tokio::select! {
            biased;
            _ = stop.wait_for(Option::is_some) => None,
            next = rx.recv() => next,
        };
        let Some(out) = next else { break };

        match write_half.write_all(&out.bytes).await {
            Ok(()) => {
                let _ = out.written.send(Ok(()));
            }
            Err(e) => {
                warn!("write failed: {e}");
                signal.trigger(DisconnectReason::Io(e.to_string()));
                let _ = out.written.send(Err(e));
                break;
            }
        }
    }
    // Frames still queued are dropped; their senders see ConnectionClosed.
    drop(rx);
    if let Err(e) = write_half.shutdown().await {
        debug!("socket shutdown: {e}");
    }
    debug!("writer task finished");
}

// ── Read side ─────────────────────────────────────────────────────────────────

enum ReadOutcome {
    Stopped(DisconnectReason),
    Read(io::Result<usize>),
}

/// Turns the read half of a connection into a stream of frames.
pub struct FrameReader {
    read_half: OwnedReadHalf,
    buffer: FrameBuffer,
    chunk: Vec<u8>,
    stop: watch::Receiver<Option<DisconnectReason>>,
    signal: ShutdownSignal,
    reason: Option<DisconnectReason>,
    peer: SocketAddr,
}

impl FrameReader {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn finish(&mut self, reason: DisconnectReason) {
        let effective = self.signal.trigger(reason);
        self.reason = Some(effective);
    }
}

#[async_trait]
impl FrameSource for FrameReader {
    async fn next_frame(&mut self) -> Option<Result<Frame, ProtocolError>> {
        loop {
            if self.reason.is_some() {
                return None;
            }

            match self.buffer.next_frame() {
                Some(Err(e)) if e.is_fatal() => {
                    warn!(peer = %self.peer, "unrecoverable framing error: {e}");
                    self.finish(DisconnectReason::Protocol(e));
                    return None;
                }
                Some(result) => return Some(result),
                None => {}
            }

            let outcome = tokio::select! {
                biased;
                stopped = self.stop.wait_for(Option::is_some) => {
                    ReadOutcome::Stopped(stopped.ok().and_then(|r| (*r).clone()).unwrap_or(DisconnectReason::Local))
                }
                read = self.read_half.read(&mut self.chunk) => ReadOutcome::Read(read),
            };

            match outcome {
                ReadOutcome::Stopped(reason) => self.finish(reason),
                ReadOutcome::Read(Ok(0)) => {
                    if !self.buffer.is_empty() {
                        debug!(
                            peer = %self.peer,
                            bytes = self.buffer.buffered_len(),
                            "peer closed mid-frame"
                        );
                    }
                    self.finish(DisconnectReason::PeerClosed);
                }
                ReadOutcome::Read(Ok(n)) => self.buffer.extend(&self.chunk[..n]),
                ReadOutcome::Read(Err(e)) => {
                    warn!(peer = %self.peer, "read failed: {e}");
                    self.finish(DisconnectReason::Io(e.to_string()));
                }
            }
        }
    }

    fn close_reason(&self) -> DisconnectReason {
        self.reason.clone().unwrap_or(DisconnectReason::Local)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
