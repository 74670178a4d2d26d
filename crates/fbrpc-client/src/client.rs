//! `ExampleApi`: the public client facade.
//!
//! # How a call flows through the client (for beginners)
//!
//! ```text
//! hello_world(req)
//!  └─ encode payload                      (fbrpc_core codec)
//!  └─ Correlator::submit                  register id, queue frame
//!       └─ TcpFrameSink → writer task     bytes onto the socket
//!  ...
//!  receive task: FrameReader → FrameRouter
//!       ├─ Response / Error → Correlator::on_frame → wakes the caller
//!       └─ Event            → EventDispatcher::on_frame → callbacks
//!  └─ decode HelloWorldResponse           back in the caller's task
//! ```
//!
//! Each `connect` creates a *session*: one socket, one writer task, one
//! receive task and one correlator.  The event dispatcher belongs to the
//! client instance, so subscriptions survive a reconnect.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use fbrpc_core::protocol::codec::encode_payload;
use fbrpc_core::protocol::{
    DelayAddRequest, DelayAddResponse, Event, EventDataFilter, HelloWorldRequest,
    HelloWorldResponse, ObjectCreateEvent, Request,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::application::correlator::Correlator;
use crate::application::dispatcher::{EventDispatcher, EventReceiver, SubscriptionHandle};
use crate::application::router::FrameRouter;
use crate::error::{ClientError, ConnectError, DisconnectReason};
use crate::infrastructure::config::{ClientConfig, Endpoint};
use crate::infrastructure::transport::{self, ConnectionState, ShutdownSignal, Transport};

/// Buffered connection notifications per `connection_events()` receiver.
const CONNECTION_EVENT_CAPACITY: usize = 16;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Public value types ────────────────────────────────────────────────────────

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected {
        session: Uuid,
        peer: SocketAddr,
    },
    /// A `connect` attempt failed; any previous session is untouched.
    ConnectFailed {
        endpoint: Endpoint,
        message: String,
    },
    Disconnected {
        session: Uuid,
        reason: DisconnectReason,
    },
}

/// Result of a successful `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connected {
    pub session_id: Uuid,
    pub endpoint: Endpoint,
    pub peer: SocketAddr,
}

/// Flat summary of a connect attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectStatus {
    pub result: bool,
    pub message: String,
}

impl From<&Result<Connected, ConnectError>> for ConnectStatus {
    fn from(outcome: &Result<Connected, ConnectError>) -> Self {
        match outcome {
            Ok(c) => Self {
                result: true,
                message: format!("connected to {} ({})", c.endpoint, c.peer),
            },
            Err(e) => Self {
                result: false,
                message: e.to_string(),
            },
        }
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

struct Session {
    id: Uuid,
    correlator: Arc<Correlator>,
    shutdown: ShutdownSignal,
    state: Arc<Mutex<ConnectionState>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    /// Stops both connection halves and rejects pending requests right away.
    fn begin_close(&self) {
        {
            let mut state = lock(&self.state);
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Closing;
            }
        }
        self.shutdown.trigger(DisconnectReason::Local);
        self.correlator.on_connection_closed();
    }

    async fn join(&self) {
        let tasks: Vec<JoinHandle<()>> = lock(&self.tasks).drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(session = %self.id, "connection task ended abnormally: {e}");
            }
        }
    }
}

// ── ExampleApi ────────────────────────────────────────────────────────────────

/// Client for the example service.
///
/// Construct one per logical connection; there is no global instance.
/// Methods take `&self`, so a single `Arc<ExampleApi>` can be shared by many
/// tasks issuing calls concurrently.
///
/// Subscription callbacks run on the connection's receive task.  They should
/// return quickly; use [`ExampleApi::subscribe_channel`] to process events
/// elsewhere.
pub struct ExampleApi {
    config: ClientConfig,
    dispatcher: Arc<EventDispatcher>,
    session: Mutex<Option<Arc<Session>>>,
    connect_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl Default for ExampleApi {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl ExampleApi {
    pub fn new(config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(CONNECTION_EVENT_CAPACITY);
        Self {
            config,
            dispatcher: Arc::new(EventDispatcher::new()),
            session: Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
            events,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ── Connection lifecycle ──────────────────────────────────────────────────

    /// Opens a new session to `endpoint`.
    ///
    /// On success the new session replaces any existing one, whose pending
    /// requests are rejected with [`ClientError::ConnectionClosed`].  On
    /// failure the existing session (if any) is left running.
    ///
    /// # Errors
    ///
    /// [`ConnectError`] from the single connect attempt.  It is not retried.
    pub async fn connect(&self, endpoint: &Endpoint) -> Result<Connected, ConnectError> {
        let _connecting = self.connect_lock.lock().await;

        let (session, connected) = match self.open_session(endpoint).await {
            Ok(opened) => opened,
            Err(e) => {
                warn!("{e}");
                let _ = self.events.send(ConnectionEvent::ConnectFailed {
                    endpoint: endpoint.clone(),
                    message: e.message.clone(),
                });
                return Err(e);
            }
        };

        let previous = lock(&self.session).replace(Arc::clone(&session));
        if let Some(previous) = previous {
            info!(old = %previous.id, new = %session.id, "replacing session");
            previous.begin_close();
        }
        let _ = self.events.send(ConnectionEvent::Connected {
            session: connected.session_id,
            peer: connected.peer,
        });
        Ok(connected)
    }

    async fn open_session(&self, endpoint: &Endpoint) -> Result<(Arc<Session>, Connected), ConnectError> {
        let stream = transport::connect(endpoint, self.config.connect_timeout()).await?;
        let shutdown = ShutdownSignal::new();
        let Transport {
            peer,
            sink,
            reader,
            writer,
        } = transport::open(
            stream,
            self.config.max_frame_len,
            self.config.outbound_queue_capacity,
            &shutdown,
        )
        .map_err(|e| ConnectError::from_io(endpoint, &e))?;

        let id = Uuid::new_v4();
        let correlator = Arc::new(Correlator::new(Arc::new(sink), self.config.max_pending_requests));
        let router = FrameRouter::new(Arc::clone(&correlator), Arc::clone(&self.dispatcher));
        let state = Arc::new(Mutex::new(ConnectionState::Connected));

        let task_state = Arc::clone(&state);
        let events = self.events.clone();
        let receive = tokio::spawn(
            async move {
                let reason = router.run(reader).await;
                *lock(&task_state) = ConnectionState::Closed;
                info!(%reason, "disconnected");
                let _ = events.send(ConnectionEvent::Disconnected {
                    session: id,
                    reason,
                });
            }
            .instrument(info_span!("session", id = %id, %peer)),
        );

        info!(session = %id, %endpoint, %peer, "session open");
        let session = Arc::new(Session {
            id,
            correlator,
            shutdown,
            state,
            tasks: Mutex::new(vec![receive, writer]),
        });
        let connected = Connected {
            session_id: id,
            endpoint: endpoint.clone(),
            peer,
        };
        Ok((session, connected))
    }

    /// Closes the current session and waits for its tasks to finish.
    ///
    /// Pending requests are rejected with [`ClientError::ConnectionClosed`].
    /// Subscriptions stay registered.  Closing an unconnected client is a
    /// no-op.
    pub async fn close(&self) {
        let session = lock(&self.session).take();
        if let Some(session) = session {
            session.begin_close();
            session.join().await;
        }
    }

    pub fn state(&self) -> ConnectionState {
        if self.connect_lock.try_lock().is_err() {
            return ConnectionState::Connecting;
        }
        lock(&self.session)
            .as_ref()
            .map_or(ConnectionState::Disconnected, |s| s.state())
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.session)
            .as_ref()
            .is_some_and(|s| s.state() == ConnectionState::Connected)
    }

    /// Subscribes to connect/disconnect notifications.
    pub fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    // ── RPCs ──────────────────────────────────────────────────────────────────

    pub async fn hello_world(&self, request: HelloWorldRequest) -> Result<HelloWorldResponse, ClientError> {
        self.call(&request).await
    }

    pub async fn delay_add(&self, request: DelayAddRequest) -> Result<DelayAddResponse, ClientError> {
        self.call(&request).await
    }

    /// Sends any typed request and awaits its typed response, using the
    /// configured request timeout.
    pub async fn call<R: Request>(&self, request: &R) -> Result<R::Response, ClientError> {
        self.call_with_timeout(request, self.config.request_timeout()).await
    }

    /// Like [`call`](Self::call) with an explicit deadline (`None` waits until
    /// the reply or the end of the connection).
    ///
    /// # Errors
    ///
    /// - [`ClientError::ConnectionClosed`] when not connected or when the
    ///   connection ends first.
    /// - [`ClientError::RequestTimeout`] when `timeout` elapses.
    /// - [`ClientError::Remote`] when the server answers with an error reply.
    /// - [`ClientError::MalformedPayload`] when the reply cannot be decoded;
    ///   the connection is unaffected.
    pub async fn call_with_timeout<R: Request>(
        &self,
        request: &R,
        timeout: Option<Duration>,
    ) -> Result<R::Response, ClientError> {
        let correlator = self.correlator().ok_or(ClientError::ConnectionClosed)?;
        let payload = encode_payload(request)?;
        let call = correlator.submit(R::SCHEMA as u16, payload).await?;
        let correlation_id = call.correlation_id();

        let frame = call.wait_timeout(timeout).await?;
        frame.decode_payload::<R::Response>().map_err(|e| {
            warn!(method = R::METHOD, correlation_id, "malformed response: {e}");
            ClientError::MalformedPayload(e)
        })
    }

    fn correlator(&self) -> Option<Arc<Correlator>> {
        lock(&self.session)
            .as_ref()
            .map(|s| Arc::clone(&s.correlator))
    }

    // ── Events ────────────────────────────────────────────────────────────────

    /// Calls `callback` for every `ObjectCreateEvent` whose id equals
    /// `filter.id`.
    pub fn subscribe_object_create_event<F>(&self, filter: EventDataFilter, callback: F) -> SubscriptionHandle
    where
        F: Fn(&ObjectCreateEvent) + Send + Sync + 'static,
    {
        self.subscribe::<ObjectCreateEvent, F>(filter, callback)
    }

    pub fn subscribe<E, F>(&self, filter: E::Filter, callback: F) -> SubscriptionHandle
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe::<E, F>(filter, callback)
    }

    /// Queues matching events on a bounded channel of
    /// `event_channel_capacity`.  Dropping the receiver unsubscribes.
    pub fn subscribe_channel<E>(&self, filter: E::Filter) -> EventReceiver<E>
    where
        E: Event + Clone,
    {
        self.dispatcher
            .subscribe_channel::<E>(filter, self.config.event_channel_capacity)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.dispatcher.unsubscribe(handle)
    }
}

impl Drop for ExampleApi {
    fn drop(&mut self) {
        if let Some(session) = lock(&self.session).take() {
            session.begin_close();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
