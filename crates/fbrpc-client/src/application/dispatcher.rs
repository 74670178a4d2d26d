//! Fans server-pushed events out to filtered subscribers.
//!
//! A subscription is `(schema, filter key, callback)`.  An event is delivered
//! to every subscription whose schema matches the event's schema and whose
//! key equals the key carried in the event payload, in the order the
//! subscriptions were made.
//!
//! Callbacks run on the receive task, outside the subscription lock, so a
//! callback may itself subscribe or unsubscribe.  A panicking callback is
//! logged and does not stop delivery to the others.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use fbrpc_core::protocol::{decode_message, Event, FilterKey, Frame, RpcMessage, SchemaId};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Opaque handle returned by `subscribe`; pass it to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(Uuid);

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

type Callback = Arc<dyn Fn(&RpcMessage) + Send + Sync>;

struct Subscription {
    handle: SubscriptionHandle,
    schema: SchemaId,
    key: FilterKey,
    callback: Callback,
}

/// Subscription registry, shared by every connection of one client.
#[derive(Default)]
pub struct EventDispatcher {
    subscriptions: RwLock<Vec<Subscription>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Subscription>> {
        self.subscriptions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Subscription>> {
        self.subscriptions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `callback` for events of type `E` whose key matches `filter`.
    pub fn subscribe<E, F>(&self, filter: E::Filter, callback: F) -> SubscriptionHandle
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let handle = SubscriptionHandle(Uuid::new_v4());
        let key = E::key_of(&filter);
        let callback: Callback = Arc::new(move |msg: &RpcMessage| {
            if let Some(event) = E::from_message(msg) {
                callback(event);
            }
        });
        self.write().push(Subscription {
            handle,
            schema: E::SCHEMA,
            key,
            callback,
        });
        debug!(%handle, schema = %E::SCHEMA, key, "subscribed");
        handle
    }

    /// Removes a subscription.  Returns `false` if the handle is unknown.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut subs = self.write();
        let before = subs.len();
        subs.retain(|s| s.handle != handle);
        let removed = subs.len() != before;
        if removed {
            debug!(%handle, "unsubscribed");
        }
        removed
    }

    pub fn subscription_count(&self) -> usize {
        self.read().len()
    }

    /// Decodes an `Event` frame and invokes every matching callback.
    ///
    /// Returns the number of callbacks invoked.  Undecodable payloads and
    /// non-event schemas are logged and dropped.
    pub fn on_frame(&self, frame: &Frame) -> usize {
        let msg = match decode_message(frame.schema_id, &frame.payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(schema = frame.schema_id, "dropping undecodable event: {e}");
                return 0;
            }
        };
        let Some(key) = msg.filter_key() else {
            warn!(schema = %msg.schema_id(), "event frame carries a non-event schema; dropping");
            return 0;
        };
        self.dispatch(&msg, key)
    }

    fn dispatch(&self, msg: &RpcMessage, key: FilterKey) -> usize {
        let schema = msg.schema_id();
        let targets: Vec<(SubscriptionHandle, Callback)> = self
            .read()
            .iter()
            .filter(|s| s.schema == schema && s.key == key)
            .map(|s| (s.handle, Arc::clone(&s.callback)))
            .collect();

        if targets.is_empty() {
            debug!(%schema, key, "no subscriber for event");
        }
        for (handle, callback) in &targets {
            if catch_unwind(AssertUnwindSafe(|| callback(msg))).is_err() {
                warn!(%handle, %schema, key, "event callback panicked");
            }
        }
        targets.len()
    }

    /// Like [`subscribe`](Self::subscribe), but queues events on a bounded
    /// channel instead of calling back.
    ///
    /// When the receiver is full, new events for it are dropped with a
    /// warning rather than stalling the receive loop.
    pub fn subscribe_channel<E>(self: &Arc<Self>, filter: E::Filter, capacity: usize) -> EventReceiver<E>
    where
        E: Event + Clone,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = self.subscribe::<E, _>(filter, move |event: &E| {
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(event.clone()) {
                warn!(schema = %E::SCHEMA, "event receiver is full; dropping event");
            }
        });
        EventReceiver {
            rx,
            handle,
            dispatcher: Arc::downgrade(self),
        }
    }
}

/// Pull-based subscription; unsubscribes itself when dropped.
pub struct EventReceiver<E> {
    rx: mpsc::Receiver<E>,
    handle: SubscriptionHandle,
    dispatcher: Weak<EventDispatcher>,
}

impl<E> EventReceiver<E> {
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle
    }

    /// Waits for the next matching event.
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    /// Returns a queued event without waiting.
    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }
}

impl<E> Drop for EventReceiver<E> {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.unsubscribe(self.handle);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use fbrpc_core::protocol::{DelayAddResponse, EventDataFilter, ObjectCreateEvent};
    use std::sync::Mutex;

    fn event_frame(id: i32, data: &str) -> Frame {
        Frame::event(&ObjectCreateEvent {
            id,
            data: data.to_string(),
        })
        .unwrap()
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&ObjectCreateEvent) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |e: &ObjectCreateEvent| {
            sink.lock().unwrap().push(e.data.clone())
        })
    }

    #[test]
    fn test_event_reaches_only_matching_filter() {
        // Arrange
        let dispatcher = EventDispatcher::new();
        let (seen_42, cb_42) = recorder();
        let (seen_7, cb_7) = recorder();
        dispatcher.subscribe::<ObjectCreateEvent, _>(EventDataFilter::new(42), cb_42);
        dispatcher.subscribe::<ObjectCreateEvent, _>(EventDataFilter::new(7), cb_7);

        // Act
        let invoked = dispatcher.on_frame(&event_frame(42, "hello"));

        // Assert
        assert_eq!(invoked, 1);
        assert_eq!(*seen_42.lock().unwrap(), vec!["hello".to_string()]);
        assert!(seen_7.lock().unwrap().is_empty());
    }

    #[test]
    fn test_subscribers_fire_in_subscription_order() {
        let dispatcher = EventDispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = Arc::clone(&order);
            dispatcher.subscribe::<ObjectCreateEvent, _>(EventDataFilter::new(1), move |_| {
                order.lock().unwrap().push(n)
            });
        }

        dispatcher.on_frame(&event_frame(1, ""));

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        // Arrange
        let dispatcher = EventDispatcher::new();
        let (seen, cb) = recorder();
        let handle = dispatcher.subscribe::<ObjectCreateEvent, _>(EventDataFilter::new(42), cb);

        // Act
        assert!(dispatcher.unsubscribe(handle));
        dispatcher.on_frame(&event_frame(42, "late"));

        // Assert
        assert!(seen.lock().unwrap().is_empty());
        assert!(!dispatcher.unsubscribe(handle), "second unsubscribe is a no-op");
    }

    #[test]
    fn test_panicking_callback_does_not_block_others() {
        // Arrange
        let dispatcher = EventDispatcher::new();
        dispatcher.subscribe::<ObjectCreateEvent, _>(EventDataFilter::new(42), |_| {
            panic!("subscriber bug")
        });
        let (seen, cb) = recorder();
        dispatcher.subscribe::<ObjectCreateEvent, _>(EventDataFilter::new(42), cb);

        // Act
        let invoked = dispatcher.on_frame(&event_frame(42, "still delivered"));

        // Assert
        assert_eq!(invoked, 2);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
        let (d, s) = (Arc::clone(&dispatcher), Arc::clone(&slot));
        let handle = dispatcher.subscribe::<ObjectCreateEvent, _>(EventDataFilter::new(3), move |_| {
            if let Some(h) = *s.lock().unwrap() {
                d.unsubscribe(h);
            }
        });
        *slot.lock().unwrap() = Some(handle);

        dispatcher.on_frame(&event_frame(3, ""));

        assert_eq!(dispatcher.subscription_count(), 0);
    }

    #[test]
    fn test_malformed_event_payload_is_dropped() {
        let dispatcher = EventDispatcher::new();
        let (seen, cb) = recorder();
        dispatcher.subscribe::<ObjectCreateEvent, _>(EventDataFilter::new(42), cb);
        let mut frame = event_frame(42, "x");
        frame.payload.truncate(2);

        assert_eq!(dispatcher.on_frame(&frame), 0);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_non_event_schema_in_event_frame_is_dropped() {
        let dispatcher = EventDispatcher::new();
        let mut frame = Frame::response(0, &DelayAddResponse { sum: 1 }).unwrap();
        frame.kind = fbrpc_core::protocol::FrameKind::Event;

        assert_eq!(dispatcher.on_frame(&frame), 0);
    }

    #[tokio::test]
    async fn test_channel_subscription_receives_and_unsubscribes_on_drop() {
        // Arrange
        let dispatcher = Arc::new(EventDispatcher::new());
        let mut rx = dispatcher.subscribe_channel::<ObjectCreateEvent>(EventDataFilter::new(9), 4);

        // Act
        dispatcher.on_frame(&event_frame(9, "queued"));
        let event = rx.recv().await.expect("event must be queued");
        drop(rx);

        // Assert
        assert_eq!(event.data, "queued");
        assert_eq!(dispatcher.subscription_count(), 0);
    }

    #[test]
    fn test_full_channel_drops_excess_events() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let mut rx = dispatcher.subscribe_channel::<ObjectCreateEvent>(EventDataFilter::new(1), 1);

        dispatcher.on_frame(&event_frame(1, "first"));
        dispatcher.on_frame(&event_frame(1, "second"));

        assert_eq!(rx.try_recv().map(|e| e.data), Some("first".to_string()));
        assert!(rx.try_recv().is_none());
    }
}
