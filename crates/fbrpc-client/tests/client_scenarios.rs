//! End-to-end tests: `ExampleApi` against the loopback fake server.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fbrpc_client::{
    ClientConfig, ClientError, ConnectionEvent, ConnectionState, DisconnectReason, ExampleApi,
};
use fbrpc_core::protocol::{
    DelayAddRequest, EventDataFilter, Frame, HelloWorldRequest, ObjectCreateEvent, ProtocolError,
};
use futures_util::future::join_all;
use support::{within, FakeServer};

async fn connected_client() -> (Arc<ExampleApi>, FakeServer) {
    let server = FakeServer::start().await;
    let api = Arc::new(ExampleApi::new(ClientConfig::default()));
    within(api.connect(&server.endpoint))
        .await
        .expect("connect to fake server");
    server.wait_for_connections(1).await;
    (api, server)
}

fn hello(name: &str) -> HelloWorldRequest {
    HelloWorldRequest {
        name: name.to_string(),
    }
}

/// Waits for the next `Disconnected` notification.
async fn next_disconnect(events: &mut tokio::sync::broadcast::Receiver<ConnectionEvent>) -> DisconnectReason {
    within(async {
        loop {
            if let ConnectionEvent::Disconnected { reason, .. } = events.recv().await.unwrap() {
                return reason;
            }
        }
    })
    .await
}

// ── RPCs ──────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_hello_world_greets_caller_by_name() {
    // Arrange
    let (api, _server) = connected_client().await;

    // Act
    let reply = within(api.hello_world(hello("Song"))).await.unwrap();

    // Assert
    assert!(reply.message.contains("Song"), "got {:?}", reply.message);
    assert!(api.is_connected());
}

#[tokio::test]
async fn test_concurrent_delay_add_resolves_regardless_of_reply_order() {
    // Arrange – the fake server delays by `a` ms, so the second reply wins
    let (api, _server) = connected_client().await;

    // Act
    let (slow, fast) = within(async {
        tokio::join!(
            api.delay_add(DelayAddRequest { a: 100, b: 200 }),
            api.delay_add(DelayAddRequest { a: 1, b: 2 }),
        )
    })
    .await;

    // Assert
    assert_eq!(slow.unwrap().sum, 300);
    assert_eq!(fast.unwrap().sum, 3);
}

#[tokio::test]
async fn test_many_concurrent_callers_each_receive_their_own_reply() {
    // Arrange
    let (api, server) = connected_client().await;
    let inputs: Vec<i32> = (0..32).map(|i| (i * 37) % 50).collect();

    // Act
    let calls = inputs.iter().map(|&a| {
        let api = Arc::clone(&api);
        async move { api.delay_add(DelayAddRequest { a, b: 1000 }).await }
    });
    let replies = within(join_all(calls)).await;

    // Assert
    for (a, reply) in inputs.iter().zip(replies) {
        assert_eq!(reply.unwrap().sum, a + 1000);
    }
    assert_eq!(server.requests(), inputs.len());
}

#[tokio::test]
async fn test_server_error_reply_rejects_only_that_call() {
    let (api, _server) = connected_client().await;

    let failed = within(api.hello_world(hello("error"))).await;
    let ok = within(api.hello_world(hello("after"))).await;

    assert!(matches!(failed, Err(ClientError::Remote { code: 500, .. })));
    assert_eq!(ok.unwrap().message, "Hello, after");
}

#[tokio::test]
async fn test_malformed_response_rejects_only_that_call() {
    let (api, _server) = connected_client().await;

    let failed = within(api.hello_world(hello("garbage"))).await;
    let ok = within(api.hello_world(hello("next"))).await;

    assert!(matches!(failed, Err(ClientError::MalformedPayload(_))));
    assert!(ok.is_ok());
    assert!(api.is_connected());
}

#[tokio::test]
async fn test_request_timeout_leaves_connection_usable() {
    // Arrange
    let (api, _server) = connected_client().await;

    // Act
    let timed_out = api
        .call_with_timeout(&hello("silent"), Some(Duration::from_millis(50)))
        .await;
    let ok = within(api.hello_world(hello("still here"))).await;

    // Assert
    assert!(matches!(timed_out, Err(ClientError::RequestTimeout { .. })));
    assert!(ok.is_ok());
}

// ── Events ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_filter_42_receives_key_42_and_not_key_7() {
    // Arrange – the callback subscriber goes first so it has run by the time
    // the channel subscriber sees the event
    let (api, server) = connected_client().await;
    let second_42 = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&second_42);
    api.subscribe_object_create_event(EventDataFilter::new(42), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let mut events_42 = api.subscribe_channel::<ObjectCreateEvent>(EventDataFilter::new(42));

    // Act – the key-7 event is pushed first
    server.send_event(7, "seven").await;
    server.send_event(42, "forty-two").await;
    let first = within(events_42.recv()).await.unwrap();

    // Assert
    assert_eq!(first.id, 42);
    assert_eq!(first.data, "forty-two");
    assert_eq!(second_42.load(Ordering::SeqCst), 1, "fan-out to every matching subscriber");
    assert!(events_42.try_recv().is_none());
}

#[tokio::test]
async fn test_malformed_frames_are_skipped_and_later_frames_delivered() {
    // Arrange
    let (api, server) = connected_client().await;
    let mut events = api.subscribe_channel::<ObjectCreateEvent>(EventDataFilter::new(42));

    let mut unknown_kind = Frame::event(&ObjectCreateEvent::default()).unwrap().encode().unwrap();
    unknown_kind[4] = 0x7F;
    let short_header = vec![0, 0, 0, 3, 0x03, 0, 0];
    let mut truncated_event = Frame::event(&ObjectCreateEvent { id: 42, data: "x".into() }).unwrap();
    truncated_event.payload.truncate(2);

    // Act
    server.send_raw(unknown_kind).await;
    server.send_raw(short_header).await;
    server.send_raw(truncated_event.encode().unwrap()).await;
    server.send_event(42, "survivor").await;

    // Assert
    let event = within(events.recv()).await.unwrap();
    assert_eq!(event.data, "survivor");
    assert!(within(api.hello_world(hello("ok"))).await.is_ok());
}

// ── Connection lifecycle ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_server_disconnect_rejects_pending_and_notifies() {
    // Arrange
    let (api, server) = connected_client().await;
    let mut events = api.connection_events();
    let pending = {
        let api = Arc::clone(&api);
        tokio::spawn(async move { api.hello_world(hello("silent")).await })
    };
    while server.requests() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Act
    server.disconnect().await;

    // Assert
    assert_eq!(next_disconnect(&mut events).await, DisconnectReason::PeerClosed);
    let result = within(pending).await.unwrap();
    assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    assert_eq!(api.state(), ConnectionState::Closed);

    let requests_before = server.requests();
    let after = api.hello_world(hello("late")).await;
    assert!(matches!(after, Err(ClientError::ConnectionClosed)));
    assert_eq!(server.requests(), requests_before, "nothing may be sent after close");
}

#[tokio::test]
async fn test_local_close_rejects_pending_calls() {
    // Arrange
    let (api, server) = connected_client().await;
    let pending = {
        let api = Arc::clone(&api);
        tokio::spawn(async move { api.hello_world(hello("silent")).await })
    };
    while server.requests() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Act
    within(api.close()).await;

    // Assert
    let result = within(pending).await.unwrap();
    assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    assert_eq!(api.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_reconnect_replaces_session_and_keeps_subscriptions() {
    // Arrange
    let (api, server) = connected_client().await;
    let mut events = api.subscribe_channel::<ObjectCreateEvent>(EventDataFilter::new(42));
    let stale = {
        let api = Arc::clone(&api);
        tokio::spawn(async move { api.hello_world(hello("silent")).await })
    };
    while server.requests() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Act
    within(api.connect(&server.endpoint)).await.unwrap();
    server.wait_for_connections(2).await;
    server.send_event(42, "after reconnect").await;

    // Assert
    let result = within(stale).await.unwrap();
    assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    assert_eq!(within(events.recv()).await.unwrap().data, "after reconnect");
    assert!(within(api.hello_world(hello("new session"))).await.is_ok());
}

#[tokio::test]
async fn test_oversized_frame_tears_connection_down() {
    let (api, server) = connected_client().await;
    let mut events = api.connection_events();

    server.send_raw(u32::MAX.to_be_bytes().to_vec()).await;

    let reason = next_disconnect(&mut events).await;
    assert!(matches!(
        reason,
        DisconnectReason::Protocol(ProtocolError::FrameTooLarge { .. })
    ));
    assert!(!api.is_connected());
}
