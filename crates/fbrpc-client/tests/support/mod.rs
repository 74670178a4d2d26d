//! Loopback fake fbrpc server for integration tests.
//!
//! Behaviour per request:
//!
//! | Request                          | Reply                                   |
//! |----------------------------------|-----------------------------------------|
//! | `HelloWorldRequest { name }`     | `HelloWorldResponse("Hello, {name}")`   |
//! | `HelloWorldRequest("error")`     | `Error` frame, code 500                 |
//! | `HelloWorldRequest("garbage")`   | `Response` frame with a truncated body  |
//! | `HelloWorldRequest("silent")`    | no reply                                |
//! | `DelayAddRequest { a, b }`       | `a + b` after `a` ms (clamped 0..=500)  |
//! | anything else                    | `Error` frame, code 404                 |
//!
//! Tests can also push raw bytes or events to the most recent connection and
//! drop it from the server side.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fbrpc_client::Endpoint;
use fbrpc_core::protocol::{
    DelayAddRequest, DelayAddResponse, Frame, FrameBuffer, FrameKind, HelloWorldRequest,
    HelloWorldResponse, ObjectCreateEvent, RpcErrorMessage, SchemaId,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Upper bound for any single wait in the integration tests.
pub const TEST_DEADLINE: Duration = Duration::from_secs(5);

/// Awaits `fut`, failing the test if it takes longer than [`TEST_DEADLINE`].
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(TEST_DEADLINE, fut)
        .await
        .expect("operation did not finish in time")
}

enum Outgoing {
    Bytes(Vec<u8>),
    Close,
}

type ConnectionTx = mpsc::UnboundedSender<Outgoing>;

pub struct FakeServer {
    pub endpoint: Endpoint,
    current: Arc<Mutex<Option<ConnectionTx>>>,
    connections: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
    accept_task: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
        let port = listener.local_addr().expect("local addr").port();

        let current: Arc<Mutex<Option<ConnectionTx>>> = Arc::new(Mutex::new(None));
        let connections = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(AtomicUsize::new(0));

        let accept_task = {
            let current = Arc::clone(&current);
            let connections = Arc::clone(&connections);
            let requests = Arc::clone(&requests);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let (tx, rx) = mpsc::unbounded_channel();
                    *current.lock().unwrap() = Some(tx.clone());
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(stream, tx, rx, Arc::clone(&requests)));
                }
            })
        };

        Self {
            endpoint: Endpoint::new("127.0.0.1", port),
            current,
            connections,
            requests,
            accept_task,
        }
    }

    /// Number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Number of request frames received so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Waits until the server has accepted `n` connections.
    pub async fn wait_for_connections(&self, n: usize) {
        within(async {
            while self.connections() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
    }

    async fn latest(&self) -> ConnectionTx {
        within(async {
            loop {
                if let Some(tx) = self.current.lock().unwrap().clone() {
                    return tx;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
    }

    /// Writes `bytes` verbatim to the most recent connection.
    pub async fn send_raw(&self, bytes: Vec<u8>) {
        let _ = self.latest().await.send(Outgoing::Bytes(bytes));
    }

    pub async fn send_event(&self, id: i32, data: &str) {
        let event = ObjectCreateEvent {
            id,
            data: data.to_string(),
        };
        self.send_raw(Frame::event(&event).unwrap().encode().unwrap()).await;
    }

    /// Closes the most recent connection from the server side.
    pub async fn disconnect(&self) {
        let _ = self.latest().await.send(Outgoing::Close);
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve(
    stream: TcpStream,
    tx: ConnectionTx,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
    requests: Arc<AtomicUsize>,
) {
    let (mut read_half, mut write_half) = stream.into_split();

    tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            match out {
                Outgoing::Bytes(bytes) => {
                    if write_half.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                Outgoing::Close => break,
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut buffer = FrameBuffer::new();
    let mut chunk = vec![0u8; 4096];
    loop {
        let n = match read_half.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buffer.extend(&chunk[..n]);
        while let Some(Ok(frame)) = buffer.next_frame() {
            requests.fetch_add(1, Ordering::SeqCst);
            if let Some((delay, reply)) = answer(&frame) {
                let tx = tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Outgoing::Bytes(reply));
                });
            }
        }
    }
}

fn answer(frame: &Frame) -> Option<(Duration, Vec<u8>)> {
    if frame.kind != FrameKind::Request {
        return None;
    }
    let id = frame.correlation_id;
    let (delay, reply) = match frame.schema() {
        Ok(SchemaId::HelloWorldRequest) => {
            let req: HelloWorldRequest = frame.decode_payload().ok()?;
            let reply = match req.name.as_str() {
                "silent" => return None,
                "error" => Frame::error(
                    id,
                    &RpcErrorMessage {
                        code: 500,
                        message: "requested failure".to_string(),
                    },
                )
                .ok()?,
                "garbage" => Frame::new(
                    FrameKind::Response,
                    id,
                    SchemaId::HelloWorldResponse as u16,
                    vec![0xFF],
                ),
                name => Frame::response(
                    id,
                    &HelloWorldResponse {
                        message: format!("Hello, {name}"),
                    },
                )
                .ok()?,
            };
            (Duration::ZERO, reply)
        }
        Ok(SchemaId::DelayAddRequest) => {
            let req: DelayAddRequest = frame.decode_payload().ok()?;
            let delay = Duration::from_millis(req.a.clamp(0, 500) as u64);
            let reply = Frame::response(
                id,
                &DelayAddResponse {
                    sum: req.a.wrapping_add(req.b),
                },
            )
            .ok()?;
            (delay, reply)
        }
        _ => {
            let reply = Frame::error(
                id,
                &RpcErrorMessage {
                    code: 404,
                    message: format!("unknown schema 0x{:04X}", frame.schema_id),
                },
            )
            .ok()?;
            (Duration::ZERO, reply)
        }
    };
    Some((delay, reply.encode().ok()?))
}
