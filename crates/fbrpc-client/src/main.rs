//! fbrpc demo client.
//!
//! Connects to a server, subscribes to `ObjectCreateEvent`s with id 42, calls
//! `hello_world` and two concurrent `delay_add`s, then waits for Ctrl-C while
//! printing events.
//!
//! ```text
//! fbrpc-demo --address 127.0.0.1 --port 8080
//! fbrpc-demo --config client.toml
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fbrpc_client::{ClientConfig, ConnectStatus, ConnectionEvent, Endpoint, ExampleApi};
use fbrpc_core::protocol::{DelayAddRequest, EventDataFilter, HelloWorldRequest};

/// Command-line arguments; flags override the config file.
#[derive(Debug, Parser)]
#[command(name = "fbrpc-demo", version, about = "fbrpc example client")]
struct Args {
    /// Server host name or IP address.
    #[arg(long, env = "FBRPC_ADDRESS")]
    address: Option<String>,

    /// Server TCP port.
    #[arg(long, env = "FBRPC_PORT")]
    port: Option<u16>,

    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Name sent in the hello_world request.
    #[arg(long, default_value = "Song")]
    name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    if let Some(address) = args.address {
        config.address = address;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("fbrpc demo client starting");

    let endpoint: Endpoint = config.endpoint();
    let api = ExampleApi::new(config);

    // ── Connection notifications ──────────────────────────────────────────────
    let mut events = api.connection_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ConnectionEvent::Connected { peer, .. } => info!("connected to {peer}"),
                ConnectionEvent::ConnectFailed { message, .. } => warn!("connect failed: {message}"),
                ConnectionEvent::Disconnected { reason, .. } => warn!("disconnected: {reason}"),
            }
        }
    });

    // ── Subscribe before connecting so no event is missed ─────────────────────
    api.subscribe_object_create_event(EventDataFilter::new(42), |event| {
        info!(id = event.id, "object created: {}", event.data);
    });

    let outcome = api.connect(&endpoint).await;
    let status = ConnectStatus::from(&outcome);
    info!(result = status.result, "{}", status.message);
    outcome?;

    // ── RPCs ──────────────────────────────────────────────────────────────────
    let hello = api.hello_world(HelloWorldRequest { name: args.name }).await?;
    info!("hello_world -> {}", hello.message);

    let (first, second) = tokio::join!(
        api.delay_add(DelayAddRequest { a: 100, b: 200 }),
        api.delay_add(DelayAddRequest { a: -5, b: 5 }),
    );
    for result in [first, second] {
        match result {
            Ok(reply) => info!("delay_add -> {}", reply.sum),
            Err(e) => error!("delay_add failed: {e}"),
        }
    }

    // ── Wait for events until Ctrl-C ──────────────────────────────────────────
    info!("waiting for events; press Ctrl-C to exit");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    api.close().await;
    Ok(())
}
