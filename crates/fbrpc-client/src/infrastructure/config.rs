//! TOML configuration for the fbrpc client.
//!
//! Every field has a serde default, so an empty file (or no file at all) is a
//! valid configuration.  Example:
//!
//! ```toml
//! address = "10.0.0.5"
//! port = 9000
//! connect_timeout_ms = 2000
//! request_timeout_ms = 30000
//! log_level = "debug"
//! ```
//!
//! # Serde default values (for beginners)
//!
//! `#[serde(default = "some_fn")]` tells serde to call `some_fn()` when the
//! field is missing from the TOML text.  Older config files therefore keep
//! working when new fields are added.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fbrpc_core::protocol::frame::DEFAULT_MAX_FRAME_LEN;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is unusable.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Endpoint ──────────────────────────────────────────────────────────────────

/// Host name or IP literal plus TCP port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.contains(':') {
            // IPv6 literal
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

// ── Client configuration ──────────────────────────────────────────────────────

/// Settings for one [`crate::ExampleApi`] instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Default server address used by the demo binary.
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound on name resolution plus TCP connect.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-request deadline; absent means requests wait until the connection
    /// closes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,

    /// Largest length prefix accepted from the server.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: u32,

    /// Frames queued for the writer task before `send` waits.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Requests allowed in flight at once.
    #[serde(default = "default_max_pending_requests")]
    pub max_pending_requests: usize,

    /// Buffer size of receivers returned by `subscribe_channel`.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Fallback log filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_max_frame_len() -> u32 {
    DEFAULT_MAX_FRAME_LEN
}
fn default_outbound_queue_capacity() -> usize {
    256
}
fn default_max_pending_requests() -> usize {
    4096
}
fn default_event_channel_capacity() -> usize {
    64
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: None,
            max_frame_len: default_max_frame_len(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            max_pending_requests: default_max_pending_requests(),
            event_channel_capacity: default_event_channel_capacity(),
            log_level: default_log_level(),
        }
    }
}

impl ClientConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML, [`ConfigError::Invalid`]
    /// for zero-sized limits.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let cfg: ClientConfig = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads the config at `path`, returning defaults if the file does not
    /// exist.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] for file-system errors other than "not found",
    /// otherwise see [`ClientConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("outbound_queue_capacity", self.outbound_queue_capacity),
            ("max_pending_requests", self.max_pending_requests),
            ("event_channel_capacity", self.event_channel_capacity),
        ];
        for (field, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.max_frame_len < fbrpc_core::protocol::frame::FRAME_HEADER_SIZE as u32 {
            return Err(ConfigError::Invalid {
                field: "max_frame_len",
                reason: format!("{} is smaller than a frame header", self.max_frame_len),
            });
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.address.clone(), self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
