//! Server and client configuration.
//!
//! Both configs have sensible defaults and can be overridden from the
//! environment:
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `HOST` | `ServerConfig::host` | `0.0.0.0` |
//! | `PORT` | `ServerConfig::port` | `8787` |
//! | `WS_PATH` | `ServerConfig::ws_path` | `/ws` |
//! | `OUTBOUND_CAPACITY` | `ServerConfig::outbound_capacity` | `256` |
//! | `WS_URL` | `ClientConfig::ws_url` | `ws://localhost:8787/ws` |

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::client::ReconnectPolicy;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("{key} must not be empty")]
    Empty { key: &'static str },
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Bind port (0 = any free port)
    pub port: u16,
    /// HTTP path the WebSocket upgrade is accepted on
    pub ws_path: String,
    /// Frames buffered per connection before new ones are dropped
    pub outbound_capacity: usize,
    /// Events buffered between connection tasks and the event loop
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
            ws_path: "/ws".to_string(),
            outbound_capacity: 256,
            event_capacity: 1024,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `HOST`, `PORT`, `WS_PATH` and `OUTBOUND_CAPACITY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(host) = lookup("HOST") {
            config.host = non_empty("HOST", host)?;
        }
        if let Some(port) = lookup("PORT") {
            config.port = parse("PORT", &port)?;
        }
        if let Some(path) = lookup("WS_PATH") {
            let path = non_empty("WS_PATH", path)?;
            config.ws_path = if path.starts_with('/') { path } else { format!("/{path}") };
        }
        if let Some(capacity) = lookup("OUTBOUND_CAPACITY") {
            config.outbound_capacity = parse("OUTBOUND_CAPACITY", &capacity)?;
            if config.outbound_capacity == 0 {
                return Err(ConfigError::InvalidValue { key: "OUTBOUND_CAPACITY", value: capacity });
            }
        }
        Ok(config)
    }

    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Server endpoint, including the WebSocket path
    pub ws_url: String,
    pub reconnect: ReconnectPolicy,
    /// Frames buffered towards the socket writer
    pub outgoing_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8787/ws".to_string(),
            reconnect: ReconnectPolicy::default(),
            outgoing_capacity: 256,
        }
    }
}

impl ClientConfig {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `WS_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(url) = lookup("WS_URL") {
            let url = non_empty("WS_URL", url)?;
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(ConfigError::InvalidValue { key: "WS_URL", value: url });
            }
            config.ws_url = url;
        }
        Ok(config)
    }

    /// Replace the reconnect policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Convenience for tests: fast, bounded reconnects.
    pub fn with_quick_reconnect(self, max_retries: u32) -> Self {
        self.with_reconnect(ReconnectPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            max_retries,
        })
    }
}

fn non_empty(key: &'static str, value: String) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Empty { key });
    }
    Ok(trimmed.to_string())
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}
