//! Runtime configuration with validation.
//!
//! Every struct deserializes with defaults for missing fields and can also be
//! read from `COURIER_*` environment variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Broker key prefix shared by queues and reply channels.
pub const DEFAULT_PREFIX: &str = "courier";

/// Default ack wait.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default total budget (ack wait + response wait).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on one blocking dequeue.
pub const DEFAULT_DEQUEUE_POLL: Duration = Duration::from_secs(1);

/// Longest accepted bound on one blocking dequeue.
pub const MAX_DEQUEUE_POLL: Duration = Duration::from_secs(3600);

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid prefix: {0}")]
    InvalidPrefix(String),
    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),
}

/// Queue carrying requests for `identifier`.
pub fn queue_name(prefix: &str, identifier: &str) -> String {
    format!("{}.rpc.{}", prefix, identifier)
}

/// Reply channel for one client instance.
pub fn reply_channel_name(prefix: &str, token: &str) -> String {
    format!("{}.reply.{}", prefix, token)
}

/// RPC client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Broker key prefix
    pub prefix: String,
    /// How long to wait for a server to claim a request
    #[serde(with = "humantime_serde")]
    pub ack_timeout: Duration,
    /// Total budget for a call; the response wait gets `timeout - ack_timeout`
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Read configuration from the environment.
    ///
    /// # Environment Variables
    ///
    /// - `COURIER_PREFIX`: Broker key prefix (default: courier)
    /// - `COURIER_ACK_TIMEOUT_MS`: Ack wait in milliseconds (default: 5000)
    /// - `COURIER_TIMEOUT_MS`: Total call budget in milliseconds (default: 30000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            prefix: env::var("COURIER_PREFIX").unwrap_or(defaults.prefix),
            ack_timeout: env_millis("COURIER_ACK_TIMEOUT_MS").unwrap_or(defaults.ack_timeout),
            timeout: env_millis("COURIER_TIMEOUT_MS").unwrap_or(defaults.timeout),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_prefix(&self.prefix)?;
        EffectiveOptions {
            ack_timeout: self.ack_timeout,
            timeout: self.timeout,
        }
        .validate()
    }
}

/// Per-call overrides of the client defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub ack_timeout: Option<Duration>,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = Some(ack_timeout);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Fill unset fields from the client configuration.
    pub fn resolve(&self, config: &ClientConfig) -> EffectiveOptions {
        EffectiveOptions {
            ack_timeout: self.ack_timeout.unwrap_or(config.ack_timeout),
            timeout: self.timeout.unwrap_or(config.timeout),
        }
    }
}

/// Timeouts in effect for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveOptions {
    pub ack_timeout: Duration,
    pub timeout: Duration,
}

impl EffectiveOptions {
    /// Budget left for the response once the ack phase is over.
    pub fn response_budget(&self) -> Duration {
        self.timeout.saturating_sub(self.ack_timeout)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ack_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "ack_timeout cannot be 0".into(),
            ));
        }
        if self.timeout < self.ack_timeout {
            return Err(ConfigError::InvalidTimeout(format!(
                "timeout ({:?}) is shorter than ack_timeout ({:?})",
                self.timeout, self.ack_timeout
            )));
        }
        Ok(())
    }
}

/// RPC server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Broker key prefix
    pub prefix: String,
    /// Upper bound on one blocking dequeue before the loop re-checks shutdown
    #[serde(with = "humantime_serde")]
    pub dequeue_poll: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            dequeue_poll: DEFAULT_DEQUEUE_POLL,
        }
    }
}

impl ServerConfig {
    /// Read configuration from the environment (`COURIER_PREFIX`,
    /// `COURIER_DEQUEUE_POLL_MS`).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            prefix: env::var("COURIER_PREFIX").unwrap_or(defaults.prefix),
            dequeue_poll: env_millis("COURIER_DEQUEUE_POLL_MS").unwrap_or(defaults.dequeue_poll),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_prefix(&self.prefix)?;
        if self.dequeue_poll.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "dequeue_poll cannot be 0".into(),
            ));
        }
        if self.dequeue_poll > MAX_DEQUEUE_POLL {
            return Err(ConfigError::InvalidTimeout(format!(
                "dequeue_poll ({:?}) exceeds {:?}",
                self.dequeue_poll, MAX_DEQUEUE_POLL
            )));
        }
        Ok(())
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Include fault detail in internal-error replies
    pub reveal_error_messages: bool,
    /// Server settings
    pub server: ServerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            reveal_error_messages: reveal_from_env(),
            server: ServerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Read configuration from the environment.
    ///
    /// # Environment Variables
    ///
    /// - `COURIER_REVEAL_ERRORS`: `true`/`false`, wins when set
    /// - `COURIER_ENV` or `RUST_ENV`: `production` turns reveal off
    pub fn from_env() -> Self {
        Self {
            reveal_error_messages: reveal_from_env(),
            server: ServerConfig::from_env(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()
    }
}

fn reveal_from_env() -> bool {
    if let Ok(value) = env::var("COURIER_REVEAL_ERRORS") {
        return parse_flag(&value);
    }

    let mode = env::var("COURIER_ENV").or_else(|_| env::var("RUST_ENV"));
    reveal_for_mode(mode.ok().as_deref())
}

/// Reveal unless running in explicit production mode.
fn reveal_for_mode(mode: Option<&str>) -> bool {
    !matches!(mode, Some(mode) if mode.eq_ignore_ascii_case("production"))
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

fn validate_prefix(prefix: &str) -> Result<(), ConfigError> {
    if prefix.is_empty() {
        return Err(ConfigError::InvalidPrefix("prefix cannot be empty".into()));
    }
    Ok(())
}

fn env_millis(key: &str) -> Option<Duration> {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}
