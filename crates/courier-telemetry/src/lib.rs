//! # Courier Telemetry
//!
//! Structured logging for Courier services, built on `tracing-subscriber`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use courier_telemetry::{init_logging, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TelemetryConfig::from_env();
//!     init_logging(&config).expect("Failed to init logging");
//!
//!     // Application code: courier_rpc logs envelope hops at debug level
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `COURIER_SERVICE_NAME` | `courier` | Service name in logs |
//! | `COURIER_LOG_LEVEL` | `info` | Log level filter (falls back to `RUST_LOG`) |
//! | `COURIER_JSON_LOGS` | `false` | JSON output (defaults to true in containers) |

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::{env_filter, init_logging};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Global subscriber already installed: {0}")]
    AlreadyInitialized(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
