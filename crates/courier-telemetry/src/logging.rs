//! Subscriber installation.
//!
//! JSON lines carry `timestamp`, `level`, `target`, the event fields and the
//! span list, ready for a log shipper. Pretty output is for development.

use crate::{TelemetryConfig, TelemetryError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the level filter: `RUST_LOG` directives win over the configured level.
pub fn env_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| TelemetryError::Config(e.to_string()))
}

/// Install the global subscriber.
///
/// Fails with [`TelemetryError::AlreadyInitialized`] if a global subscriber
/// is already set, e.g. by an earlier call in the same process.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = env_filter(config)?;

    let installed = if config.json_logs {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(filter)
            .with(json_layer)
            .try_init()
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_ansi(config.ansi);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
    };
    installed.map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        level = %config.log_level,
        json = config.json_logs,
        "Logging initialized"
    );

    Ok(())
}
