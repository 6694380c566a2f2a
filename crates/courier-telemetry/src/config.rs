//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for structured logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to every log line
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error, or a directive list)
    pub log_level: String,

    /// Whether to enable JSON formatted logs
    pub json_logs: bool,

    /// Whether to use ANSI colors in pretty output
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "courier".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            ansi: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `COURIER_SERVICE_NAME`: Service name (default: courier)
    /// - `COURIER_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `COURIER_JSON_LOGS`: Enable JSON logs (default: false in dev, true in containers)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("COURIER_SERVICE_NAME")
                .unwrap_or_else(|_| "courier".to_string()),

            log_level: env::var("COURIER_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            json_logs: env::var("COURIER_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(is_container),

            ansi: !is_container,
        }
    }

    /// Configuration for a named service, the rest from the environment.
    pub fn for_service(service_name: &str) -> Self {
        let mut config = Self::from_env();
        config.service_name = service_name.to_string();
        config
    }

    /// Quiet configuration for test binaries.
    pub fn for_tests() -> Self {
        Self {
            service_name: "courier-tests".to_string(),
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()),
            json_logs: false,
            ansi: false,
        }
    }
}
