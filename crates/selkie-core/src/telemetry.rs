//! Telemetry and logging initialization
//!
//! TigerStyle: Explicit telemetry configuration, installed once per process.
//!
//! Installs a `tracing-subscriber` fmt layer filtered by `EnvFilter`.
//! `RUST_LOG` wins over the configured level when set.

use crate::error::{Error, Result};

/// Default service name reported in log lines
const SERVICE_NAME_DEFAULT: &str = "selkie";

/// Default log filter
const LOG_LEVEL_DEFAULT: &str = "info";

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name for tracing
    pub service_name: String,
    /// Whether to output traces to stdout
    pub stdout_enabled: bool,
    /// Log level filter, used when `RUST_LOG` is unset
    pub log_level: String,
    /// Whether to emit JSON lines instead of human-readable output
    pub json_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: SERVICE_NAME_DEFAULT.to_string(),
            stdout_enabled: true,
            log_level: LOG_LEVEL_DEFAULT.to_string(),
            json_enabled: false,
        }
    }
}

impl TelemetryConfig {
    /// Create a new configuration with the given service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Disable stdout tracing
    pub fn without_stdout(mut self) -> Self {
        self.stdout_enabled = false;
        self
    }

    /// Set the log level filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Emit JSON lines
    pub fn with_json(mut self) -> Self {
        self.json_enabled = true;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - `SELKIE_SERVICE_NAME`: Service name (default: "selkie")
    /// - `RUST_LOG`: Log level filter (default: "info")
    /// - `SELKIE_LOG_JSON`: Emit JSON lines (default: false)
    pub fn from_env() -> Self {
        let service_name = std::env::var("SELKIE_SERVICE_NAME")
            .unwrap_or_else(|_| SERVICE_NAME_DEFAULT.to_string());

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| LOG_LEVEL_DEFAULT.to_string());

        let json_enabled = std::env::var("SELKIE_LOG_JSON")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false);

        Self {
            service_name,
            stdout_enabled: true,
            log_level,
            json_enabled,
        }
    }
}

/// Guard returned by [`init_telemetry`]
///
/// Holding it keeps the subscriber's configuration alive for the process;
/// dropping it logs the shutdown.
#[derive(Debug)]
pub struct TelemetryGuard {
    service_name: String,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::debug!(service = %self.service_name, "Telemetry shut down");
    }
}

/// Initialize tracing for the process
///
/// # Errors
/// Returns `Internal` if a global subscriber is already installed.
///
/// # Example
///
/// ```rust,ignore
/// use selkie_core::telemetry::{init_telemetry, TelemetryConfig};
///
/// let _guard = init_telemetry(TelemetryConfig::from_env())?;
/// ```
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let (plain_layer, json_layer) = match (config.stdout_enabled, config.json_enabled) {
        (false, _) => (None, None),
        (true, false) => (Some(tracing_subscriber::fmt::layer()), None),
        (true, true) => (None, Some(tracing_subscriber::fmt::layer().json())),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(plain_layer)
        .with(json_layer)
        .try_init()
        .map_err(|e| Error::internal(format!("failed to initialize tracing subscriber: {}", e)))?;

    tracing::info!(
        service = %config.service_name,
        log_level = %config.log_level,
        "Telemetry initialized"
    );

    Ok(TelemetryGuard {
        service_name: config.service_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "selkie");
        assert!(config.stdout_enabled);
        assert!(!config.json_enabled);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_telemetry_config_builder() {
        let config = TelemetryConfig::new("ledger")
            .with_log_level("debug")
            .with_json()
            .without_stdout();

        assert_eq!(config.service_name, "ledger");
        assert_eq!(config.log_level, "debug");
        assert!(config.json_enabled);
        assert!(!config.stdout_enabled);
    }

    #[test]
    fn test_init_telemetry_twice_fails() {
        let first = init_telemetry(TelemetryConfig::new("first").without_stdout());
        let second = init_telemetry(TelemetryConfig::new("second").without_stdout());
        // Whichever test installs first wins; a second install always fails
        assert!(first.is_err() || second.is_err());
    }
}
