//! Tracing setup for quire hosts.
//!
//! # Usage
//!
//! ```ignore
//! use quire_common::telemetry::{self, TelemetryConfig};
//!
//! telemetry::init(TelemetryConfig::from_env("quire-desktop"));
//! tracing::info!("editor host started");
//! ```

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup event.
    pub service_name: String,
    /// Console log level when `RUST_LOG` is unset (DEBUG in debug builds, INFO otherwise).
    pub console_level: Level,
    /// Emit file/line information with each event.
    pub with_location: bool,
}

impl TelemetryConfig {
    /// Build a config from the environment.
    ///
    /// - `RUST_LOG`: standard env filter (optional, overrides `console_level`)
    /// - `QUIRE_LOG_LOCATION`: set to `1` to include file and line numbers
    pub fn from_env(service_name: impl Into<String>) -> Self {
        let console_level = if cfg!(debug_assertions) {
            Level::DEBUG
        } else {
            Level::INFO
        };

        Self {
            service_name: service_name.into(),
            console_level,
            with_location: std::env::var("QUIRE_LOG_LOCATION").is_ok_and(|v| v == "1"),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Returns `false` if a subscriber was already installed (the call is then a no-op).
pub fn init(config: TelemetryConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.console_level.as_str().to_lowercase()));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(config.with_location)
        .with_line_number(config.with_location)
        .compact()
        .with_filter(env_filter);

    let installed = tracing_subscriber::registry()
        .with(console_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(service = %config.service_name, "telemetry initialized");
    }
    installed
}
