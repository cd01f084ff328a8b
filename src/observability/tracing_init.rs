//! Tracing initialization with configurable logging formats.

use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, ObservabilityConfig};

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("Tracing already initialized: {0}")]
    Init(String),
}

/// Initialize the tracing subscriber with the given configuration.
///
/// The configured level acts as the default; `RUST_LOG` overrides it when
/// set, so operators can raise verbosity per module without touching the
/// config file.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<(), TracingError> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(_) => EnvFilter::try_from_default_env().map_err(|e| TracingError::Filter(e.to_string()))?,
        Err(_) => EnvFilter::try_new(&config.logging.level)
            .map_err(|e| TracingError::Filter(e.to_string()))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.logging.format {
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact().with_target(true))
            .try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init(),
    };

    result.map_err(|e| TracingError::Init(e.to_string()))
}
