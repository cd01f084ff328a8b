//! Configuration module for the orchestrator.
//!
//! Keepsake is configured via a TOML file. Only the workflow gateway URL is
//! required; every other section has sensible defaults.
//!
//! # Example
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 7300
//!
//! [database]
//! path = "/var/lib/keepsake/keepsake.db"
//!
//! [gateway]
//! base_url = "http://conductor:8080/api"
//! ```

mod database;
mod gateway;
mod observability;
mod scheduler;
mod server;

use std::path::{Path, PathBuf};

pub use database::*;
pub use gateway::*;
pub use observability::*;
pub use scheduler::*;
use serde::{Deserialize, Serialize};
pub use server::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Root configuration for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeepsakeConfig {
    /// HTTP server configuration for the admin API.
    #[serde(default)]
    pub server: ServerConfig,

    /// SQLite database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Workflow gateway configuration. Required: the orchestrator cannot
    /// run without a backend to drive.
    pub gateway: WorkflowGatewayConfig,

    /// Worker loop intervals.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Observability configuration (logging, metrics).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl KeepsakeConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;
        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let config: KeepsakeConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency and completeness.
    /// Malformed configuration is the only error fatal at startup.
    fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.gateway.validate()?;
        self.scheduler.validate()?;
        Ok(())
    }
}
