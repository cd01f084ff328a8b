use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Worker loop cadence. Four independent timers run per process: the
/// creation trigger, the operation poll loop, the retention pass, and the
/// delete-retry sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// How often to trigger new backups for due policies (seconds).
    #[serde(default = "default_trigger_interval")]
    pub trigger_interval_secs: u64,

    /// How often to poll outstanding create/delete operations (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// How often to run the retention pass (seconds).
    #[serde(default = "default_retention_interval")]
    pub retention_interval_secs: u64,

    /// How often to retry failed deletions (seconds).
    #[serde(default = "default_delete_retry_interval")]
    pub delete_retry_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            trigger_interval_secs: default_trigger_interval(),
            poll_interval_secs: default_poll_interval(),
            retention_interval_secs: default_retention_interval(),
            delete_retry_interval_secs: default_delete_retry_interval(),
        }
    }
}

impl SchedulerConfig {
    pub fn trigger_interval(&self) -> Duration {
        Duration::from_secs(self.trigger_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention_interval_secs)
    }

    pub fn delete_retry_interval(&self) -> Duration {
        Duration::from_secs(self.delete_retry_interval_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("trigger_interval_secs", self.trigger_interval_secs),
            ("poll_interval_secs", self.poll_interval_secs),
            ("retention_interval_secs", self.retention_interval_secs),
            (
                "delete_retry_interval_secs",
                self.delete_retry_interval_secs,
            ),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation(format!(
                    "scheduler {} must be non-zero",
                    name
                )));
            }
        }
        Ok(())
    }
}

fn default_trigger_interval() -> u64 {
    300
}

fn default_poll_interval() -> u64 {
    10
}

fn default_retention_interval() -> u64 {
    3600
}

fn default_delete_retry_interval() -> u64 {
    600
}
