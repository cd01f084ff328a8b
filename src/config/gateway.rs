use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Workflow gateway configuration: the external backend that actually
/// creates and removes backups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowGatewayConfig {
    /// Base URL of the workflow API (e.g. `http://conductor:8080/api`).
    pub base_url: String,

    /// Per-call timeout in seconds. Calls must be bounded so poll loops
    /// stay live even if the backend hangs.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Name of the workflow launched to remove a backup.
    #[serde(default = "default_removal_workflow")]
    pub removal_workflow_name: String,

    /// Optional version of the removal workflow.
    #[serde(default)]
    pub removal_workflow_version: Option<String>,
}

impl WorkflowGatewayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.base_url)
            .map_err(|e| ConfigError::Validation(format!("invalid gateway base_url: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "gateway base_url must be http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "gateway timeout_secs must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_timeout() -> u64 {
    10
}

fn default_removal_workflow() -> String {
    "remove_backup".to_string()
}
