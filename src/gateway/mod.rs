//! Workflow gateway: the narrow request/response contract through which the
//! orchestrator drives the external backup backend.
//!
//! The backend executes backup creation and removal as asynchronous workflow
//! operations; this module only launches them and inspects their state. All
//! outbound calls are serialized through one internal mutex so concurrent
//! worker loops cannot storm a rate-limited backend, and every call carries a
//! bounded timeout so poll loops stay live if the backend hangs.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::{config::WorkflowGatewayConfig, models::BackupPolicy, observability::metrics};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Gateway request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Gateway returned status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Invalid gateway response: {0}")]
    InvalidResponse(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// State of a workflow operation as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkflowStatus::Running)
    }
}

/// Snapshot of a workflow operation returned by `inspect`.
#[derive(Debug, Clone)]
pub struct WorkflowExecution {
    pub operation_id: String,
    pub status: WorkflowStatus,
    pub data_ref: Option<String>,
    pub size_mb: Option<f64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// The external collaborator that creates and removes backups.
#[async_trait]
pub trait WorkflowGateway: Send + Sync {
    /// Launch a backup-creation workflow for the policy. Returns the
    /// operation id to poll.
    async fn create_backup(&self, policy: &BackupPolicy) -> GatewayResult<String>;

    /// Launch a removal workflow for the backup identified by `data_ref`.
    /// Returns the operation id to poll.
    async fn create_removal(&self, data_ref: &str) -> GatewayResult<String>;

    /// Inspect an outstanding operation.
    async fn inspect(&self, operation_id: &str) -> GatewayResult<WorkflowExecution>;
}

/// HTTP gateway against a Conductor-style workflow API:
/// `POST /workflow` launches, `GET /workflow/{id}` inspects.
pub struct HttpWorkflowGateway {
    client: reqwest::Client,
    base_url: String,
    removal_workflow_name: String,
    removal_workflow_version: Option<String>,
    /// Serializes outbound calls; a politeness control, not a correctness
    /// requirement.
    call_lock: Mutex<()>,
}

#[derive(Debug, Deserialize)]
struct WorkflowInstance {
    status: String,
    #[serde(rename = "startTime")]
    start_time: Option<i64>,
    #[serde(rename = "endTime")]
    end_time: Option<i64>,
    #[serde(default)]
    output: WorkflowOutput,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowOutput {
    #[serde(rename = "dataRef")]
    data_ref: Option<String>,
    #[serde(rename = "sizeMB")]
    size_mb: Option<f64>,
}

impl HttpWorkflowGateway {
    pub fn from_config(config: &WorkflowGatewayConfig) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            removal_workflow_name: config.removal_workflow_name.clone(),
            removal_workflow_version: config.removal_workflow_version.clone(),
            call_lock: Mutex::new(()),
        })
    }

    async fn launch(&self, operation: &str, payload: serde_json::Value) -> GatewayResult<String> {
        let _guard = self.call_lock.lock().await;
        let start = Instant::now();
        let url = format!("{}/workflow", self.base_url);

        let response = match self.client.post(&url).json(&payload).send().await {
            Ok(r) => r,
            Err(e) => {
                metrics::record_gateway_call(operation, "error", start.elapsed().as_secs_f64());
                return Err(e.into());
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            metrics::record_gateway_call(operation, "error", start.elapsed().as_secs_f64());
            return Err(GatewayError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        // The workflow API answers a launch with the bare operation id.
        let operation_id = body.trim().trim_matches('"').to_string();
        if operation_id.is_empty() {
            metrics::record_gateway_call(operation, "error", start.elapsed().as_secs_f64());
            return Err(GatewayError::InvalidResponse(
                "launch returned an empty operation id".to_string(),
            ));
        }

        metrics::record_gateway_call(operation, "success", start.elapsed().as_secs_f64());
        Ok(operation_id)
    }

    fn map_status(raw: &str) -> GatewayResult<WorkflowStatus> {
        match raw {
            "RUNNING" | "PAUSED" => Ok(WorkflowStatus::Running),
            "COMPLETED" => Ok(WorkflowStatus::Completed),
            "FAILED" | "TERMINATED" | "TIMED_OUT" => Ok(WorkflowStatus::Failed),
            other => Err(GatewayError::InvalidResponse(format!(
                "unknown workflow status '{}'",
                other
            ))),
        }
    }
}

#[async_trait]
impl WorkflowGateway for HttpWorkflowGateway {
    async fn create_backup(&self, policy: &BackupPolicy) -> GatewayResult<String> {
        tracing::debug!(policy = %policy.name, workflow = %policy.workflow_name, "Launching create workflow");
        let payload = serde_json::json!({
            "name": policy.workflow_name,
            "version": policy.workflow_version,
            "input": { "backupName": policy.name },
        });
        self.launch("create", payload).await
    }

    async fn create_removal(&self, data_ref: &str) -> GatewayResult<String> {
        tracing::debug!(data_ref = %data_ref, "Launching removal workflow");
        let payload = serde_json::json!({
            "name": self.removal_workflow_name,
            "version": self.removal_workflow_version,
            "input": { "dataRef": data_ref },
        });
        self.launch("remove", payload).await
    }

    async fn inspect(&self, operation_id: &str) -> GatewayResult<WorkflowExecution> {
        let _guard = self.call_lock.lock().await;
        let start = Instant::now();
        let url = format!(
            "{}/workflow/{}?includeTasks=false",
            self.base_url, operation_id
        );

        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                metrics::record_gateway_call("inspect", "error", start.elapsed().as_secs_f64());
                return Err(e.into());
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            metrics::record_gateway_call("inspect", "error", start.elapsed().as_secs_f64());
            return Err(GatewayError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let instance: WorkflowInstance = match response.json().await {
            Ok(i) => i,
            Err(e) => {
                metrics::record_gateway_call("inspect", "error", start.elapsed().as_secs_f64());
                return Err(e.into());
            }
        };

        metrics::record_gateway_call("inspect", "success", start.elapsed().as_secs_f64());
        Ok(WorkflowExecution {
            operation_id: operation_id.to_string(),
            status: Self::map_status(&instance.status)?,
            data_ref: instance.output.data_ref,
            size_mb: instance.output.size_mb,
            start_time: instance.start_time.and_then(DateTime::from_timestamp_millis),
            end_time: instance.end_time.and_then(DateTime::from_timestamp_millis),
        })
    }
}
