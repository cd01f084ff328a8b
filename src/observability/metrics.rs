//! Prometheus metrics for the orchestrator.
//!
//! Provides counters and gauges for:
//! - Backup triggering, completion, and skips
//! - Tagging pass activity
//! - Retention elections and delete outcomes
//! - Workflow gateway call latency

use std::sync::OnceLock;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

use crate::config::MetricsConfig;

/// Global Prometheus handle for the metrics endpoint.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),

    #[error("Metrics setup failed: {0}")]
    Setup(String),
}

/// Initialize the metrics system with the given configuration.
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    Ok(())
}

/// Get the Prometheus handle for rendering metrics.
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record the outcome of a backup trigger attempt
/// ("started", "skipped_running", "skipped_inactive", "error").
pub fn record_backup_trigger(policy: &str, outcome: &str) {
    counter!("backup_triggers_total", "policy" => policy.to_string(), "outcome" => outcome.to_string())
        .increment(1);
}

/// Record a materialized backup completion by terminal status.
pub fn record_backup_completed(policy: &str, status: &str) {
    counter!("backups_completed_total", "policy" => policy.to_string(), "status" => status.to_string())
        .increment(1);
}

/// Record the size of the last successful backup.
pub fn record_backup_last_size(policy: &str, size_mb: f64) {
    gauge!("backup_last_size_mbytes", "policy" => policy.to_string()).set(size_mb);
}

/// Record the wall-clock duration of the last successful backup.
pub fn record_backup_last_duration(policy: &str, duration_secs: f64) {
    gauge!("backup_last_duration_seconds", "policy" => policy.to_string()).set(duration_secs);
}

/// Record rows tagged by a completed tagging pass.
pub fn record_tagging_pass(policy: &str, rows: u64) {
    counter!("backups_tagged_total", "policy" => policy.to_string()).increment(rows);
}

/// Record a failed tagging pass.
pub fn record_tagging_error(policy: &str) {
    counter!("tagging_errors_total", "policy" => policy.to_string()).increment(1);
}

/// Record how many backups a retention pass elected for deletion.
pub fn record_retention_election(policy: &str, count: u64) {
    counter!("retention_elected_total", "policy" => policy.to_string()).increment(count);
}

/// Record the outcome of a delete operation ("deleted", "delete-error").
pub fn record_delete_result(policy: &str, status: &str) {
    counter!("backup_deletes_total", "policy" => policy.to_string(), "status" => status.to_string())
        .increment(1);
}

/// Record a delete retry attempt.
pub fn record_delete_retry(policy: &str) {
    counter!("backup_delete_retries_total", "policy" => policy.to_string()).increment(1);
}

/// Record a workflow gateway call.
pub fn record_gateway_call(operation: &str, status: &str, duration_secs: f64) {
    counter!("gateway_calls_total", "operation" => operation.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!("gateway_call_duration_seconds", "operation" => operation.to_string())
        .record(duration_secs);
}

/// Record a skipped record whose conditional update affected an unexpected
/// number of rows.
pub fn record_invariant_violation(context: &str) {
    counter!("invariant_violations_total", "context" => context.to_string()).increment(1);
}
