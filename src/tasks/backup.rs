//! Backup task state machine: trigger → poll → materialize.
//!
//! Triggering launches a create workflow through the gateway and records its
//! operation id on the policy row; the poll pass inspects outstanding
//! operations and, on a terminal status, materializes a `BackupRecord` and
//! re-runs the tagging cascade under the per-policy lock. The backend owns
//! operation timeouts; no client-side cancel is ever issued.

use std::sync::Arc;

use chrono::Utc;

use super::{PolicyLocks, TaskError};
use crate::{
    config::SchedulerConfig,
    db::{DbError, DbPool},
    engine::tagging,
    gateway::{WorkflowExecution, WorkflowGateway, WorkflowStatus},
    models::{BackupPolicy, BackupStatus, NewBackup},
    observability::metrics,
};

/// Outcome of a single trigger attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A create workflow was launched.
    Started { operation_id: String },
    /// Another create operation is still outstanding; the trigger is an
    /// idempotent no-op.
    SkippedRunning,
    /// The policy is disabled or outside its activation window.
    SkippedInactive,
}

/// Results from a trigger pass over all policies.
#[derive(Debug, Default)]
pub struct TriggerRunResult {
    pub started: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// Results from a create-operation poll pass.
#[derive(Debug, Default)]
pub struct PollRunResult {
    pub completed: u64,
    pub failed: u64,
    pub still_running: u64,
}

/// Attempt to launch a backup for the policy.
///
/// Rejected (as a no-op, not an error) while the policy is inactive or a
/// prior create operation is still running. An operation found to have
/// finished out of band is materialized before the new launch.
pub async fn trigger_backup(
    db: &Arc<DbPool>,
    gateway: &Arc<dyn WorkflowGateway>,
    locks: &Arc<PolicyLocks>,
    policy: &BackupPolicy,
) -> Result<TriggerOutcome, TaskError> {
    if !policy.is_active_at(Utc::now()) {
        tracing::debug!(policy = %policy.name, "Policy inactive, skipping backup trigger");
        metrics::record_backup_trigger(&policy.name, "skipped_inactive");
        return Ok(TriggerOutcome::SkippedInactive);
    }

    if let Some(operation_id) = &policy.running_create_operation {
        match gateway.inspect(operation_id).await {
            Ok(execution) if !execution.status.is_terminal() => {
                tracing::info!(
                    policy = %policy.name,
                    operation_id = %operation_id,
                    "Another backup operation is still running, skipping trigger"
                );
                metrics::record_backup_trigger(&policy.name, "skipped_running");
                return Ok(TriggerOutcome::SkippedRunning);
            }
            Ok(execution) => {
                tracing::info!(
                    policy = %policy.name,
                    operation_id = %operation_id,
                    "Previous backup operation finished out of band, materializing"
                );
                materialize_finished(db, locks, policy, &execution).await?;
            }
            Err(e) => {
                // Can't tell whether the operation is still running; skip
                // rather than risk a second concurrent backup.
                tracing::warn!(
                    policy = %policy.name,
                    operation_id = %operation_id,
                    error = %e,
                    "Couldn't inspect outstanding operation, skipping trigger"
                );
                metrics::record_backup_trigger(&policy.name, "skipped_running");
                return Ok(TriggerOutcome::SkippedRunning);
            }
        }
    }

    let operation_id = match gateway.create_backup(policy).await {
        Ok(id) => id,
        Err(e) => {
            metrics::record_backup_trigger(&policy.name, "error");
            return Err(e.into());
        }
    };
    db.policies()
        .set_running_create_operation(&policy.name, Some(&operation_id))
        .await?;

    tracing::info!(
        policy = %policy.name,
        operation_id = %operation_id,
        "Backup workflow launched, tracking until completion"
    );
    metrics::record_backup_trigger(&policy.name, "started");
    Ok(TriggerOutcome::Started { operation_id })
}

/// Materialize a finished create operation: insert the ledger record, clear
/// the policy's running operation, and re-tag. Holds the per-policy lock so
/// retention never sees the new backup untagged.
pub(crate) async fn materialize_finished(
    db: &Arc<DbPool>,
    locks: &Arc<PolicyLocks>,
    policy: &BackupPolicy,
    execution: &WorkflowExecution,
) -> Result<(), TaskError> {
    let lock = locks.lock_for(&policy.name);
    let _guard = lock.lock().await;

    let status = match execution.status {
        WorkflowStatus::Completed => BackupStatus::Available,
        WorkflowStatus::Running | WorkflowStatus::Failed => BackupStatus::Error,
    };
    let end_time = execution.end_time.unwrap_or_else(Utc::now);
    let start_time = execution.start_time.unwrap_or(end_time);

    let inserted = db
        .backups()
        .insert(NewBackup {
            id: execution.operation_id.clone(),
            policy_name: policy.name.clone(),
            data_ref: execution.data_ref.clone(),
            status,
            start_time,
            end_time,
            size_mb: execution.size_mb,
        })
        .await;
    match inserted {
        Ok(()) => {
            tracing::info!(
                policy = %policy.name,
                backup_id = %execution.operation_id,
                status = %status,
                "Backup materialized"
            );
        }
        // A concurrent path already materialized this operation.
        Err(DbError::Conflict(_)) => {
            tracing::debug!(
                policy = %policy.name,
                backup_id = %execution.operation_id,
                "Backup already materialized"
            );
        }
        Err(e) => return Err(e.into()),
    }

    db.policies()
        .set_running_create_operation(&policy.name, None)
        .await?;
    metrics::record_backup_completed(&policy.name, status.as_str());

    if status == BackupStatus::Available {
        if let Some(size_mb) = execution.size_mb {
            metrics::record_backup_last_size(&policy.name, size_mb);
        }
        metrics::record_backup_last_duration(
            &policy.name,
            (end_time - start_time).num_milliseconds() as f64 / 1000.0,
        );

        let backups = db.backups();
        if let Err(e) = tagging::run_tagging_pass(&backups, policy).await {
            // Tags are stale until the next successful pass; the record
            // itself is safely materialized.
            tracing::error!(
                policy = %policy.name,
                backup_id = %execution.operation_id,
                error = %e,
                "Tagging pass failed after materialization"
            );
            metrics::record_tagging_error(&policy.name);
        }
    }

    Ok(())
}

/// Trigger backups for every policy. Per-policy failures are absorbed.
pub async fn run_trigger_pass(
    db: &Arc<DbPool>,
    gateway: &Arc<dyn WorkflowGateway>,
    locks: &Arc<PolicyLocks>,
) -> Result<TriggerRunResult, TaskError> {
    let policies = db.policies().list().await?;
    let mut result = TriggerRunResult::default();

    for policy in &policies {
        match trigger_backup(db, gateway, locks, policy).await {
            Ok(TriggerOutcome::Started { .. }) => result.started += 1,
            Ok(_) => result.skipped += 1,
            Err(e) => {
                result.errors += 1;
                tracing::error!(policy = %policy.name, error = %e, "Error triggering backup");
            }
        }
    }

    Ok(result)
}

/// Inspect every policy's outstanding create operation and materialize the
/// finished ones.
pub async fn run_create_poll_pass(
    db: &Arc<DbPool>,
    gateway: &Arc<dyn WorkflowGateway>,
    locks: &Arc<PolicyLocks>,
) -> Result<PollRunResult, TaskError> {
    let policies = db.policies().list().await?;
    let mut result = PollRunResult::default();

    for policy in &policies {
        let Some(operation_id) = &policy.running_create_operation else {
            continue;
        };
        match gateway.inspect(operation_id).await {
            Ok(execution) if !execution.status.is_terminal() => {
                tracing::debug!(
                    policy = %policy.name,
                    operation_id = %operation_id,
                    "Backup operation still running"
                );
                result.still_running += 1;
            }
            Ok(execution) => {
                tracing::info!(
                    policy = %policy.name,
                    operation_id = %operation_id,
                    "Backup operation finish detected"
                );
                match materialize_finished(db, locks, policy, &execution).await {
                    Ok(()) if execution.status == WorkflowStatus::Completed => {
                        result.completed += 1;
                    }
                    Ok(()) => result.failed += 1,
                    Err(e) => {
                        tracing::error!(
                            policy = %policy.name,
                            operation_id = %operation_id,
                            error = %e,
                            "Couldn't materialize finished backup, will retry"
                        );
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    policy = %policy.name,
                    operation_id = %operation_id,
                    error = %e,
                    "Couldn't inspect backup operation"
                );
            }
        }
    }

    Ok(result)
}

/// Starts the backup trigger worker as a background task.
pub async fn start_backup_trigger_worker(
    db: Arc<DbPool>,
    gateway: Arc<dyn WorkflowGateway>,
    locks: Arc<PolicyLocks>,
    config: SchedulerConfig,
) {
    tracing::info!(
        interval_secs = config.trigger_interval_secs,
        "Starting backup trigger worker"
    );
    let interval = config.trigger_interval();

    loop {
        match run_trigger_pass(&db, &gateway, &locks).await {
            Ok(result) if result.started > 0 || result.errors > 0 => {
                tracing::info!(
                    started = result.started,
                    skipped = result.skipped,
                    errors = result.errors,
                    "Backup trigger pass complete"
                );
            }
            Ok(_) => {
                tracing::debug!("Backup trigger pass complete, nothing to start");
            }
            Err(e) => {
                tracing::error!(error = %e, "Error running backup trigger pass");
            }
        }

        tokio::time::sleep(interval).await;
    }
}
