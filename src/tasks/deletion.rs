//! Deletion task state machine: elect → request removal → poll → finalize.
//!
//! Election (the eviction engine) transitions records to `deleting`; this
//! module launches removal workflows for them, tracks the operations to a
//! terminal state, and periodically retries failed or stalled deletions.

use std::sync::Arc;

use super::{PolicyLocks, TaskError};
use crate::{
    config::SchedulerConfig,
    db::DbPool,
    gateway::{WorkflowGateway, WorkflowStatus},
    models::{BackupQuery, BackupRecord, DeletionStatus},
    observability::metrics,
};

/// Cap on retried records per policy per sweep.
const RETRY_BATCH_LIMIT: u32 = 10;

/// Results from a delete-operation poll pass.
#[derive(Debug, Default)]
pub struct DeletePollResult {
    pub deleted: u64,
    pub failed: u64,
    pub still_running: u64,
}

/// Results from a delete retry sweep.
#[derive(Debug, Default)]
pub struct RetryRunResult {
    pub retried: u64,
}

/// Launch a removal workflow for an elected (already `deleting`) record and
/// store its operation id. Returns whether the launch went out.
///
/// On launch failure the record stays `deleting` with no operation id; the
/// retry sweep re-attempts it. A record without a data reference can never
/// be removed by the backend and goes straight to `delete-error`.
pub async fn request_removal(
    db: &Arc<DbPool>,
    gateway: &Arc<dyn WorkflowGateway>,
    record: &BackupRecord,
) -> Result<bool, TaskError> {
    let Some(data_ref) = &record.data_ref else {
        tracing::warn!(
            policy = %record.policy_name,
            backup_id = %record.id,
            "Backup has no data reference, cannot request removal"
        );
        db.backups()
            .set_deletion_status(&record.id, DeletionStatus::DeleteError)
            .await?;
        metrics::record_delete_result(&record.policy_name, DeletionStatus::DeleteError.as_str());
        return Ok(false);
    };

    match gateway.create_removal(data_ref).await {
        Ok(operation_id) => {
            db.backups()
                .set_running_delete_operation(&record.id, Some(&operation_id))
                .await?;
            tracing::info!(
                policy = %record.policy_name,
                backup_id = %record.id,
                operation_id = %operation_id,
                "Removal workflow launched"
            );
            Ok(true)
        }
        Err(e) => {
            tracing::warn!(
                policy = %record.policy_name,
                backup_id = %record.id,
                error = %e,
                "Couldn't launch removal workflow, will retry"
            );
            Ok(false)
        }
    }
}

/// Inspect every outstanding delete operation and finalize the finished
/// ones: `deleted` on success, `delete-error` on failure.
pub async fn run_delete_poll_pass(
    db: &Arc<DbPool>,
    gateway: &Arc<dyn WorkflowGateway>,
    locks: &Arc<PolicyLocks>,
) -> Result<DeletePollResult, TaskError> {
    let policies = db.policies().list().await?;
    let mut result = DeletePollResult::default();
    let backups = db.backups();

    for policy in &policies {
        let deleting = backups
            .list(
                &policy.name,
                &BackupQuery {
                    deletion_status: Some(DeletionStatus::Deleting),
                    ..Default::default()
                },
            )
            .await?;

        for record in &deleting {
            let Some(operation_id) = &record.running_delete_operation else {
                continue;
            };
            match gateway.inspect(operation_id).await {
                Ok(execution) if !execution.status.is_terminal() => {
                    result.still_running += 1;
                }
                Ok(execution) => {
                    let lock = locks.lock_for(&policy.name);
                    let _guard = lock.lock().await;

                    let status = if execution.status == WorkflowStatus::Completed {
                        DeletionStatus::Deleted
                    } else {
                        DeletionStatus::DeleteError
                    };
                    let affected = backups.set_deletion_status(&record.id, status).await?;
                    if affected != 1 {
                        tracing::error!(
                            policy = %policy.name,
                            backup_id = %record.id,
                            rows_affected = affected,
                            "Unexpected row count finalizing deletion, skipping"
                        );
                        metrics::record_invariant_violation("set_deletion_status");
                        continue;
                    }
                    backups
                        .set_running_delete_operation(&record.id, None)
                        .await?;
                    metrics::record_delete_result(&policy.name, status.as_str());
                    tracing::info!(
                        policy = %policy.name,
                        backup_id = %record.id,
                        status = %status,
                        "Backup deletion finalized"
                    );
                    if status == DeletionStatus::Deleted {
                        result.deleted += 1;
                    } else {
                        result.failed += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        policy = %policy.name,
                        backup_id = %record.id,
                        operation_id = %operation_id,
                        error = %e,
                        "Couldn't inspect delete operation"
                    );
                }
            }
        }
    }

    Ok(result)
}

/// Retry sweep: re-attempt up to 10 randomly-ordered `delete-error` records
/// per policy, plus `deleting` records whose removal launch never went out.
pub async fn run_delete_retry_pass(
    db: &Arc<DbPool>,
    gateway: &Arc<dyn WorkflowGateway>,
) -> Result<RetryRunResult, TaskError> {
    let policies = db.policies().list().await?;
    let mut result = RetryRunResult::default();
    let backups = db.backups();

    for policy in &policies {
        let failed = backups
            .list(
                &policy.name,
                &BackupQuery {
                    deletion_status: Some(DeletionStatus::DeleteError),
                    random_order: true,
                    limit: Some(RETRY_BATCH_LIMIT),
                    ..Default::default()
                },
            )
            .await?;
        if !failed.is_empty() {
            tracing::info!(
                policy = %policy.name,
                count = failed.len(),
                "Retrying failed backup deletions"
            );
        }
        for record in &failed {
            metrics::record_delete_retry(&policy.name);
            let affected = backups
                .set_deletion_status(&record.id, DeletionStatus::Deleting)
                .await?;
            if affected != 1 {
                tracing::error!(
                    policy = %policy.name,
                    backup_id = %record.id,
                    rows_affected = affected,
                    "Unexpected row count restarting deletion, skipping"
                );
                metrics::record_invariant_violation("retry_deletion");
                continue;
            }
            request_removal(db, gateway, record).await?;
            result.retried += 1;
        }

        // Launch-failure leftovers: still `deleting` but with no operation.
        let stalled = backups
            .list(
                &policy.name,
                &BackupQuery {
                    deletion_status: Some(DeletionStatus::Deleting),
                    limit: Some(RETRY_BATCH_LIMIT),
                    ..Default::default()
                },
            )
            .await?;
        for record in stalled
            .iter()
            .filter(|r| r.running_delete_operation.is_none())
        {
            metrics::record_delete_retry(&policy.name);
            request_removal(db, gateway, record).await?;
            result.retried += 1;
        }
    }

    Ok(result)
}

/// Starts the delete retry worker as a background task.
pub async fn start_delete_retry_worker(
    db: Arc<DbPool>,
    gateway: Arc<dyn WorkflowGateway>,
    config: SchedulerConfig,
) {
    tracing::info!(
        interval_secs = config.delete_retry_interval_secs,
        "Starting delete retry worker"
    );
    let interval = config.delete_retry_interval();

    loop {
        match run_delete_retry_pass(&db, &gateway).await {
            Ok(result) if result.retried > 0 => {
                tracing::info!(retried = result.retried, "Delete retry sweep complete");
            }
            Ok(_) => {
                tracing::debug!("Delete retry sweep complete, nothing to retry");
            }
            Err(e) => {
                tracing::error!(error = %e, "Error running delete retry sweep");
            }
        }

        tokio::time::sleep(interval).await;
    }
}
