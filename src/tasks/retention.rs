//! Retention worker: per policy, re-tag the ledger, elect backups for
//! deletion, and hand the elected records to the deletion state machine.
//!
//! The whole pass for a policy runs under its retention lock: tagging always
//! precedes election so a just-materialized backup can never be elected as
//! untagged noise, and election never races a concurrent materialization.

use std::sync::Arc;

use super::{PolicyLocks, TaskError, deletion};
use crate::{
    config::SchedulerConfig,
    db::DbPool,
    engine::{retention, tagging},
    gateway::WorkflowGateway,
    observability::metrics,
};

/// Results from a single retention pass over all policies.
#[derive(Debug, Default)]
pub struct RetentionRunResult {
    /// Policies successfully processed.
    pub policies: u64,
    /// Records elected and transitioned to `deleting`.
    pub elected: u64,
    /// Removal workflows launched.
    pub removal_requested: u64,
    /// Removal launches that failed (left for the retry sweep).
    pub removal_launch_failures: u64,
}

impl RetentionRunResult {
    pub fn has_evictions(&self) -> bool {
        self.elected > 0
    }
}

/// Run a single retention pass across every enabled policy.
pub async fn run_retention_pass(
    db: &Arc<DbPool>,
    gateway: &Arc<dyn WorkflowGateway>,
    locks: &Arc<PolicyLocks>,
) -> Result<RetentionRunResult, TaskError> {
    let policies = db.policies().list().await?;
    let mut result = RetentionRunResult::default();
    let backups = db.backups();

    for policy in policies.iter().filter(|p| p.enabled) {
        let lock = locks.lock_for(&policy.name);
        let _guard = lock.lock().await;

        if let Err(e) = tagging::run_tagging_pass(&backups, policy).await {
            // Retention for this policy is stale until the next successful
            // tagging pass; electing against stale tags is worse than
            // waiting.
            tracing::error!(
                policy = %policy.name,
                error = %e,
                "Tagging pass failed, skipping retention for policy"
            );
            metrics::record_tagging_error(&policy.name);
            continue;
        }

        let outcome = match retention::run_eviction_pass(&backups, policy).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    policy = %policy.name,
                    error = %e,
                    "Eviction pass failed, skipping retention for policy"
                );
                continue;
            }
        };
        result.elected += outcome.elected.len() as u64;

        for record in &outcome.elected {
            match deletion::request_removal(db, gateway, record).await {
                Ok(true) => result.removal_requested += 1,
                Ok(false) => result.removal_launch_failures += 1,
                Err(e) => {
                    result.removal_launch_failures += 1;
                    tracing::error!(
                        policy = %policy.name,
                        backup_id = %record.id,
                        error = %e,
                        "Error requesting backup removal"
                    );
                }
            }
        }

        result.policies += 1;
    }

    Ok(result)
}

/// Starts the retention worker as a background task.
pub async fn start_retention_worker(
    db: Arc<DbPool>,
    gateway: Arc<dyn WorkflowGateway>,
    locks: Arc<PolicyLocks>,
    config: SchedulerConfig,
) {
    tracing::info!(
        interval_secs = config.retention_interval_secs,
        "Starting retention worker"
    );
    let interval = config.retention_interval();

    loop {
        match run_retention_pass(&db, &gateway, &locks).await {
            Ok(result) => {
                if result.has_evictions() {
                    tracing::info!(
                        policies = result.policies,
                        elected = result.elected,
                        removal_requested = result.removal_requested,
                        removal_launch_failures = result.removal_launch_failures,
                        "Retention pass complete"
                    );
                } else {
                    tracing::debug!("Retention pass complete, nothing to evict");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Error running retention pass");
            }
        }

        tokio::time::sleep(interval).await;
    }
}
