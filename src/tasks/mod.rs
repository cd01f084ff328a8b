//! Background task infrastructure for the orchestrator.
//!
//! Four worker loops run per process:
//!
//! - **Backup trigger**: launches create workflows for due policies.
//! - **Operation poll**: tracks outstanding create and delete operations and
//!   materializes/finalizes them on completion.
//! - **Retention**: re-tags the ledger and elects backups for deletion.
//! - **Delete retry**: re-attempts failed or stalled deletions.
//!
//! Workers follow a consistent pattern: a `start_*_worker` loop with a
//! configurable interval, a `run_*_pass` function performing a single pass,
//! and a structured result type for logging. Backend and ledger errors are
//! absorbed at the pass boundary: logged with policy/record/operation
//! context and surfaced through metrics, never fatal to the process.

pub mod backup;
pub mod deletion;
pub mod retention;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::{config::SchedulerConfig, db::DbPool, gateway::WorkflowGateway};

pub(crate) type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Per-policy mutexes guarding the tag/retention critical sections.
///
/// The lock is held while materializing a just-completed backup plus
/// re-tagging, and for an entire retention pass, so retention never observes
/// a backup that exists but has not been tagged yet (it would land in the
/// untagged eviction bucket immediately). One mutex per policy keeps
/// unrelated policies' work parallel.
#[derive(Default)]
pub struct PolicyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PolicyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, policy_name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(policy_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Starts the operation poll worker: one loop tracking both outstanding
/// create operations and outstanding delete operations.
pub async fn start_operation_poll_worker(
    db: Arc<DbPool>,
    gateway: Arc<dyn WorkflowGateway>,
    locks: Arc<PolicyLocks>,
    config: SchedulerConfig,
) {
    tracing::info!(
        interval_secs = config.poll_interval_secs,
        "Starting operation poll worker"
    );
    let interval = config.poll_interval();

    loop {
        match backup::run_create_poll_pass(&db, &gateway, &locks).await {
            Ok(result) if result.completed > 0 || result.failed > 0 => {
                tracing::info!(
                    completed = result.completed,
                    failed = result.failed,
                    still_running = result.still_running,
                    "Create poll pass complete"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "Error polling create operations");
            }
        }

        match deletion::run_delete_poll_pass(&db, &gateway, &locks).await {
            Ok(result) if result.deleted > 0 || result.failed > 0 => {
                tracing::info!(
                    deleted = result.deleted,
                    failed = result.failed,
                    still_running = result.still_running,
                    "Delete poll pass complete"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "Error polling delete operations");
            }
        }

        tokio::time::sleep(interval).await;
    }
}
