use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    db::error::DbResult,
    models::{BackupQuery, BackupRecord, DeletionStatus, NewBackup, Tier},
};

/// A candidate row for nearest-in-bucket selection.
#[derive(Debug, Clone)]
pub struct TagCandidate {
    pub id: String,
    pub start_time: DateTime<Utc>,
}

pub type BucketKeyFn = Box<dyn Fn(DateTime<Utc>) -> String + Send + Sync>;
pub type DistanceFn = Box<dyn Fn(DateTime<Utc>) -> i64 + Send + Sync>;

/// One generic step of a tagging pass. The ledger executes steps as opaque
/// data (bucket key, distance, candidate restriction, flags to set) and
/// never interprets what the tiers mean.
pub struct TagStep {
    /// Tier flag set on the winners of this step.
    pub tier: Tier,
    /// Also set the `reference` flag on the winners (base step only).
    pub set_reference: bool,
    /// Restrict candidates to records already carrying this tier flag.
    pub prior: Option<Tier>,
    /// Groups candidates; one winner is chosen per distinct key.
    pub bucket_key: BucketKeyFn,
    /// Absolute distance from the step's reference value.
    pub distance: DistanceFn,
}

/// A full tagging pass, executed atomically: clear every tag of the policy,
/// run the steps in order, then force all flags on `force_all_on`.
pub struct TaggingPass {
    pub steps: Vec<TagStep>,
    /// The most recently started available record; it carries every flag
    /// regardless of cascade outcome.
    pub force_all_on: String,
}

/// Row counts from an applied tagging pass.
#[derive(Debug, Default)]
pub struct TaggingSummary {
    pub cleared: u64,
    pub tagged: Vec<(Tier, u64)>,
}

impl TaggingSummary {
    pub fn total_tagged(&self) -> u64 {
        self.tagged.iter().map(|(_, n)| n).sum()
    }
}

/// Pick, per bucket, the candidate whose distance is smallest; ties go to the
/// smallest id so re-runs over unchanged data select identical winners.
///
/// This is the in-process replacement for backend-specific date-truncation
/// queries: the bucket key is a plain function of the timestamp.
pub fn nearest_per_bucket(
    candidates: &[TagCandidate],
    bucket_key: &(dyn Fn(DateTime<Utc>) -> String + Send + Sync),
    distance: &(dyn Fn(DateTime<Utc>) -> i64 + Send + Sync),
) -> Vec<String> {
    let mut best: BTreeMap<String, (i64, &str)> = BTreeMap::new();
    for candidate in candidates {
        let key = bucket_key(candidate.start_time);
        let entry = (distance(candidate.start_time).abs(), candidate.id.as_str());
        let replace = match best.get(&key) {
            Some(current) => entry < *current,
            None => true,
        };
        if replace {
            best.insert(key, entry);
        }
    }
    best.into_values().map(|(_, id)| id.to_string()).collect()
}

/// The backup ledger: exclusive owner of `BackupRecord` storage and of the
/// query primitives the tagging and eviction engines compose.
#[async_trait]
pub trait BackupRepo: Send + Sync {
    /// Insert a materialized record. `DbError::Conflict` on duplicate id.
    async fn insert(&self, record: NewBackup) -> DbResult<()>;

    /// Get a record by id; absent is `None`, not an error.
    async fn get(&self, id: &str) -> DbResult<Option<BackupRecord>>;

    /// List records for a policy, filtered per the query.
    async fn list(&self, policy_name: &str, query: &BackupQuery) -> DbResult<Vec<BackupRecord>>;

    /// The most recently started record that is available and not being
    /// deleted, if any.
    async fn latest_available(&self, policy_name: &str) -> DbResult<Option<BackupRecord>>;

    /// Execute a tagging pass atomically: clear all tags of the policy, mark
    /// nearest-in-bucket winners for each step, force all flags on the
    /// designated record. Any failure rolls the entire pass back; readers
    /// never observe partial tagging.
    async fn apply_tagging(&self, policy_name: &str, pass: &TaggingPass)
    -> DbResult<TaggingSummary>;

    /// Eviction candidate query: available records carrying `tier`'s flag
    /// and no coarser tier's flag (all six flags clear when `tier` is
    /// `None`), most recent first, skipping the newest `skip_newest`.
    async fn select_tier_exclusive(
        &self,
        policy_name: &str,
        tier: Option<Tier>,
        skip_newest: u32,
        limit: u32,
    ) -> DbResult<Vec<BackupRecord>>;

    /// Conditional single-row transition into `deleting`: applies only if
    /// the record is available, not already in a deletion state, and has no
    /// running delete operation. Returns the number of rows affected so the
    /// caller can detect an invariant violation (anything but 1).
    async fn mark_deleting(&self, id: &str) -> DbResult<u64>;

    /// Set the deletion status of a record. Returns rows affected.
    async fn set_deletion_status(&self, id: &str, status: DeletionStatus) -> DbResult<u64>;

    /// Store or clear the id of the record's in-flight delete operation.
    async fn set_running_delete_operation(
        &self,
        id: &str,
        operation_id: Option<&str>,
    ) -> DbResult<()>;
}
