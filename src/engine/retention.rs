//! Retention eviction engine.
//!
//! Consumes the freshly tagged ledger and elects records for deletion: first
//! the exclusive-untagged records (stale noise that lost the cascade at every
//! bucket), then each tier's exclusive set beyond its retain-count. Elections
//! are capped per tier per run to bound backend load; the remainder is picked
//! up on subsequent runs.

use std::sync::Arc;

use crate::{
    db::{BackupRepo, DbResult},
    models::{BackupPolicy, BackupRecord, Tier},
    observability::metrics,
};

/// Cap on elections per tier per run.
const EVICTION_BATCH_LIMIT: u32 = 10;

/// Result of one eviction pass.
#[derive(Debug, Default)]
pub struct EvictionOutcome {
    /// Records successfully transitioned to `deleting`, in election order.
    pub elected: Vec<BackupRecord>,
    /// Candidates skipped because the conditional transition did not affect
    /// exactly one row.
    pub invariant_skips: u64,
}

/// Query the eviction candidates for every tier, in election order:
/// untagged first, then minutely through yearly.
pub async fn elect_for_deletion(
    backups: &Arc<dyn BackupRepo>,
    policy: &BackupPolicy,
) -> DbResult<Vec<BackupRecord>> {
    let mut elected = Vec::new();

    let stale = backups
        .select_tier_exclusive(&policy.name, None, 0, EVICTION_BATCH_LIMIT)
        .await?;
    tracing::debug!(
        policy = %policy.name,
        count = stale.len(),
        "Untagged backups elected for deletion"
    );
    elected.extend(stale);

    for tier in Tier::ALL {
        let retain = policy.tier(tier).retain;
        let batch = backups
            .select_tier_exclusive(&policy.name, Some(tier), retain, EVICTION_BATCH_LIMIT)
            .await?;
        tracing::debug!(
            policy = %policy.name,
            tier = %tier,
            retain = retain,
            count = batch.len(),
            "Tier backups elected for deletion"
        );
        elected.extend(batch);
    }

    Ok(elected)
}

/// Run one eviction pass: elect candidates and transition each to
/// `deleting`. A transition that does not affect exactly one row means the
/// record changed underneath us; it is skipped and flagged, never
/// force-advanced.
pub async fn run_eviction_pass(
    backups: &Arc<dyn BackupRepo>,
    policy: &BackupPolicy,
) -> DbResult<EvictionOutcome> {
    let candidates = elect_for_deletion(backups, policy).await?;
    metrics::record_retention_election(&policy.name, candidates.len() as u64);
    tracing::info!(
        policy = %policy.name,
        count = candidates.len(),
        "Backups elected for deletion"
    );

    let mut outcome = EvictionOutcome::default();
    for record in candidates {
        let affected = backups.mark_deleting(&record.id).await?;
        if affected != 1 {
            tracing::error!(
                policy = %policy.name,
                backup_id = %record.id,
                rows_affected = affected,
                "Unexpected row count transitioning backup to 'deleting', skipping"
            );
            metrics::record_invariant_violation("mark_deleting");
            outcome.invariant_skips += 1;
            continue;
        }
        outcome.elected.push(record);
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use sqlx::SqlitePool;

    use super::*;
    use crate::{
        db::DbPool,
        engine::tagging,
        models::{BackupStatus, DeletionStatus, NewBackup, TagSet},
    };

    async fn test_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");
        pool
    }

    fn policy(tiers: [&str; 6]) -> BackupPolicy {
        BackupPolicy {
            name: "nightly".to_string(),
            enabled: true,
            workflow_name: "backup_wf".to_string(),
            workflow_version: None,
            from_date: None,
            to_date: None,
            schedule: None,
            minutely: tiers[0].parse().unwrap(),
            hourly: tiers[1].parse().unwrap(),
            daily: tiers[2].parse().unwrap(),
            weekly: tiers[3].parse().unwrap(),
            monthly: tiers[4].parse().unwrap(),
            yearly: tiers[5].parse().unwrap(),
            running_create_operation: None,
            last_update: Utc::now(),
        }
    }

    async fn insert(db: &DbPool, id: &str, ts: &str) {
        let start: DateTime<Utc> = ts.parse().unwrap();
        db.backups()
            .insert(NewBackup {
                id: id.to_string(),
                policy_name: "nightly".to_string(),
                data_ref: Some(format!("data/{}", id)),
                status: BackupStatus::Available,
                start_time: start,
                end_time: start,
                size_mb: None,
            })
            .await
            .expect("insert failed");
    }

    async fn set_tags(pool: &SqlitePool, id: &str, tags: TagSet) {
        sqlx::query(
            "UPDATE backups SET reference = ?, minutely = ?, hourly = ?, daily = ?, \
             weekly = ?, monthly = ?, yearly = ? WHERE id = ?",
        )
        .bind(tags.reference)
        .bind(tags.minutely)
        .bind(tags.hourly)
        .bind(tags.daily)
        .bind(tags.weekly)
        .bind(tags.monthly)
        .bind(tags.yearly)
        .bind(id)
        .execute(pool)
        .await
        .expect("Failed to set tags");
    }

    fn minutely_only() -> TagSet {
        TagSet {
            reference: true,
            minutely: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_retain_count_elects_oldest_beyond_n() {
        let pool = test_pool().await;
        let db = DbPool::from_sqlite(pool.clone());
        let backups = db.backups();

        // Five exclusively-minutely backups, retain 2: the three oldest go.
        for (id, ts) in [
            ("m1", "2024-03-01T02:00:00Z"),
            ("m2", "2024-03-02T02:00:00Z"),
            ("m3", "2024-03-03T02:00:00Z"),
            ("m4", "2024-03-04T02:00:00Z"),
            ("m5", "2024-03-05T02:00:00Z"),
        ] {
            insert(&db, id, ts).await;
            set_tags(&pool, id, minutely_only()).await;
        }

        let policy = policy(["2@59", "0@L", "0@L", "0@L", "0@L", "0@L"]);
        let outcome = run_eviction_pass(&backups, &policy).await.unwrap();

        let ids: Vec<_> = outcome.elected.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m2", "m1"]);
        assert_eq!(outcome.invariant_skips, 0);

        for id in ["m3", "m2", "m1"] {
            let record = backups.get(id).await.unwrap().unwrap();
            assert_eq!(record.deletion_status, DeletionStatus::Deleting);
        }
        for id in ["m5", "m4"] {
            let record = backups.get(id).await.unwrap().unwrap();
            assert_eq!(record.deletion_status, DeletionStatus::None);
        }
    }

    #[tokio::test]
    async fn test_untagged_records_always_elected() {
        let pool = test_pool().await;
        let db = DbPool::from_sqlite(pool.clone());
        let backups = db.backups();

        insert(&db, "noise", "2024-03-01T02:00:00Z").await;
        insert(&db, "kept", "2024-03-02T02:00:00Z").await;
        set_tags(&pool, "kept", minutely_only()).await;

        // Even with a generous retain count the untagged record goes.
        let policy = policy(["9@59", "0@L", "0@L", "0@L", "0@L", "0@L"]);
        let outcome = run_eviction_pass(&backups, &policy).await.unwrap();

        let ids: Vec<_> = outcome.elected.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["noise"]);
    }

    #[tokio::test]
    async fn test_election_capped_per_tier() {
        let pool = test_pool().await;
        let db = DbPool::from_sqlite(pool.clone());
        let backups = db.backups();

        for i in 0..15 {
            let id = format!("m{:02}", i);
            insert(&db, &id, &format!("2024-03-01T02:{:02}:00Z", i)).await;
            set_tags(&pool, &id, minutely_only()).await;
        }

        let policy = policy(["0@59", "0@L", "0@L", "0@L", "0@L", "0@L"]);
        let outcome = run_eviction_pass(&backups, &policy).await.unwrap();
        assert_eq!(outcome.elected.len(), 10);
    }

    #[tokio::test]
    async fn test_already_deleting_records_are_not_reelected() {
        let pool = test_pool().await;
        let db = DbPool::from_sqlite(pool.clone());
        let backups = db.backups();

        insert(&db, "m1", "2024-03-01T02:00:00Z").await;
        set_tags(&pool, "m1", minutely_only()).await;

        let policy = policy(["0@59", "0@L", "0@L", "0@L", "0@L", "0@L"]);
        let first = run_eviction_pass(&backups, &policy).await.unwrap();
        assert_eq!(first.elected.len(), 1);

        let second = run_eviction_pass(&backups, &policy).await.unwrap();
        assert!(second.elected.is_empty());
        assert_eq!(second.invariant_skips, 0);
    }

    #[tokio::test]
    async fn test_fixture_end_to_end_election() {
        // Tag the 2006 acceptance fixture with its documented retain counts
        // and check exactly which records are elected.
        let db = crate::db::testing::test_db().await;
        let backups = db.backups();

        let fixture = [
            ("b01", "2006-01-01T15:04:05Z"),
            ("b02", "2006-01-01T15:04:45Z"),
            ("b03", "2006-01-01T15:05:01Z"),
            ("b04", "2006-01-01T16:15:41Z"),
            ("b05", "2006-01-01T16:45:41Z"),
            ("b06", "2006-01-01T23:15:31Z"),
            ("b07", "2006-01-31T10:15:27Z"),
            ("b08", "2006-01-31T20:35:57Z"),
            ("b09", "2006-02-15T13:55:27Z"),
            ("b10", "2006-02-16T17:35:17Z"),
            ("b11", "2006-02-16T18:35:17Z"),
            ("b12", "2006-03-28T09:35:19Z"),
            ("b13", "2006-03-29T04:25:49Z"),
            ("b14", "2006-03-29T19:25:49Z"),
            ("b15", "2006-03-30T21:45:35Z"),
            ("b16", "2006-12-29T11:25:15Z"),
            ("b17", "2006-12-30T16:54:05Z"),
            ("b18", "2006-12-31T23:54:05Z"),
        ];
        for (id, ts) in fixture {
            let start: DateTime<Utc> = ts.parse().unwrap();
            backups
                .insert(NewBackup {
                    id: id.to_string(),
                    policy_name: "nightly".to_string(),
                    data_ref: None,
                    status: BackupStatus::Available,
                    start_time: start,
                    end_time: start,
                    size_mb: None,
                })
                .await
                .unwrap();
        }

        let policy = policy(["2@59", "3@59", "3@23", "4@7", "5@L", "2@12"]);
        tagging::run_tagging_pass(&backups, &policy).await.unwrap();
        let outcome = run_eviction_pass(&backups, &policy).await.unwrap();

        let mut ids: Vec<_> = outcome.elected.iter().map(|r| r.id.as_str()).collect();
        ids.sort_unstable();
        // b01 lost every bucket; b03/b05 are hourly-exclusive beyond retain 3;
        // b09 is daily-exclusive beyond retain 3.
        assert_eq!(ids, vec!["b01", "b03", "b05", "b09"]);
    }
}
