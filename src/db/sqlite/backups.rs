use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::common::{BACKUP_COLUMNS, map_backup_row};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{BackupRepo, TagCandidate, TaggingPass, TaggingSummary, nearest_per_bucket},
    },
    models::{BackupQuery, BackupRecord, DeletionStatus, NewBackup, TagFilter, Tier},
};

pub struct SqliteBackupRepo {
    pool: SqlitePool,
}

impl SqliteBackupRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn tag_column(filter: TagFilter) -> &'static str {
    match filter {
        TagFilter::Reference => "reference",
        TagFilter::Tier(tier) => tier.as_str(),
    }
}

#[async_trait]
impl BackupRepo for SqliteBackupRepo {
    async fn insert(&self, record: NewBackup) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO backups (id, policy_name, data_ref, status, start_time, end_time, size_mb)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.policy_name)
        .bind(&record.data_ref)
        .bind(record.status.as_str())
        .bind(record.start_time)
        .bind(record.end_time)
        .bind(record.size_mb)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(DbError::Conflict(
                format!("backup id '{}' already exists", record.id),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &str) -> DbResult<Option<BackupRecord>> {
        let sql = format!("SELECT {} FROM backups WHERE id = ?", BACKUP_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(map_backup_row).transpose()
    }

    async fn list(&self, policy_name: &str, query: &BackupQuery) -> DbResult<Vec<BackupRecord>> {
        let mut conditions = vec!["policy_name = ?".to_string()];
        let mut params: Vec<String> = Vec::new();

        if let Some(tag) = query.tag {
            conditions.push(format!("{} = 1", tag_column(tag)));
        }
        if let Some(status) = query.status {
            conditions.push("status = ?".to_string());
            params.push(status.as_str().to_string());
        }
        if let Some(deletion_status) = query.deletion_status {
            conditions.push("deletion_status = ?".to_string());
            params.push(deletion_status.as_str().to_string());
        }

        let order = if query.random_order {
            "RANDOM()"
        } else {
            "start_time DESC"
        };
        let mut sql = format!(
            "SELECT {} FROM backups WHERE {} ORDER BY {}",
            BACKUP_COLUMNS,
            conditions.join(" AND "),
            order
        );
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut q = sqlx::query(&sql).bind(policy_name);
        for param in &params {
            q = q.bind(param);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(map_backup_row).collect()
    }

    async fn latest_available(&self, policy_name: &str) -> DbResult<Option<BackupRecord>> {
        let sql = format!(
            "SELECT {} FROM backups \
             WHERE policy_name = ? AND status = 'available' AND deletion_status = 'none' \
             ORDER BY start_time DESC LIMIT 1",
            BACKUP_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(policy_name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_backup_row).transpose()
    }

    async fn apply_tagging(
        &self,
        policy_name: &str,
        pass: &TaggingPass,
    ) -> DbResult<TaggingSummary> {
        let mut tx = self.pool.begin().await?;

        let cleared = sqlx::query(
            "UPDATE backups SET reference = 0, minutely = 0, hourly = 0, daily = 0, \
             weekly = 0, monthly = 0, yearly = 0 WHERE policy_name = ?",
        )
        .bind(policy_name)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let mut tagged = Vec::with_capacity(pass.steps.len());
        for step in &pass.steps {
            let sql = match step.prior {
                Some(prior) => format!(
                    "SELECT id, start_time FROM backups WHERE policy_name = ? AND {} = 1",
                    prior.as_str()
                ),
                None => "SELECT id, start_time FROM backups WHERE policy_name = ?".to_string(),
            };
            let rows = sqlx::query(&sql)
                .bind(policy_name)
                .fetch_all(&mut *tx)
                .await?;
            let candidates: Vec<TagCandidate> = rows
                .iter()
                .map(|row| TagCandidate {
                    id: row.get("id"),
                    start_time: row.get("start_time"),
                })
                .collect();

            let winners = nearest_per_bucket(&candidates, &*step.bucket_key, &*step.distance);
            if winners.is_empty() {
                tagged.push((step.tier, 0));
                continue;
            }

            let set_clause = if step.set_reference {
                format!("reference = 1, {} = 1", step.tier.as_str())
            } else {
                format!("{} = 1", step.tier.as_str())
            };
            let placeholders = vec!["?"; winners.len()].join(", ");
            let sql = format!(
                "UPDATE backups SET {} WHERE id IN ({})",
                set_clause, placeholders
            );
            let mut q = sqlx::query(&sql);
            for id in &winners {
                q = q.bind(id);
            }
            let affected = q.execute(&mut *tx).await?.rows_affected();
            tagged.push((step.tier, affected));
        }

        sqlx::query(
            "UPDATE backups SET reference = 1, minutely = 1, hourly = 1, daily = 1, \
             weekly = 1, monthly = 1, yearly = 1 WHERE id = ?",
        )
        .bind(&pass.force_all_on)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(TaggingSummary { cleared, tagged })
    }

    async fn select_tier_exclusive(
        &self,
        policy_name: &str,
        tier: Option<Tier>,
        skip_newest: u32,
        limit: u32,
    ) -> DbResult<Vec<BackupRecord>> {
        let mut conditions = vec![
            "policy_name = ?".to_string(),
            "status = 'available'".to_string(),
            "deletion_status = 'none'".to_string(),
        ];
        match tier {
            // The tier's own flag set, every coarser flag clear. Finer flags
            // are ignored: the cascade never clears them on promoted records.
            Some(tier) => {
                conditions.push(format!("{} = 1", tier.as_str()));
                for coarser in tier.coarser() {
                    conditions.push(format!("{} = 0", coarser.as_str()));
                }
            }
            // The stale-noise bucket: no tier flag at all.
            None => {
                for tier in Tier::ALL {
                    conditions.push(format!("{} = 0", tier.as_str()));
                }
            }
        }

        let sql = format!(
            "SELECT {} FROM backups WHERE {} ORDER BY start_time DESC LIMIT ? OFFSET ?",
            BACKUP_COLUMNS,
            conditions.join(" AND ")
        );
        let rows = sqlx::query(&sql)
            .bind(policy_name)
            .bind(limit as i64)
            .bind(skip_newest as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_backup_row).collect()
    }

    async fn mark_deleting(&self, id: &str) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE backups SET deletion_status = 'deleting' \
             WHERE id = ? AND status = 'available' AND deletion_status = 'none' \
             AND running_delete_operation IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn set_deletion_status(&self, id: &str, status: DeletionStatus) -> DbResult<u64> {
        let result = sqlx::query("UPDATE backups SET deletion_status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn set_running_delete_operation(
        &self,
        id: &str,
        operation_id: Option<&str>,
    ) -> DbResult<()> {
        sqlx::query("UPDATE backups SET running_delete_operation = ? WHERE id = ?")
            .bind(operation_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Timelike, Utc};

    use super::*;
    use crate::{
        db::repos::TagStep,
        models::{BackupStatus, TagSet},
    };

    async fn create_test_pool() -> SqlitePool {
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

    fn new_backup(id: &str, policy: &str, ts: &str) -> NewBackup {
        let start: DateTime<Utc> = ts.parse().expect("bad timestamp");
        NewBackup {
            id: id.to_string(),
            policy_name: policy.to_string(),
            data_ref: Some(format!("data/{}", id)),
            status: BackupStatus::Available,
            start_time: start,
            end_time: start,
            size_mb: Some(12.5),
        }
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

    #[tokio::test]
    async fn test_insert_get_roundtrip() {
        let pool = create_test_pool().await;
        let repo = SqliteBackupRepo::new(pool);

        let record = new_backup("b1", "nightly", "2024-03-01T02:00:00Z");
        repo.insert(record.clone()).await.expect("insert failed");

        let fetched = repo.get("b1").await.expect("get failed").expect("missing");
        assert_eq!(fetched.id, "b1");
        assert_eq!(fetched.policy_name, "nightly");
        assert_eq!(fetched.data_ref, Some("data/b1".to_string()));
        assert_eq!(fetched.status, BackupStatus::Available);
        assert_eq!(fetched.start_time, record.start_time);
        assert_eq!(fetched.size_mb, Some(12.5));
        assert_eq!(fetched.deletion_status, DeletionStatus::None);
        assert!(fetched.running_delete_operation.is_none());
        assert_eq!(fetched.tags, TagSet::default());
    }

    #[tokio::test]
    async fn test_insert_nullable_fields_stay_null() {
        let pool = create_test_pool().await;
        let repo = SqliteBackupRepo::new(pool);

        let mut record = new_backup("b1", "nightly", "2024-03-01T02:00:00Z");
        record.data_ref = None;
        record.size_mb = None;
        repo.insert(record).await.expect("insert failed");

        let fetched = repo.get("b1").await.unwrap().unwrap();
        assert!(fetched.data_ref.is_none());
        assert!(fetched.size_mb.is_none());
    }

    #[tokio::test]
    async fn test_insert_duplicate_id_conflicts() {
        let pool = create_test_pool().await;
        let repo = SqliteBackupRepo::new(pool);

        repo.insert(new_backup("b1", "nightly", "2024-03-01T02:00:00Z"))
            .await
            .expect("insert failed");
        let err = repo
            .insert(new_backup("b1", "nightly", "2024-03-02T02:00:00Z"))
            .await
            .expect_err("duplicate insert should fail");
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let pool = create_test_pool().await;
        let repo = SqliteBackupRepo::new(pool);
        assert!(repo.get("nope").await.expect("get failed").is_none());
    }

    #[tokio::test]
    async fn test_list_orders_most_recent_first() {
        let pool = create_test_pool().await;
        let repo = SqliteBackupRepo::new(pool);

        repo.insert(new_backup("old", "nightly", "2024-03-01T02:00:00Z"))
            .await
            .unwrap();
        repo.insert(new_backup("new", "nightly", "2024-03-03T02:00:00Z"))
            .await
            .unwrap();
        repo.insert(new_backup("mid", "nightly", "2024-03-02T02:00:00Z"))
            .await
            .unwrap();

        let records = repo
            .list("nightly", &BackupQuery::default())
            .await
            .expect("list failed");
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[tokio::test]
    async fn test_list_scoped_to_policy() {
        let pool = create_test_pool().await;
        let repo = SqliteBackupRepo::new(pool);

        repo.insert(new_backup("a", "nightly", "2024-03-01T02:00:00Z"))
            .await
            .unwrap();
        repo.insert(new_backup("b", "weekly-dump", "2024-03-01T03:00:00Z"))
            .await
            .unwrap();

        let records = repo.list("nightly", &BackupQuery::default()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "a");
    }

    #[tokio::test]
    async fn test_list_filters() {
        let pool = create_test_pool().await;
        let repo = SqliteBackupRepo::new(pool.clone());

        let mut errored = new_backup("err", "nightly", "2024-03-01T02:00:00Z");
        errored.status = BackupStatus::Error;
        repo.insert(errored).await.unwrap();
        repo.insert(new_backup("ok", "nightly", "2024-03-02T02:00:00Z"))
            .await
            .unwrap();
        set_tags(
            &pool,
            "ok",
            TagSet {
                reference: true,
                minutely: true,
                ..Default::default()
            },
        )
        .await;
        repo.set_deletion_status("err", DeletionStatus::DeleteError)
            .await
            .unwrap();

        let available = repo
            .list(
                "nightly",
                &BackupQuery {
                    status: Some(BackupStatus::Available),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id, "ok");

        let tagged = repo
            .list(
                "nightly",
                &BackupQuery {
                    tag: Some(TagFilter::Tier(Tier::Minutely)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].id, "ok");

        let delete_errors = repo
            .list(
                "nightly",
                &BackupQuery {
                    deletion_status: Some(DeletionStatus::DeleteError),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(delete_errors.len(), 1);
        assert_eq!(delete_errors[0].id, "err");

        let limited = repo
            .list(
                "nightly",
                &BackupQuery {
                    limit: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_latest_available_skips_failed_and_deleting() {
        let pool = create_test_pool().await;
        let repo = SqliteBackupRepo::new(pool);

        repo.insert(new_backup("good", "nightly", "2024-03-01T02:00:00Z"))
            .await
            .unwrap();
        let mut failed = new_backup("failed", "nightly", "2024-03-02T02:00:00Z");
        failed.status = BackupStatus::Error;
        repo.insert(failed).await.unwrap();
        repo.insert(new_backup("doomed", "nightly", "2024-03-03T02:00:00Z"))
            .await
            .unwrap();
        repo.mark_deleting("doomed").await.unwrap();

        let latest = repo
            .latest_available("nightly")
            .await
            .expect("query failed")
            .expect("expected a record");
        assert_eq!(latest.id, "good");
    }

    #[tokio::test]
    async fn test_latest_available_empty_is_none() {
        let pool = create_test_pool().await;
        let repo = SqliteBackupRepo::new(pool);
        assert!(repo.latest_available("nightly").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_apply_tagging_marks_winners_and_forces_newest() {
        let pool = create_test_pool().await;
        let repo = SqliteBackupRepo::new(pool);

        // Two records share the 15:04 minute bucket; one stands alone.
        repo.insert(new_backup("loser", "nightly", "2006-01-01T15:04:05Z"))
            .await
            .unwrap();
        repo.insert(new_backup("winner", "nightly", "2006-01-01T15:04:45Z"))
            .await
            .unwrap();
        repo.insert(new_backup("newest", "nightly", "2006-01-01T15:05:01Z"))
            .await
            .unwrap();

        let pass = TaggingPass {
            steps: vec![TagStep {
                tier: Tier::Minutely,
                set_reference: true,
                prior: None,
                bucket_key: Box::new(|ts| ts.format("%Y-%m-%dT%H:%M").to_string()),
                distance: Box::new(|ts| ts.second() as i64 - 59),
            }],
            force_all_on: "newest".to_string(),
        };
        let summary = repo.apply_tagging("nightly", &pass).await.expect("tagging failed");
        assert_eq!(summary.tagged, vec![(Tier::Minutely, 2)]);

        let loser = repo.get("loser").await.unwrap().unwrap();
        assert!(loser.tags.is_untagged());
        let winner = repo.get("winner").await.unwrap().unwrap();
        assert!(winner.tags.reference);
        assert!(winner.tags.minutely);
        assert!(!winner.tags.hourly);
        let newest = repo.get("newest").await.unwrap().unwrap();
        assert_eq!(newest.tags, TagSet::all());
    }

    #[tokio::test]
    async fn test_apply_tagging_clears_previous_pass() {
        let pool = create_test_pool().await;
        let repo = SqliteBackupRepo::new(pool.clone());

        repo.insert(new_backup("a", "nightly", "2006-01-01T15:04:05Z"))
            .await
            .unwrap();
        set_tags(&pool, "a", TagSet::all()).await;

        // An empty pass over a different newest record drops stale flags.
        let pass = TaggingPass {
            steps: vec![],
            force_all_on: "absent".to_string(),
        };
        let summary = repo.apply_tagging("nightly", &pass).await.unwrap();
        assert_eq!(summary.cleared, 1);

        let record = repo.get("a").await.unwrap().unwrap();
        assert!(record.tags.is_untagged());
        assert!(!record.tags.reference);
    }

    #[tokio::test]
    async fn test_apply_tagging_prior_restriction() {
        let pool = create_test_pool().await;
        let repo = SqliteBackupRepo::new(pool);

        // Same hour, different minutes.
        repo.insert(new_backup("a", "nightly", "2006-01-01T15:04:00Z"))
            .await
            .unwrap();
        repo.insert(new_backup("b", "nightly", "2006-01-01T15:30:00Z"))
            .await
            .unwrap();

        let pass = TaggingPass {
            steps: vec![
                TagStep {
                    tier: Tier::Minutely,
                    set_reference: true,
                    prior: None,
                    bucket_key: Box::new(|ts| ts.format("%Y-%m-%dT%H:%M").to_string()),
                    distance: Box::new(|ts| ts.second() as i64 - 59),
                },
                TagStep {
                    tier: Tier::Hourly,
                    set_reference: false,
                    prior: Some(Tier::Minutely),
                    bucket_key: Box::new(|ts| ts.format("%Y-%m-%dT%H").to_string()),
                    distance: Box::new(|ts| ts.minute() as i64 - 59),
                },
            ],
            force_all_on: "b".to_string(),
        };
        repo.apply_tagging("nightly", &pass).await.unwrap();

        // Both are minutely winners (distinct minute buckets); only the one
        // closest to minute 59 carries hourly.
        let a = repo.get("a").await.unwrap().unwrap();
        let b = repo.get("b").await.unwrap().unwrap();
        assert!(a.tags.minutely && b.tags.minutely);
        assert!(!a.tags.hourly);
        assert!(b.tags.hourly);
    }

    #[tokio::test]
    async fn test_select_tier_exclusive_ignores_finer_flags() {
        let pool = create_test_pool().await;
        let repo = SqliteBackupRepo::new(pool.clone());

        // hourly-tagged record keeps its minutely flag (cascade invariant).
        repo.insert(new_backup("promoted", "nightly", "2024-03-01T02:00:00Z"))
            .await
            .unwrap();
        set_tags(
            &pool,
            "promoted",
            TagSet {
                reference: true,
                minutely: true,
                hourly: true,
                ..Default::default()
            },
        )
        .await;

        let hourly = repo
            .select_tier_exclusive("nightly", Some(Tier::Hourly), 0, 10)
            .await
            .unwrap();
        assert_eq!(hourly.len(), 1);
        assert_eq!(hourly[0].id, "promoted");

        // But a coarser flag removes it from the hourly exclusive set.
        set_tags(
            &pool,
            "promoted",
            TagSet {
                reference: true,
                minutely: true,
                hourly: true,
                daily: true,
                ..Default::default()
            },
        )
        .await;
        let hourly = repo
            .select_tier_exclusive("nightly", Some(Tier::Hourly), 0, 10)
            .await
            .unwrap();
        assert!(hourly.is_empty());
    }

    #[tokio::test]
    async fn test_select_tier_exclusive_untagged_bucket() {
        let pool = create_test_pool().await;
        let repo = SqliteBackupRepo::new(pool.clone());

        repo.insert(new_backup("noise", "nightly", "2024-03-01T02:00:00Z"))
            .await
            .unwrap();
        repo.insert(new_backup("kept", "nightly", "2024-03-02T02:00:00Z"))
            .await
            .unwrap();
        set_tags(
            &pool,
            "kept",
            TagSet {
                reference: true,
                minutely: true,
                ..Default::default()
            },
        )
        .await;

        let untagged = repo
            .select_tier_exclusive("nightly", None, 0, 10)
            .await
            .unwrap();
        assert_eq!(untagged.len(), 1);
        assert_eq!(untagged[0].id, "noise");

        // A record carrying only `reference` still counts as untagged.
        set_tags(
            &pool,
            "noise",
            TagSet {
                reference: true,
                ..Default::default()
            },
        )
        .await;
        let untagged = repo
            .select_tier_exclusive("nightly", None, 0, 10)
            .await
            .unwrap();
        assert_eq!(untagged.len(), 1);
    }

    #[tokio::test]
    async fn test_select_tier_exclusive_skip_newest() {
        let pool = create_test_pool().await;
        let repo = SqliteBackupRepo::new(pool.clone());

        for (id, ts) in [
            ("m1", "2024-03-01T02:00:00Z"),
            ("m2", "2024-03-02T02:00:00Z"),
            ("m3", "2024-03-03T02:00:00Z"),
        ] {
            repo.insert(new_backup(id, "nightly", ts)).await.unwrap();
            set_tags(
                &pool,
                id,
                TagSet {
                    reference: true,
                    minutely: true,
                    ..Default::default()
                },
            )
            .await;
        }

        let beyond_two = repo
            .select_tier_exclusive("nightly", Some(Tier::Minutely), 2, 10)
            .await
            .unwrap();
        // The two newest are retained; only the oldest is returned.
        assert_eq!(beyond_two.len(), 1);
        assert_eq!(beyond_two[0].id, "m1");
    }

    #[tokio::test]
    async fn test_select_tier_exclusive_skips_non_available() {
        let pool = create_test_pool().await;
        let repo = SqliteBackupRepo::new(pool.clone());

        repo.insert(new_backup("deleting", "nightly", "2024-03-01T02:00:00Z"))
            .await
            .unwrap();
        set_tags(
            &pool,
            "deleting",
            TagSet {
                reference: true,
                minutely: true,
                ..Default::default()
            },
        )
        .await;
        repo.mark_deleting("deleting").await.unwrap();

        let candidates = repo
            .select_tier_exclusive("nightly", Some(Tier::Minutely), 0, 10)
            .await
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_mark_deleting_is_conditional() {
        let pool = create_test_pool().await;
        let repo = SqliteBackupRepo::new(pool);

        repo.insert(new_backup("b1", "nightly", "2024-03-01T02:00:00Z"))
            .await
            .unwrap();

        assert_eq!(repo.mark_deleting("b1").await.unwrap(), 1);
        // Already deleting: the transition must not re-apply.
        assert_eq!(repo.mark_deleting("b1").await.unwrap(), 0);

        let mut failed = new_backup("b2", "nightly", "2024-03-02T02:00:00Z");
        failed.status = BackupStatus::Error;
        repo.insert(failed).await.unwrap();
        // Errored backups are not eligible for the deleting transition.
        assert_eq!(repo.mark_deleting("b2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_operation_bookkeeping() {
        let pool = create_test_pool().await;
        let repo = SqliteBackupRepo::new(pool);

        repo.insert(new_backup("b1", "nightly", "2024-03-01T02:00:00Z"))
            .await
            .unwrap();
        repo.mark_deleting("b1").await.unwrap();
        repo.set_running_delete_operation("b1", Some("wf-42"))
            .await
            .unwrap();

        let record = repo.get("b1").await.unwrap().unwrap();
        assert_eq!(record.deletion_status, DeletionStatus::Deleting);
        assert_eq!(record.running_delete_operation, Some("wf-42".to_string()));

        assert_eq!(
            repo.set_deletion_status("b1", DeletionStatus::Deleted)
                .await
                .unwrap(),
            1
        );
        repo.set_running_delete_operation("b1", None).await.unwrap();

        let record = repo.get("b1").await.unwrap().unwrap();
        assert_eq!(record.deletion_status, DeletionStatus::Deleted);
        assert!(record.running_delete_operation.is_none());
    }
}
