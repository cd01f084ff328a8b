use async_trait::async_trait;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::PolicyRepo,
    },
    models::{BackupPolicy, TierPolicy},
};

const POLICY_COLUMNS: &str = "name, enabled, workflow_name, workflow_version, from_date, \
     to_date, schedule, retention_minutely, retention_hourly, retention_daily, \
     retention_weekly, retention_monthly, retention_yearly, \
     running_create_operation, last_update";

pub struct SqlitePolicyRepo {
    pool: SqlitePool,
}

impl SqlitePolicyRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn parse_tier(row: &SqliteRow, column: &str) -> DbResult<TierPolicy> {
    row.get::<String, _>(column)
        .parse()
        .map_err(|e| DbError::Internal(format!("bad {} value: {}", column, e)))
}

fn map_policy_row(row: &SqliteRow) -> DbResult<BackupPolicy> {
    Ok(BackupPolicy {
        name: row.get("name"),
        enabled: row.get("enabled"),
        workflow_name: row.get("workflow_name"),
        workflow_version: row.get("workflow_version"),
        from_date: row.get("from_date"),
        to_date: row.get("to_date"),
        schedule: row.get("schedule"),
        minutely: parse_tier(row, "retention_minutely")?,
        hourly: parse_tier(row, "retention_hourly")?,
        daily: parse_tier(row, "retention_daily")?,
        weekly: parse_tier(row, "retention_weekly")?,
        monthly: parse_tier(row, "retention_monthly")?,
        yearly: parse_tier(row, "retention_yearly")?,
        running_create_operation: row.get("running_create_operation"),
        last_update: row.get("last_update"),
    })
}

#[async_trait]
impl PolicyRepo for SqlitePolicyRepo {
    async fn create(&self, policy: &BackupPolicy) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO backup_policies (
                name, enabled, workflow_name, workflow_version, from_date, to_date,
                schedule, retention_minutely, retention_hourly, retention_daily,
                retention_weekly, retention_monthly, retention_yearly, last_update
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&policy.name)
        .bind(policy.enabled)
        .bind(&policy.workflow_name)
        .bind(&policy.workflow_version)
        .bind(policy.from_date)
        .bind(policy.to_date)
        .bind(&policy.schedule)
        .bind(policy.minutely.to_string())
        .bind(policy.hourly.to_string())
        .bind(policy.daily.to_string())
        .bind(policy.weekly.to_string())
        .bind(policy.monthly.to_string())
        .bind(policy.yearly.to_string())
        .bind(policy.last_update)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(DbError::Conflict(
                format!("policy '{}' already exists", policy.name),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, policy: &BackupPolicy) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE backup_policies SET
                enabled = ?, workflow_name = ?, workflow_version = ?, from_date = ?,
                to_date = ?, schedule = ?, retention_minutely = ?, retention_hourly = ?,
                retention_daily = ?, retention_weekly = ?, retention_monthly = ?,
                retention_yearly = ?, last_update = ?
            WHERE name = ?
            "#,
        )
        .bind(policy.enabled)
        .bind(&policy.workflow_name)
        .bind(&policy.workflow_version)
        .bind(policy.from_date)
        .bind(policy.to_date)
        .bind(&policy.schedule)
        .bind(policy.minutely.to_string())
        .bind(policy.hourly.to_string())
        .bind(policy.daily.to_string())
        .bind(policy.weekly.to_string())
        .bind(policy.monthly.to_string())
        .bind(policy.yearly.to_string())
        .bind(policy.last_update)
        .bind(&policy.name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn get(&self, name: &str) -> DbResult<Option<BackupPolicy>> {
        let sql = format!(
            "SELECT {} FROM backup_policies WHERE name = ?",
            POLICY_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_policy_row).transpose()
    }

    async fn list(&self) -> DbResult<Vec<BackupPolicy>> {
        let sql = format!(
            "SELECT {} FROM backup_policies ORDER BY name",
            POLICY_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(map_policy_row).collect()
    }

    async fn set_running_create_operation(
        &self,
        name: &str,
        operation_id: Option<&str>,
    ) -> DbResult<()> {
        let result =
            sqlx::query("UPDATE backup_policies SET running_create_operation = ? WHERE name = ?")
                .bind(operation_id)
                .bind(name)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::models::TierReference;

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

    fn sample_policy(name: &str) -> BackupPolicy {
        BackupPolicy {
            name: name.to_string(),
            enabled: true,
            workflow_name: "backup_db".to_string(),
            workflow_version: Some("2".to_string()),
            from_date: None,
            to_date: Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()),
            schedule: Some("0 0 2 * * * *".to_string()),
            minutely: "2@59".parse().unwrap(),
            hourly: "3@L".parse().unwrap(),
            daily: "4@L".parse().unwrap(),
            weekly: "4@L".parse().unwrap(),
            monthly: "3@L".parse().unwrap(),
            yearly: "2@L".parse().unwrap(),
            running_create_operation: None,
            last_update: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_create_get_roundtrip() {
        let pool = create_test_pool().await;
        let repo = SqlitePolicyRepo::new(pool);

        let policy = sample_policy("nightly");
        repo.create(&policy).await.expect("create failed");

        let fetched = repo
            .get("nightly")
            .await
            .expect("get failed")
            .expect("missing");
        assert_eq!(fetched.name, "nightly");
        assert!(fetched.enabled);
        assert_eq!(fetched.workflow_name, "backup_db");
        assert_eq!(fetched.workflow_version, Some("2".to_string()));
        assert!(fetched.from_date.is_none());
        assert_eq!(fetched.to_date, policy.to_date);
        assert_eq!(fetched.minutely.retain, 2);
        assert_eq!(fetched.minutely.reference, TierReference::Unit(59));
        assert_eq!(fetched.monthly.reference, TierReference::Last);
        assert!(fetched.running_create_operation.is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_name_conflicts() {
        let pool = create_test_pool().await;
        let repo = SqlitePolicyRepo::new(pool);

        repo.create(&sample_policy("nightly")).await.unwrap();
        let err = repo
            .create(&sample_policy("nightly"))
            .await
            .expect_err("duplicate create should fail");
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let pool = create_test_pool().await;
        let repo = SqlitePolicyRepo::new(pool);

        let err = repo
            .update(&sample_policy("ghost"))
            .await
            .expect_err("update of missing policy should fail");
        assert!(matches!(err, DbError::NotFound));
    }

    #[tokio::test]
    async fn test_update_changes_fields() {
        let pool = create_test_pool().await;
        let repo = SqlitePolicyRepo::new(pool);

        repo.create(&sample_policy("nightly")).await.unwrap();

        let mut updated = sample_policy("nightly");
        updated.enabled = false;
        updated.daily = "7@12".parse().unwrap();
        repo.update(&updated).await.expect("update failed");

        let fetched = repo.get("nightly").await.unwrap().unwrap();
        assert!(!fetched.enabled);
        assert_eq!(fetched.daily.retain, 7);
        assert_eq!(fetched.daily.reference, TierReference::Unit(12));
    }

    #[tokio::test]
    async fn test_list_ordered_by_name() {
        let pool = create_test_pool().await;
        let repo = SqlitePolicyRepo::new(pool);

        repo.create(&sample_policy("zeta")).await.unwrap();
        repo.create(&sample_policy("alpha")).await.unwrap();

        let policies = repo.list().await.expect("list failed");
        let names: Vec<_> = policies.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_running_create_operation_roundtrip() {
        let pool = create_test_pool().await;
        let repo = SqlitePolicyRepo::new(pool);

        repo.create(&sample_policy("nightly")).await.unwrap();

        repo.set_running_create_operation("nightly", Some("wf-1"))
            .await
            .unwrap();
        let fetched = repo.get("nightly").await.unwrap().unwrap();
        assert_eq!(fetched.running_create_operation, Some("wf-1".to_string()));

        repo.set_running_create_operation("nightly", None)
            .await
            .unwrap();
        let fetched = repo.get("nightly").await.unwrap().unwrap();
        assert!(fetched.running_create_operation.is_none());

        let err = repo
            .set_running_create_operation("ghost", Some("wf-2"))
            .await
            .expect_err("missing policy should fail");
        assert!(matches!(err, DbError::NotFound));
    }
}
