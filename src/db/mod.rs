mod error;
pub mod repos;
pub mod sqlite;

use std::sync::Arc;

pub use error::{DbError, DbResult};
pub use repos::*;

use crate::config::DatabaseConfig;

/// Cached repository trait objects, created once at startup.
struct CachedRepos {
    policies: Arc<dyn PolicyRepo>,
    backups: Arc<dyn BackupRepo>,
}

/// SQLite-backed database pool.
///
/// Repositories are cached at construction time to avoid allocation on each
/// access.
pub struct DbPool {
    pool: sqlx::SqlitePool,
    repos: CachedRepos,
}

impl DbPool {
    /// Create a DbPool from an existing SQLite pool.
    /// Primarily useful for testing.
    pub fn from_sqlite(pool: sqlx::SqlitePool) -> Self {
        let repos = CachedRepos {
            policies: Arc::new(sqlite::SqlitePolicyRepo::new(pool.clone())),
            backups: Arc::new(sqlite::SqliteBackupRepo::new(pool.clone())),
        };
        DbPool { pool, repos }
    }

    /// Create a database pool from configuration.
    pub async fn from_config(config: &DatabaseConfig) -> DbResult<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(
                sqlx::sqlite::SqliteConnectOptions::new()
                    .filename(&config.path)
                    .create_if_missing(config.create_if_missing)
                    .journal_mode(if config.wal_mode {
                        sqlx::sqlite::SqliteJournalMode::Wal
                    } else {
                        sqlx::sqlite::SqliteJournalMode::Delete
                    })
                    .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms)),
            )
            .await?;

        Ok(Self::from_sqlite(pool))
    }

    /// Run database migrations using sqlx's migration runner.
    pub async fn run_migrations(&self) -> DbResult<()> {
        tracing::info!("Running SQLite migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("SQLite migrations completed successfully");
        Ok(())
    }

    /// Get the policy repository.
    pub fn policies(&self) -> Arc<dyn PolicyRepo> {
        Arc::clone(&self.repos.policies)
    }

    /// Get the backup ledger repository.
    pub fn backups(&self) -> Arc<dyn BackupRepo> {
        Arc::clone(&self.repos.backups)
    }

    /// Health check for database connectivity.
    pub async fn health_check(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
