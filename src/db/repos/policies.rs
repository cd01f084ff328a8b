use async_trait::async_trait;

use crate::{db::error::DbResult, models::BackupPolicy};

#[async_trait]
pub trait PolicyRepo: Send + Sync {
    /// Create a new policy. Fails with `DbError::Conflict` if the name is
    /// already taken.
    async fn create(&self, policy: &BackupPolicy) -> DbResult<()>;

    /// Update an existing policy by name. `DbError::NotFound` if absent.
    async fn update(&self, policy: &BackupPolicy) -> DbResult<()>;

    /// Get a policy by name.
    async fn get(&self, name: &str) -> DbResult<Option<BackupPolicy>>;

    /// List all policies, ordered by name.
    async fn list(&self) -> DbResult<Vec<BackupPolicy>>;

    /// Store or clear the id of the in-flight create operation.
    ///
    /// This is the persisted single-in-flight invariant: triggering is a
    /// no-op while an operation id is stored and the operation is active.
    async fn set_running_create_operation(
        &self,
        name: &str,
        operation_id: Option<&str>,
    ) -> DbResult<()>;
}
