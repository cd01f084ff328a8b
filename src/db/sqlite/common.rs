use sqlx::{Row, sqlite::SqliteRow};

use crate::{
    db::error::{DbError, DbResult},
    models::{BackupRecord, BackupStatus, DeletionStatus, TagSet},
};

/// Column list shared by every query that materializes a `BackupRecord`.
pub(super) const BACKUP_COLUMNS: &str = "id, policy_name, data_ref, status, start_time, \
     end_time, size_mb, deletion_status, running_delete_operation, \
     reference, minutely, hourly, daily, weekly, monthly, yearly";

pub(super) fn parse_status(s: &str) -> DbResult<BackupStatus> {
    s.parse().map_err(DbError::Internal)
}

pub(super) fn parse_deletion_status(s: &str) -> DbResult<DeletionStatus> {
    s.parse().map_err(DbError::Internal)
}

pub(super) fn map_backup_row(row: &SqliteRow) -> DbResult<BackupRecord> {
    Ok(BackupRecord {
        id: row.get("id"),
        policy_name: row.get("policy_name"),
        data_ref: row.get("data_ref"),
        status: parse_status(&row.get::<String, _>("status"))?,
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        size_mb: row.get("size_mb"),
        deletion_status: parse_deletion_status(&row.get::<String, _>("deletion_status"))?,
        running_delete_operation: row.get("running_delete_operation"),
        tags: TagSet {
            reference: row.get("reference"),
            minutely: row.get("minutely"),
            hourly: row.get("hourly"),
            daily: row.get("daily"),
            weekly: row.get("weekly"),
            monthly: row.get("monthly"),
            yearly: row.get("yearly"),
        },
    })
}
