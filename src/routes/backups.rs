use axum::{
    Json,
    extract::{Path, Query, State},
};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use super::ApiError;
use crate::{
    AppState,
    models::{BackupQuery, BackupRecord, BackupStatus, TagFilter},
    tasks::backup::{TriggerOutcome, trigger_backup},
};

#[derive(Debug, Deserialize)]
pub struct ListBackupsQuery {
    pub tag: Option<String>,
    pub status: Option<String>,
}

/// Backup record as listed by the admin API, with tags flattened to names.
#[derive(Debug, Serialize)]
pub struct BackupView {
    pub id: String,
    pub policy_name: String,
    pub data_ref: Option<String>,
    pub status: BackupStatus,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub end_time: chrono::DateTime<chrono::Utc>,
    pub size_mb: Option<f64>,
    pub deletion_status: crate::models::DeletionStatus,
    pub tags: Vec<&'static str>,
}

impl From<BackupRecord> for BackupView {
    fn from(record: BackupRecord) -> Self {
        let tags = record.tags.names();
        BackupView {
            id: record.id,
            policy_name: record.policy_name,
            data_ref: record.data_ref,
            status: record.status,
            start_time: record.start_time,
            end_time: record.end_time,
            size_mb: record.size_mb,
            deletion_status: record.deletion_status,
            tags,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
}

#[tracing::instrument(name = "backups.list", skip(state))]
pub async fn list(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ListBackupsQuery>,
) -> Result<Json<Vec<BackupView>>, ApiError> {
    state
        .db
        .policies()
        .get(&name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("policy '{}' not found", name)))?;

    let tag = query
        .tag
        .as_deref()
        .map(str::parse::<TagFilter>)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let status = query
        .status
        .as_deref()
        .map(str::parse::<BackupStatus>)
        .transpose()
        .map_err(ApiError::BadRequest)?;

    let records = state
        .db
        .backups()
        .list(
            &name,
            &BackupQuery {
                tag,
                status,
                ..Default::default()
            },
        )
        .await?;
    Ok(Json(records.into_iter().map(BackupView::from).collect()))
}

/// Trigger an immediate backup for the policy. A trigger while another
/// create operation is outstanding reports `skipped_running` and launches
/// nothing.
#[tracing::instrument(name = "backups.trigger", skip(state))]
pub async fn trigger(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<TriggerResponse>), ApiError> {
    let policy = state
        .db
        .policies()
        .get(&name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("policy '{}' not found", name)))?;

    let outcome = trigger_backup(&state.db, &state.gateway, &state.locks, &policy)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let (status, response) = match outcome {
        TriggerOutcome::Started { operation_id } => (
            StatusCode::ACCEPTED,
            TriggerResponse {
                outcome: "started",
                operation_id: Some(operation_id),
            },
        ),
        TriggerOutcome::SkippedRunning => (
            StatusCode::OK,
            TriggerResponse {
                outcome: "skipped_running",
                operation_id: None,
            },
        ),
        TriggerOutcome::SkippedInactive => (
            StatusCode::OK,
            TriggerResponse {
                outcome: "skipped_inactive",
                operation_id: None,
            },
        ),
    };
    Ok((status, Json(response)))
}
