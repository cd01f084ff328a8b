use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::Deserialize;

use super::ApiError;
use crate::{
    AppState,
    models::{BackupPolicy, TierPolicy},
};

/// Policy fields shared by create and update. Retention tiers use the
/// compact `"N@R"` form; omitted tiers fall back to the stock defaults
/// (daily 4, weekly 4, monthly 3, yearly 2).
#[derive(Debug, Deserialize)]
pub struct PolicyPayload {
    pub enabled: Option<bool>,
    pub workflow_name: String,
    pub workflow_version: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub schedule: Option<String>,
    pub retention_minutely: Option<String>,
    pub retention_hourly: Option<String>,
    pub retention_daily: Option<String>,
    pub retention_weekly: Option<String>,
    pub retention_monthly: Option<String>,
    pub retention_yearly: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePolicyRequest {
    pub name: String,
    #[serde(flatten)]
    pub payload: PolicyPayload,
}

fn parse_tier(value: &Option<String>, default: &str) -> Result<TierPolicy, ApiError> {
    value
        .as_deref()
        .unwrap_or(default)
        .parse()
        .map_err(ApiError::BadRequest)
}

fn build_policy(name: String, payload: PolicyPayload) -> Result<BackupPolicy, ApiError> {
    if name.is_empty() {
        return Err(ApiError::BadRequest("'name' is required".to_string()));
    }
    if payload.workflow_name.is_empty() {
        return Err(ApiError::BadRequest(
            "'workflow_name' is required".to_string(),
        ));
    }

    let mut policy = BackupPolicy {
        name,
        enabled: payload.enabled.unwrap_or(true),
        workflow_name: payload.workflow_name,
        workflow_version: payload.workflow_version,
        from_date: payload.from_date,
        to_date: payload.to_date,
        schedule: payload.schedule,
        minutely: parse_tier(&payload.retention_minutely, "0@L")?,
        hourly: parse_tier(&payload.retention_hourly, "0@L")?,
        daily: parse_tier(&payload.retention_daily, "4@L")?,
        weekly: parse_tier(&payload.retention_weekly, "4@L")?,
        monthly: parse_tier(&payload.retention_monthly, "3@L")?,
        yearly: parse_tier(&payload.retention_yearly, "2@L")?,
        running_create_operation: None,
        last_update: Utc::now(),
    };
    if policy.schedule.is_none() {
        policy.schedule = Some(policy.default_schedule());
    }
    Ok(policy)
}

#[tracing::instrument(name = "policies.list", skip(state))]
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<BackupPolicy>>, ApiError> {
    let policies = state.db.policies().list().await?;
    Ok(Json(policies))
}

#[tracing::instrument(name = "policies.create", skip(state, request))]
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreatePolicyRequest>,
) -> Result<(StatusCode, Json<BackupPolicy>), ApiError> {
    let policy = build_policy(request.name, request.payload)?;
    state.db.policies().create(&policy).await?;
    tracing::info!(policy = %policy.name, "Backup policy created");
    Ok((StatusCode::CREATED, Json(policy)))
}

#[tracing::instrument(name = "policies.get", skip(state))]
pub async fn get_policy(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<BackupPolicy>, ApiError> {
    let policy = state
        .db
        .policies()
        .get(&name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("policy '{}' not found", name)))?;
    Ok(Json(policy))
}

#[tracing::instrument(name = "policies.update", skip(state, payload))]
pub async fn update(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<PolicyPayload>,
) -> Result<Json<BackupPolicy>, ApiError> {
    let policy = build_policy(name, payload)?;
    state.db.policies().update(&policy).await?;
    tracing::info!(policy = %policy.name, "Backup policy updated");
    Ok(Json(policy))
}
