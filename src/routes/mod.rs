//! Thin administrative API: policy CRUD, backup listing, immediate
//! triggering, and health/metrics endpoints.

mod backups;
mod error;
mod health;
mod policies;

use axum::{Router, routing::get};
pub use error::ApiError;

use crate::AppState;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/policies", get(policies::list).post(policies::create))
        .route(
            "/policies/{name}",
            get(policies::get_policy).put(policies::update),
        )
        .route(
            "/policies/{name}/backups",
            get(backups::list).post(backups::trigger),
        )
        .route("/health", get(health::health_check))
        .route("/health/live", get(health::liveness))
        .route("/metrics", get(health::metrics))
}
