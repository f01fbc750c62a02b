//! Queue monitoring handlers.

use crate::api::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

/// GET /queue/stats - Get admission counters
#[utoipa::path(
    get,
    path = "/queue/stats",
    tag = "queue",
    responses(
        (status = 200, description = "Queue statistics", body = crate::types::QueueStats)
    )
)]
pub async fn queue_stats(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.service.queue_stats()))
}

/// GET /queue/jobs - Timing diagnostics for running and waiting jobs
#[utoipa::path(
    get,
    path = "/queue/jobs",
    tag = "queue",
    responses(
        (status = 200, description = "Running jobs (longest first), then waiting jobs", body = Vec<crate::types::JobDiagnostics>)
    )
)]
pub async fn queue_jobs(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.service.diagnostics()))
}
