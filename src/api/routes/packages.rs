//! Packaging job handlers.

use super::{AbortRequest, ResendEmailQuery, ScriptQuery, SetEmailRequest};
use crate::api::AppState;
use crate::notifier::ScriptOptions;
use crate::types::{DownloadRequest, JobId};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

/// POST /packages - Submit a packaging request
///
/// Answers 200 when the job finished within the immediate wait, 202 when it
/// continues in the background.
#[utoipa::path(
    post,
    path = "/packages",
    tag = "packages",
    request_body = crate::types::DownloadRequest,
    responses(
        (status = 200, description = "Job finished within the immediate wait", body = crate::types::JobStatus),
        (status = 202, description = "Job accepted and continues in the background", body = crate::types::JobStatus),
        (status = 400, description = "Invalid request", body = crate::error::ApiError),
        (status = 503, description = "Service is shutting down", body = crate::error::ApiError)
    )
)]
pub async fn submit_package(
    State(state): State<AppState>,
    Json(request): Json<DownloadRequest>,
) -> Response {
    match state.service.submit(request).await {
        Ok(status) => {
            let code = if status.is_terminal() {
                StatusCode::OK
            } else {
                StatusCode::ACCEPTED
            };
            (code, Json(status)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// GET /packages/:id - Get job status
#[utoipa::path(
    get,
    path = "/packages/{id}",
    tag = "packages",
    params(
        ("id" = String, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Current job status", body = crate::types::JobStatus),
        (status = 404, description = "Job not found or expired", body = crate::error::ApiError)
    )
)]
pub async fn get_package(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.service.status(&JobId::from(id)).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /packages/:id/cancel - Cancel a job
#[utoipa::path(
    post,
    path = "/packages/{id}/cancel",
    tag = "packages",
    params(
        ("id" = String, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Status after the cancellation request", body = crate::types::JobStatus),
        (status = 404, description = "Job not found", body = crate::error::ApiError)
    )
)]
pub async fn cancel_package(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.service.cancel(&JobId::from(id)).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /packages/:id/abort - Abandon a job with a reason
#[utoipa::path(
    post,
    path = "/packages/{id}/abort",
    tag = "packages",
    params(
        ("id" = String, Path, description = "Job ID")
    ),
    request_body = AbortRequest,
    responses(
        (status = 200, description = "Status after the abort request", body = crate::types::JobStatus),
        (status = 404, description = "Job not found", body = crate::error::ApiError)
    )
)]
pub async fn abort_package(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AbortRequest>,
) -> Response {
    match state.service.abort(&JobId::from(id), body.reason).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// PUT /packages/:id/email - Set the completion email address
#[utoipa::path(
    put,
    path = "/packages/{id}/email",
    tag = "packages",
    params(
        ("id" = String, Path, description = "Job ID")
    ),
    request_body = SetEmailRequest,
    responses(
        (status = 200, description = "Updated job status", body = crate::types::JobStatus),
        (status = 400, description = "Invalid email address", body = crate::error::ApiError),
        (status = 404, description = "Job not found", body = crate::error::ApiError)
    )
)]
pub async fn set_package_email(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SetEmailRequest>,
) -> Response {
    match state.service.set_email(&JobId::from(id), &body.email).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /packages/:id/email/resend - Send the completion email again
#[utoipa::path(
    post,
    path = "/packages/{id}/email/resend",
    tag = "packages",
    params(
        ("id" = String, Path, description = "Job ID"),
        ("email" = Option<String>, Query, description = "Send to this address instead of the stored one")
    ),
    responses(
        (status = 200, description = "Email sent", body = crate::types::JobStatus),
        (status = 404, description = "Job not found", body = crate::error::ApiError),
        (status = 409, description = "Job has not finished", body = crate::error::ApiError),
        (status = 502, description = "Mail transport failed", body = crate::error::ApiError)
    )
)]
pub async fn resend_package_email(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ResendEmailQuery>,
) -> Response {
    match state
        .service
        .resend_email(&JobId::from(id), query.email.as_deref())
        .await
    {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /packages/:id/script - Retrieval script for a multi-archive job
#[utoipa::path(
    get,
    path = "/packages/{id}/script",
    tag = "packages",
    params(
        ("id" = String, Path, description = "Job ID"),
        ("flavor" = Option<crate::notifier::ScriptFlavor>, Query, description = "wget (default), curl or urls_only"),
        ("unzip" = Option<bool>, Query, description = "Unzip each archive after download"),
        ("remove_zip" = Option<bool>, Query, description = "Delete each archive after unzipping")
    ),
    responses(
        (status = 200, description = "Script body as an attachment", content_type = "text/plain"),
        (status = 404, description = "Job not found", body = crate::error::ApiError),
        (status = 409, description = "Job has no retrieval script", body = crate::error::ApiError)
    )
)]
pub async fn download_script(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ScriptQuery>,
) -> Response {
    let options = ScriptOptions {
        unzip: query.unzip,
        remove_zip: query.remove_zip,
    };
    match state
        .service
        .download_script(&JobId::from(id), query.flavor.unwrap_or_default(), options)
        .await
    {
        Ok(script) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", script.file_name),
                ),
            ],
            script.content,
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}
