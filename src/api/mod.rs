//! REST API server module
//!
//! Provides an OpenAPI 3.1 compliant REST API for submitting packaging requests,
//! following their status and monitoring the admission queue.

use crate::{Config, PackagingService, Result};
use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post, put},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Packages
/// - `POST /packages` - Submit a packaging request
/// - `GET /packages/:id` - Get job status
/// - `POST /packages/:id/cancel` - Cancel a job
/// - `POST /packages/:id/abort` - Abandon a job with a reason
/// - `PUT /packages/:id/email` - Set the completion email address
/// - `POST /packages/:id/email/resend` - Send the completion email again
/// - `GET /packages/:id/script` - Retrieval script for multi-archive jobs
///
/// ## Queue
/// - `GET /queue/stats` - Admission counters
/// - `GET /queue/jobs` - Per-job timing diagnostics
///
/// ## System
/// - `GET /health` - Health check
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /swagger-ui` - Interactive Swagger UI documentation (if enabled)
/// - `GET /events` - Server-sent events stream
/// - `GET /staging/*` - Built archives
pub fn create_router(service: Arc<PackagingService>, config: Arc<Config>) -> Router {
    let state = AppState::new(service, config.clone());

    let router = Router::new()
        // Packages
        .route("/packages", post(routes::submit_package))
        .route("/packages/:id", get(routes::get_package))
        .route("/packages/:id/cancel", post(routes::cancel_package))
        .route("/packages/:id/abort", post(routes::abort_package))
        .route("/packages/:id/email", put(routes::set_package_email))
        .route("/packages/:id/email/resend", post(routes::resend_package_email))
        .route("/packages/:id/script", get(routes::download_script))
        // Queue
        .route("/queue/stats", get(routes::queue_stats))
        .route("/queue/jobs", get(routes::queue_jobs))
        // System
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec))
        .route("/events", get(routes::event_stream))
        // Archives written by the zip archiver
        .nest_service("/staging", ServeDir::new(&config.archive.staging_dir));

    // Merge Swagger UI routes if enabled in config (before applying state)
    let router = if config.api.swagger_ui {
        router.merge(SwaggerUi::new("/swagger-ui").url("/openapi.json", ApiDoc::openapi()))
    } else {
        router
    };

    let router = router.with_state(state).layer(TraceLayer::new_for_http());

    if config.api.cors_enabled {
        let cors = build_cors_layer(&config.api.cors_origins);
        router.layer(cors)
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// `"*"` (or an empty list) allows any origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on the configured bind address.
///
/// Runs until the server stops.
///
/// # Example
///
/// ```no_run
/// use data_packager::{Config, PackagingService, StaticFileGroups};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::default();
/// let query = Arc::new(StaticFileGroups::new(Vec::new()));
/// let service = Arc::new(PackagingService::with_zip_archiver(config.clone(), query)?);
///
/// // Start API server (blocks until shutdown)
/// data_packager::api::start_api_server(service, Arc::new(config)).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(service: Arc<PackagingService>, config: Arc<Config>) -> Result<()> {
    let bind_address = config.api.bind_address;

    tracing::info!(address = %bind_address, "Starting API server");

    let app = create_router(service, config);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
