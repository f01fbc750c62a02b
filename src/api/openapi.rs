//! OpenAPI documentation and schema generation
//!
//! Defines the OpenAPI specification for the data-packager REST API using utoipa for
//! compile-time spec generation.

use utoipa::OpenApi;

/// OpenAPI documentation for the data-packager REST API
///
/// The spec can be accessed via:
/// - `/openapi.json` - JSON format OpenAPI specification
/// - `/swagger-ui` - Interactive Swagger UI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "data-packager REST API",
        version = "0.1.0",
        description = "Submit file packaging requests, follow job status and retrieve archive download scripts",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:8642", description = "Local development server")
    ),
    paths(
        // Packages
        crate::api::routes::submit_package,
        crate::api::routes::get_package,
        crate::api::routes::cancel_package,
        crate::api::routes::abort_package,
        crate::api::routes::set_package_email,
        crate::api::routes::resend_package_email,
        crate::api::routes::download_script,

        // Queue
        crate::api::routes::queue_stats,
        crate::api::routes::queue_jobs,

        // System
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
        crate::api::routes::event_stream,
    ),
    components(schemas(
        // Core types from types.rs
        crate::types::JobId,
        crate::types::JobState,
        crate::types::JobAttribute,
        crate::types::SizeClass,
        crate::types::BundleState,
        crate::types::BundleProgress,
        crate::types::JobStatus,
        crate::types::DownloadRequest,
        crate::types::QueueStats,
        crate::types::JobDiagnostics,
        crate::types::Event,

        // Retrieval scripts
        crate::notifier::ScriptFlavor,
        crate::notifier::ScriptOptions,
        crate::notifier::DownloadScript,

        // API request types from routes
        crate::api::routes::AbortRequest,
        crate::api::routes::SetEmailRequest,
        crate::api::routes::ResendEmailQuery,
        crate::api::routes::ScriptQuery,

        // Error types from error.rs
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "packages", description = "Packaging jobs - Submit requests, follow status, cancel, email and scripts"),
        (name = "queue", description = "Admission queue - Budgets, counters and per-job timing"),
        (name = "system", description = "System endpoints - Health checks, OpenAPI spec, events"),
    )
)]
pub struct ApiDoc;
