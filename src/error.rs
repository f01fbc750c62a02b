//! Error types for data-packager
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (validation, bundle build, orchestration, etc.)
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes

use crate::types::{JobId, JobState};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for data-packager operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for data-packager
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "packaging.max_jobs")
        key: Option<String>,
    },

    /// A request was rejected before it reached admission
    #[error("validation error: {0}")]
    Validation(String),

    /// No status snapshot exists for the job id (never created or expired)
    #[error("job not found: {id}")]
    JobNotFound {
        /// The id that was looked up
        id: JobId,
    },

    /// One bundle could not be built
    ///
    /// Scoped to a single bundle: the job continues with the remaining bundles.
    #[error("bundle {index} failed: {reason}")]
    BundleBuild {
        /// Zero-based bundle index
        index: usize,
        /// What went wrong
        reason: String,
    },

    /// The query collaborator or the planning step failed for a job
    #[error("orchestration error: {0}")]
    Orchestration(String),

    /// A status write would move a job backwards or out of a terminal state
    #[error("invalid state transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        /// Job whose snapshot was being written
        id: JobId,
        /// State currently stored
        from: JobState,
        /// State the write tried to set
        to: JobState,
    },

    /// Operation is not allowed in the job's current state
    #[error("cannot {operation} job {id} in state {current_state}")]
    InvalidState {
        /// Job the operation targeted
        id: JobId,
        /// The operation that was attempted (e.g., "cancel", "resend email")
        operation: String,
        /// The job's current state
        current_state: JobState,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Archive writer error
    #[error("archive error: {0}")]
    Archive(String),

    /// Mail transport error
    #[error("mail error: {0}")]
    Mail(String),

    /// Status cache backend error
    #[error("status cache error: {0}")]
    Cache(String),

    /// Shutdown in progress - not accepting new jobs
    #[error("shutdown in progress: not accepting new packaging jobs")]
    ShuttingDown,

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl From<zip::result::ZipError> for Error {
    fn from(error: zip::result::ZipError) -> Self {
        match error {
            zip::result::ZipError::Io(e) => Error::Io(e),
            other => Error::Archive(other.to_string()),
        }
    }
}

/// API error response format
///
/// This is the JSON structure returned by the REST API when an error occurs.
///
/// # Example JSON
///
/// ```json
/// {
///   "error": {
///     "code": "job_not_found",
///     "message": "job not found: pkg1718000000000_1a2b3c4d",
///     "details": {
///       "job_id": "pkg1718000000000_1a2b3c4d"
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "job_not_found", "validation_error")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error (job id, state, config key)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create an API error with additional details
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - Client error (invalid input)
            Error::Config { .. } => 400,
            Error::Validation(_) => 400,

            // 404 Not Found
            Error::JobNotFound { .. } => 404,

            // 409 Conflict - job is not in a state that allows the operation
            Error::InvalidTransition { .. } => 409,
            Error::InvalidState { .. } => 409,

            // 422 Unprocessable Entity - the request was valid but packaging could not proceed
            Error::BundleBuild { .. } => 422,
            Error::Orchestration(_) => 422,

            // 500 Internal Server Error - Server-side issues
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::Archive(_) => 500,
            Error::Cache(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,

            // 502 Bad Gateway - External service errors
            Error::Network(_) => 502,
            Error::Mail(_) => 502,

            // 503 Service Unavailable
            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Validation(_) => "validation_error",
            Error::JobNotFound { .. } => "job_not_found",
            Error::BundleBuild { .. } => "bundle_build_failed",
            Error::Orchestration(_) => "orchestration_error",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::InvalidState { .. } => "invalid_state",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Network(_) => "network_error",
            Error::Archive(_) => "archive_error",
            Error::Mail(_) => "mail_error",
            Error::Cache(_) => "cache_error",
            Error::ShuttingDown => "shutting_down",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({
                "key": key,
            })),
            Error::JobNotFound { id } => Some(serde_json::json!({
                "job_id": id,
            })),
            Error::BundleBuild { index, .. } => Some(serde_json::json!({
                "bundle_index": index,
            })),
            Error::InvalidTransition { id, from, to } => Some(serde_json::json!({
                "job_id": id,
                "from": from,
                "to": to,
            })),
            Error::InvalidState {
                id,
                operation,
                current_state,
            } => Some(serde_json::json!({
                "job_id": id,
                "operation": operation,
                "current_state": current_state,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_not_found_maps_to_404_with_job_id_details() {
        let id = JobId::from("pkg_missing");
        let error = Error::JobNotFound { id: id.clone() };

        assert_eq!(error.status_code(), 404);
        assert_eq!(error.error_code(), "job_not_found");

        let api: ApiError = error.into();
        assert_eq!(api.error.code, "job_not_found");
        assert_eq!(
            api.error.details,
            Some(serde_json::json!({ "job_id": "pkg_missing" })),
            "details must carry the looked-up id"
        );
    }

    #[test]
    fn validation_maps_to_400_without_details() {
        let error = Error::Validation("base_file_name must not be empty".into());
        assert_eq!(error.status_code(), 400);

        let api: ApiError = error.into();
        assert_eq!(api.error.code, "validation_error");
        assert!(api.error.message.contains("base_file_name"));
        assert!(api.error.details.is_none());
    }

    #[test]
    fn invalid_state_details_include_operation_and_state() {
        let error = Error::InvalidState {
            id: JobId::from("pkg_1"),
            operation: "resend email".into(),
            current_state: JobState::Processing,
        };
        assert_eq!(error.status_code(), 409);

        let api: ApiError = error.into();
        let details = api.error.details.unwrap();
        assert_eq!(details["operation"], "resend email");
        assert_eq!(details["current_state"], "PROCESSING");
    }

    #[test]
    fn shutting_down_is_service_unavailable() {
        assert_eq!(Error::ShuttingDown.status_code(), 503);
        assert_eq!(Error::ShuttingDown.error_code(), "shutting_down");
    }

    #[test]
    fn zip_io_errors_convert_to_io_variant() {
        let zip_err = zip::result::ZipError::Io(std::io::Error::other("disk full"));
        let error: Error = zip_err.into();
        assert!(matches!(error, Error::Io(_)), "got {error:?}");

        let error: Error = zip::result::ZipError::FileNotFound.into();
        assert!(matches!(error, Error::Archive(_)), "got {error:?}");
    }

    #[test]
    fn api_error_serializes_without_null_details() {
        let api = ApiError::validation("bad input");
        let json = serde_json::to_value(&api).unwrap();
        assert_eq!(json["error"]["code"], "validation_error");
        assert!(json["error"].get("details").is_none());
    }
}
