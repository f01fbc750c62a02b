//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`packages`] - Submission and per-job operations
//! - [`queue`] - Admission monitoring
//! - [`system`] - Health, events, OpenAPI

use crate::notifier::ScriptFlavor;
use serde::{Deserialize, Serialize};

mod packages;
mod queue;
mod system;

pub use packages::*;
pub use queue::*;
pub use system::*;

/// Request body for POST /packages/:id/abort
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct AbortRequest {
    /// Why the job is abandoned
    #[serde(default)]
    pub reason: String,
}

/// Request body for PUT /packages/:id/email
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct SetEmailRequest {
    /// Address for the completion email
    pub email: String,
}

/// Query parameters for POST /packages/:id/email/resend
#[derive(Debug, Default, Deserialize, Serialize, utoipa::ToSchema)]
pub struct ResendEmailQuery {
    /// Send to this address instead of the stored one
    pub email: Option<String>,
}

/// Query parameters for GET /packages/:id/script
#[derive(Debug, Default, Deserialize, Serialize, utoipa::ToSchema)]
pub struct ScriptQuery {
    /// Script kind (default: wget)
    pub flavor: Option<ScriptFlavor>,
    /// Unzip each archive after download
    #[serde(default)]
    pub unzip: bool,
    /// Delete each archive after unzipping
    #[serde(default)]
    pub remove_zip: bool,
}
