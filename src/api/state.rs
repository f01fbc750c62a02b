//! Application state for the API server

use crate::{Config, PackagingService};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request (cheap Arc clone).
#[derive(Clone)]
pub struct AppState {
    /// The packaging service
    pub service: Arc<PackagingService>,

    /// Configuration (read-only)
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(service: Arc<PackagingService>, config: Arc<Config>) -> Self {
        Self { service, config }
    }
}
