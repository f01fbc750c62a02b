//! # data-packager
//!
//! Background packaging of query results into size-bounded ZIP bundles.
//!
//! A caller submits a [`DownloadRequest`]; the service enumerates the selected files
//! through a [`FileGroupProcessor`], splits them into bundles no larger than the
//! configured limit, and builds each bundle with an [`Archiver`]. Jobs are admitted
//! under two concurrency budgets (all jobs, and large jobs), their status is kept in a
//! shared [`StatusStore`] with a TTL, and jobs that outlive a short immediate wait are
//! reported by email on completion.
//!
//! ## Quick Start
//!
//! ```no_run
//! use data_packager::{Config, DownloadRequest, FileGroup, FileInfo, PackagingService, StaticFileGroups};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let files = FileGroup::new(vec![FileInfo::new("/data/m31.fits", "m31.fits", 4_200_000)]);
//!     let query = Arc::new(StaticFileGroups::new(vec![files]));
//!     let service = PackagingService::with_zip_archiver(Config::default(), query)?;
//!
//!     // Subscribe to events
//!     let mut events = service.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let status = service
//!         .submit(DownloadRequest {
//!             base_file_name: "m31".into(),
//!             data_source: "wise".into(),
//!             ..Default::default()
//!         })
//!         .await?;
//!     println!("job {} is {}", status.id, status.state);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Admission control with global and large-job budgets
pub mod admission;
/// REST API module
pub mod api;
/// Size estimation, bundle planning and archive building
pub mod bundler;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Job wrapper with timing data
pub mod job;
/// File model handed over by the query layer
pub mod model;
/// Completion emails and retrieval scripts
pub mod notifier;
/// Packaging service (decomposed into focused submodules)
pub mod packaging;
/// Query layer seam
pub mod query;
/// Shared job status storage
pub mod status_store;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use admission::{Admission, AdmissionController, AdmissionLimits};
pub use bundler::{Archiver, PackagedBundle, Packager, ZipArchiver, plan_bundles};
pub use config::Config;
pub use error::{ApiError, Error, ErrorDetail, Result, ToHttpStatus};
pub use job::JobWrapper;
pub use model::{FileGroup, FileInfo};
pub use notifier::{MailSender, Notifier, ScriptFlavor, ScriptOptions, WebhookMailSender};
pub use packaging::{Collaborators, PackagingService};
pub use query::{FileGroupProcessor, StaticFileGroups};
pub use status_store::{MemoryStatusCache, StatusCache, StatusStore};
pub use types::{
    BundleProgress, BundleState, DownloadRequest, Event, JobAttribute, JobDiagnostics, JobId,
    JobState, JobStatus, QueueStats, SizeClass,
};

/// Helper function to run the service with graceful signal handling.
///
/// Waits for a termination signal and then calls the service's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use data_packager::{Config, PackagingService, StaticFileGroups, run_with_shutdown};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let query = Arc::new(StaticFileGroups::new(Vec::new()));
///     let service = Arc::new(PackagingService::with_zip_archiver(Config::default(), query)?);
///     let _api = service.spawn_api_server();
///
///     // Run with automatic signal handling
///     run_with_shutdown(&service).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(service: &PackagingService) -> Result<()> {
    wait_for_signal().await;
    service.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // registration may fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
