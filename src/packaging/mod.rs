//! Packaging service split into focused submodules.
//!
//! The `PackagingService` struct and its methods are organized by domain:
//! - [`submit`] - Request validation, preparation and the immediate-wait handshake
//! - [`control`] - Status lookups, cancellation, email and script operations
//! - [`lifecycle`] - Shutdown coordination
//! - [`monitor`] - Stuck-job diagnostics

mod control;
mod lifecycle;
mod monitor;
mod submit;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::admission::{AdmissionController, AdmissionLimits};
use crate::bundler::{Archiver, ZipArchiver};
use crate::config::Config;
use crate::error::Result;
use crate::notifier::{MailSender, Notifier, WebhookMailSender};
use crate::query::FileGroupProcessor;
use crate::status_store::{MemoryStatusCache, StatusCache, StatusStore};
use crate::types::{Event, JobId};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

/// External collaborators a [`PackagingService`] works with
pub struct Collaborators {
    /// Enumerates the files of a request
    pub file_groups: Arc<dyn FileGroupProcessor>,
    /// Writes bundle archives
    pub archiver: Arc<dyn Archiver>,
    /// Status backend; `None` uses an in-memory cache sized from the config
    pub status_cache: Option<Arc<dyn StatusCache>>,
    /// Mail transport; `None` uses the configured mail webhook, if any
    pub mail_sender: Option<Arc<dyn MailSender>>,
}

impl Collaborators {
    /// Required collaborators; cache and mail fall back to config-driven defaults
    pub fn new(file_groups: Arc<dyn FileGroupProcessor>, archiver: Arc<dyn Archiver>) -> Self {
        Self {
            file_groups,
            archiver,
            status_cache: None,
            mail_sender: None,
        }
    }

    /// Share job status through this cache
    pub fn with_status_cache(mut self, cache: Arc<dyn StatusCache>) -> Self {
        self.status_cache = Some(cache);
        self
    }

    /// Deliver completion emails through this transport
    pub fn with_mail_sender(mut self, sender: Arc<dyn MailSender>) -> Self {
        self.mail_sender = Some(sender);
        self
    }
}

/// Main packaging service (cloneable - all fields are Arc-wrapped)
///
/// Instances are independent: each has its own admission budgets, event channel and
/// (unless a shared cache is supplied) its own status store.
#[derive(Clone)]
pub struct PackagingService {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Job status snapshots
    pub(crate) store: StatusStore,
    /// Concurrency budgets and wait queue
    pub(crate) controller: AdmissionController,
    /// Completion emails
    pub(crate) notifier: Notifier,
    /// Query layer
    pub(crate) file_groups: Arc<dyn FileGroupProcessor>,
    /// Archive writer
    pub(crate) archiver: Arc<dyn Archiver>,
    /// Cancellation tokens of jobs admitted by this process
    pub(crate) active_jobs: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
    /// Flag to indicate whether new jobs are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl PackagingService {
    /// Create a service from a validated config and its collaborators
    pub fn new(config: Config, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(1000);

        let cache = collaborators.status_cache.unwrap_or_else(|| {
            Arc::new(MemoryStatusCache::new(
                config.status_store.ttl,
                config.status_store.max_entries,
            ))
        });
        let store = StatusStore::new(cache, event_tx.clone());

        let mail_sender = collaborators.mail_sender.or_else(|| {
            config
                .notifications
                .mail_webhook
                .as_ref()
                .map(|webhook| Arc::new(WebhookMailSender::new(webhook)) as Arc<dyn MailSender>)
        });
        let notifier = Notifier::new(config.notifications.clone(), mail_sender, event_tx.clone());

        let controller = AdmissionController::new(AdmissionLimits::from(&config.packaging));

        tracing::info!(
            max_jobs = config.packaging.max_jobs,
            max_large_jobs = config.packaging.max_large_jobs,
            large_package_bytes = config.packaging.large_package_bytes,
            mail_enabled = notifier.is_enabled(),
            "packaging service created"
        );

        Ok(Self {
            config: Arc::new(config),
            event_tx,
            store,
            controller,
            notifier,
            file_groups: collaborators.file_groups,
            archiver: collaborators.archiver,
            active_jobs: Arc::new(Mutex::new(HashMap::new())),
            accepting_new: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Create a service that writes ZIP bundles into the configured staging directory
    pub fn with_zip_archiver(
        config: Config,
        file_groups: Arc<dyn FileGroupProcessor>,
    ) -> Result<Self> {
        let archiver = Arc::new(ZipArchiver::from_config(&config.archive)?);
        Self::new(config, Collaborators::new(file_groups, archiver))
    }

    /// Subscribe to packaging events
    ///
    /// Every status write is published as [`Event::StatusChanged`], so consumers can
    /// follow jobs without polling.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Spawn the REST API server in a background task
    pub fn spawn_api_server(self: &Arc<Self>) -> tokio::task::JoinHandle<Result<()>> {
        let service = self.clone();
        let config = self.config.clone();

        tokio::spawn(async move { crate::api::start_api_server(service, config).await })
    }
}
