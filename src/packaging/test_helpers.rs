//! Shared test helpers for creating PackagingService instances in tests.

use crate::bundler::{ArchiveOutcome, ArchiveRequest, Archiver};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{FileGroup, FileInfo};
use crate::notifier::{EmailMessage, MailSender};
use crate::packaging::{Collaborators, PackagingService};
use crate::query::FileGroupProcessor;
use crate::types::{DownloadRequest, Event, JobId, JobStatus};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, broadcast};

/// Estimated size above which test jobs are large
pub(crate) const LARGE_BYTES: u64 = 1_000;

/// Archiver that builds nothing on disk and blocks each bundle until released
pub(crate) struct GatedArchiver {
    gate: Semaphore,
    pub(crate) built: Mutex<Vec<(JobId, usize)>>,
    pub(crate) failing: HashSet<usize>,
}

impl GatedArchiver {
    /// Every bundle waits for [`GatedArchiver::release`]
    pub(crate) fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            built: Mutex::new(Vec::new()),
            failing: HashSet::new(),
        })
    }

    /// Bundles build without waiting
    pub(crate) fn open() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(Semaphore::MAX_PERMITS),
            built: Mutex::new(Vec::new()),
            failing: HashSet::new(),
        })
    }

    /// Bundles with these indexes fail
    pub(crate) fn failing(indexes: &[usize]) -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(Semaphore::MAX_PERMITS),
            built: Mutex::new(Vec::new()),
            failing: indexes.iter().copied().collect(),
        })
    }

    /// Let `n` more bundles through
    pub(crate) fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub(crate) fn built_count(&self) -> usize {
        self.built.lock().unwrap().len()
    }
}

#[async_trait]
impl Archiver for GatedArchiver {
    async fn build(&self, request: ArchiveRequest) -> Result<ArchiveOutcome> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| Error::Other(e.to_string()))?;
        permit.forget();

        if self.failing.contains(&request.bundle_index) {
            return Err(Error::Archive(format!(
                "disk full writing {}",
                request.archive_name
            )));
        }
        self.built
            .lock()
            .unwrap()
            .push((request.job_id.clone(), request.bundle_index));
        Ok(ArchiveOutcome {
            url: format!(
                "http://files.test/staging/{}_{}.zip?name={}",
                request.job_id, request.bundle_index, request.archive_name
            ),
            bytes_written: request.entries.iter().map(|e| e.size_bytes).sum(),
            failed: Vec::new(),
        })
    }
}

/// Query layer serving fixed groups, or failing
pub(crate) struct FixedQuery {
    groups: Vec<FileGroup>,
    fail: bool,
}

impl FixedQuery {
    pub(crate) fn new(groups: Vec<FileGroup>) -> Arc<Self> {
        Arc::new(Self {
            groups,
            fail: false,
        })
    }

    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self {
            groups: Vec::new(),
            fail: true,
        })
    }
}

#[async_trait]
impl FileGroupProcessor for FixedQuery {
    async fn file_groups(&self, _request: &DownloadRequest) -> Result<Vec<FileGroup>> {
        if self.fail {
            return Err(Error::Other("catalog offline".into()));
        }
        Ok(self.groups.clone())
    }
}

/// Mail transport that keeps every message
#[derive(Default)]
pub(crate) struct Outbox {
    pub(crate) sent: Mutex<Vec<EmailMessage>>,
}

impl Outbox {
    pub(crate) fn messages(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailSender for Outbox {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Config with small budgets and a short immediate wait
pub(crate) fn test_config() -> Config {
    let mut config = Config::default();
    config.packaging.max_jobs = 2;
    config.packaging.max_large_jobs = 1;
    config.packaging.large_package_bytes = LARGE_BYTES;
    config.packaging.warning_queue_size = 1;
    config.packaging.default_max_bundle_bytes = 100;
    config.packaging.immediate_wait = Duration::from_millis(150);
    config.packaging.shutdown_timeout = Duration::from_secs(2);
    config
}

/// One group of `count` files of `size` bytes each
pub(crate) fn files(count: usize, size: u64) -> FileGroup {
    FileGroup::new(
        (0..count)
            .map(|i| FileInfo::new(format!("/data/f{i}.fits"), format!("f{i}.fits"), size))
            .collect(),
    )
}

pub(crate) fn request(email: Option<&str>) -> DownloadRequest {
    DownloadRequest {
        base_file_name: "m31".into(),
        title: "M31 cutouts".into(),
        email: email.map(str::to_string),
        data_source: "wise".into(),
        ..Default::default()
    }
}

/// Service over the given collaborators with an [`Outbox`] mail transport
pub(crate) fn create_test_service(
    config: Config,
    query: Arc<dyn FileGroupProcessor>,
    archiver: Arc<dyn Archiver>,
) -> (PackagingService, Arc<Outbox>) {
    let outbox = Arc::new(Outbox::default());
    let collaborators =
        Collaborators::new(query, archiver).with_mail_sender(outbox.clone() as Arc<dyn MailSender>);
    let service = PackagingService::new(config, collaborators).unwrap();
    (service, outbox)
}

/// Wait until the job's snapshot is terminal
pub(crate) async fn wait_terminal(service: &PackagingService, id: &JobId) -> JobStatus {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = service.status(id).await.unwrap();
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job did not finish in time")
}

/// Wait until `predicate` holds for the job's snapshot
pub(crate) async fn wait_until<F>(service: &PackagingService, id: &JobId, predicate: F) -> JobStatus
where
    F: Fn(&JobStatus) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = service.status(id).await.unwrap();
            if predicate(&status) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time")
}

/// Next event matching `predicate`
pub(crate) async fn next_event<F>(rx: &mut broadcast::Receiver<Event>, predicate: F) -> Event
where
    F: Fn(&Event) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.unwrap();
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not received in time")
}
