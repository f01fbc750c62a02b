//! Job wrapper: one packaging run plus its submission metadata

use crate::types::{JobDiagnostics, JobId, SizeClass};
use futures::future::BoxFuture;
use std::future::Future;
use std::time::{Duration, Instant};

/// A unit of work owned by the admission controller
///
/// Holds the packaging future until the controller starts it, and the timing data used
/// for queue statistics and stuck-job diagnostics.
pub struct JobWrapper {
    id: JobId,
    size_class: SizeClass,
    estimated_bytes: u64,
    submitted_at: Instant,
    started_at: Option<Instant>,
    work: Option<BoxFuture<'static, ()>>,
}

impl JobWrapper {
    /// Wrap `work`; the estimate decides the admission class
    pub fn new<F>(id: JobId, estimated_bytes: u64, large_threshold: u64, work: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            id,
            size_class: SizeClass::classify(estimated_bytes, large_threshold),
            estimated_bytes,
            submitted_at: Instant::now(),
            started_at: None,
            work: Some(Box::pin(work)),
        }
    }

    /// Job id
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Admission class
    pub fn size_class(&self) -> SizeClass {
        self.size_class
    }

    /// Whether the job needs a large permit
    pub fn is_large(&self) -> bool {
        self.size_class == SizeClass::Large
    }

    /// Estimated job size
    pub fn estimated_bytes(&self) -> u64 {
        self.estimated_bytes
    }

    /// A worker has been started for this job
    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    /// Time spent in the wait queue (up to now while still waiting)
    pub fn waited(&self) -> Duration {
        match self.started_at {
            Some(started) => started.duration_since(self.submitted_at),
            None => self.submitted_at.elapsed(),
        }
    }

    /// Time since a worker started (zero while waiting)
    pub fn packaging_elapsed(&self) -> Duration {
        self.started_at.map(|s| s.elapsed()).unwrap_or_default()
    }

    /// Time since submission
    pub fn total_elapsed(&self) -> Duration {
        self.submitted_at.elapsed()
    }

    /// Mark the job started and hand out its work; `None` if already taken
    pub(crate) fn start(&mut self) -> Option<BoxFuture<'static, ()>> {
        let work = self.work.take()?;
        self.started_at = Some(Instant::now());
        Some(work)
    }

    /// Snapshot for diagnostics endpoints and logs
    pub fn diagnostics(&self) -> JobDiagnostics {
        JobDiagnostics {
            id: self.id.clone(),
            size_class: self.size_class,
            estimated_bytes: self.estimated_bytes,
            running: self.is_running(),
            waited_secs: self.waited().as_secs(),
            packaging_secs: self.packaging_elapsed().as_secs(),
        }
    }
}

impl std::fmt::Debug for JobWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobWrapper")
            .field("id", &self.id)
            .field("size_class", &self.size_class)
            .field("estimated_bytes", &self.estimated_bytes)
            .field("running", &self.is_running())
            .finish()
    }
}
