//! Admission control: two concurrency budgets and a FIFO wait queue
//!
//! Every running job holds one permit of the global budget; a large job also holds one
//! permit of the large budget. Jobs that cannot start wait in a single FIFO queue.
//! Promotion walks the queue front to back and starts each job whose class currently
//! has room, so a blocked large job never holds back a small one behind it (and vice
//! versa), while jobs of the same class keep their submission order.

use crate::config::PackagingConfig;
use crate::job::JobWrapper;
use crate::types::{JobDiagnostics, JobId, QueueStats};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info};

/// Budget and congestion settings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdmissionLimits {
    /// Global concurrency budget
    pub max_jobs: usize,
    /// Large-job concurrency budget
    pub max_large_jobs: usize,
    /// Queue length above which the queue counts as long
    pub warning_queue_size: usize,
}

impl From<&PackagingConfig> for AdmissionLimits {
    fn from(config: &PackagingConfig) -> Self {
        Self {
            max_jobs: config.max_jobs,
            max_large_jobs: config.max_large_jobs,
            warning_queue_size: config.warning_queue_size,
        }
    }
}

/// Outcome of [`AdmissionController::submit`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// A worker was started right away
    Started,
    /// The job waits; `position` 0 is the front of the queue
    Queued {
        /// Index in the wait queue
        position: usize,
    },
    /// The controller is closed; the job was dropped
    Rejected,
}

struct Permits {
    _global: OwnedSemaphorePermit,
    _large: Option<OwnedSemaphorePermit>,
}

#[derive(Default)]
struct ControllerState {
    waiting: VecDeque<JobWrapper>,
    running: HashMap<JobId, JobWrapper>,
    closed: bool,
    queue_high_water: usize,
    total_completed: u64,
    total_immediate: u64,
    longest_wait: Duration,
}

struct Inner {
    limits: AdmissionLimits,
    global: Arc<Semaphore>,
    large: Arc<Semaphore>,
    state: Mutex<ControllerState>,
    idle: Notify,
}

/// Per-process admission controller
///
/// Cheap to clone; clones share the same budgets and queue.
#[derive(Clone)]
pub struct AdmissionController {
    inner: Arc<Inner>,
}

impl AdmissionController {
    /// Create a controller with the given budgets
    pub fn new(limits: AdmissionLimits) -> Self {
        Self {
            inner: Arc::new(Inner {
                limits,
                global: Arc::new(Semaphore::new(limits.max_jobs)),
                large: Arc::new(Semaphore::new(limits.max_large_jobs)),
                state: Mutex::new(ControllerState::default()),
                idle: Notify::new(),
            }),
        }
    }

    /// Budgets this controller enforces
    pub fn limits(&self) -> AdmissionLimits {
        self.inner.limits
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Queue the job and start whatever the budgets allow
    ///
    /// Must be called from within a tokio runtime; started jobs run on spawned tasks.
    pub fn submit(&self, job: JobWrapper) -> Admission {
        let id = job.id().clone();
        let mut state = self.lock();
        if state.closed {
            debug!(job_id = %id, "admission closed, dropping job");
            return Admission::Rejected;
        }

        debug!(job_id = %id, size_class = ?job.size_class(), "job submitted for admission");
        state.waiting.push_back(job);
        self.promote(&mut state);

        if state.running.contains_key(&id) {
            state.total_immediate += 1;
            Admission::Started
        } else {
            let position = state
                .waiting
                .iter()
                .position(|j| j.id() == &id)
                .unwrap_or(state.waiting.len());
            Admission::Queued { position }
        }
    }

    // start every queued job whose class has room, in queue order
    fn promote(&self, state: &mut ControllerState) {
        let mut started = 0usize;
        let mut index = 0usize;

        while !state.closed && index < state.waiting.len() {
            if self.inner.global.available_permits() == 0 {
                break;
            }
            let large = if state.waiting[index].is_large() {
                match self.inner.large.clone().try_acquire_owned() {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        index += 1;
                        continue;
                    }
                }
            } else {
                None
            };
            let Ok(global) = self.inner.global.clone().try_acquire_owned() else {
                break;
            };
            let Some(job) = state.waiting.remove(index) else {
                break;
            };
            self.start(state, job, Permits {
                _global: global,
                _large: large,
            });
            started += 1;
        }

        state.queue_high_water = state.queue_high_water.max(state.waiting.len());

        if started > 0 {
            let running_large = state.running.values().filter(|j| j.is_large()).count();
            info!(
                started,
                running = state.running.len(),
                running_large,
                waiting = state.waiting.len(),
                max_jobs = self.inner.limits.max_jobs,
                max_large_jobs = self.inner.limits.max_large_jobs,
                "admission queue status"
            );
        }
    }

    fn start(&self, state: &mut ControllerState, mut job: JobWrapper, permits: Permits) {
        let id = job.id().clone();
        let Some(work) = job.start() else {
            error!(job_id = %id, "job has no work to run");
            return;
        };
        state.running.insert(id.clone(), job);

        let controller = self.clone();
        tokio::spawn(async move {
            // inner task isolates panics so permits and promotion always follow
            if let Err(e) = tokio::spawn(work).await {
                if e.is_panic() {
                    error!(job_id = %id, "packaging task panicked");
                } else {
                    debug!(job_id = %id, "packaging task was aborted");
                }
            }
            drop(permits);
            controller.job_completed(&id);
        });
    }

    fn job_completed(&self, id: &JobId) {
        let mut state = self.lock();
        if let Some(job) = state.running.remove(id) {
            state.total_completed += 1;
            state.longest_wait = state.longest_wait.max(job.waited());
            info!(
                job_id = %id,
                packaging_secs = job.packaging_elapsed().as_secs_f64(),
                wait_secs = job.waited().as_secs_f64(),
                estimated_bytes = job.estimated_bytes(),
                "packaging job completed"
            );
        }
        self.promote(&mut state);
        if state.running.is_empty() {
            self.inner.idle.notify_waiters();
        }
    }

    /// Take a job out of the wait queue; `None` if it is not waiting
    pub fn remove_waiting(&self, id: &JobId) -> Option<JobWrapper> {
        let mut state = self.lock();
        let position = state.waiting.iter().position(|j| j.id() == id)?;
        state.waiting.remove(position)
    }

    /// Stop starting jobs and hand back everything still waiting
    pub fn close(&self) -> Vec<JobWrapper> {
        let mut state = self.lock();
        state.closed = true;
        state.waiting.drain(..).collect()
    }

    /// Wait until no job is running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.running_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Whether the job is waiting or running here
    pub fn contains(&self, id: &JobId) -> bool {
        let state = self.lock();
        state.running.contains_key(id) || state.waiting.iter().any(|j| j.id() == id)
    }

    /// Number of jobs in the wait queue
    pub fn queue_len(&self) -> usize {
        self.lock().waiting.len()
    }

    /// Number of running jobs
    pub fn running_count(&self) -> usize {
        self.lock().running.len()
    }

    /// Wait queue is longer than the warning size
    pub fn is_queue_long(&self) -> bool {
        self.queue_len() > self.inner.limits.warning_queue_size
    }

    /// Counters for status reports
    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        let longest_waiting = state
            .waiting
            .iter()
            .map(JobWrapper::waited)
            .max()
            .unwrap_or_default();
        QueueStats {
            running: state.running.len(),
            running_large: state.running.values().filter(|j| j.is_large()).count(),
            waiting: state.waiting.len(),
            waiting_large: state.waiting.iter().filter(|j| j.is_large()).count(),
            max_jobs: self.inner.limits.max_jobs,
            max_large_jobs: self.inner.limits.max_large_jobs,
            queue_high_water: state.queue_high_water,
            total_completed: state.total_completed,
            total_immediate: state.total_immediate,
            longest_wait_secs: state.longest_wait.max(longest_waiting).as_secs(),
            queue_long: state.waiting.len() > self.inner.limits.warning_queue_size,
        }
    }

    /// Timing data for every running and waiting job, running first
    pub fn diagnostics(&self) -> Vec<JobDiagnostics> {
        let state = self.lock();
        let mut out: Vec<JobDiagnostics> =
            state.running.values().map(JobWrapper::diagnostics).collect();
        out.sort_by(|a, b| b.packaging_secs.cmp(&a.packaging_secs));
        out.extend(state.waiting.iter().map(JobWrapper::diagnostics));
        out
    }
}
