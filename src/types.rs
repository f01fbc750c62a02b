//! Core types for data-packager

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

/// Opaque identifier for a packaging job
///
/// Generated once at submission and used as the Status Store key. Treat it as an
/// opaque string: any process sharing the store can look a job up by it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a fresh id of the form `pkg{unix_millis}_{random hex}`
    pub fn generate() -> Self {
        let millis = Utc::now().timestamp_millis();
        let suffix: u32 = rand::random();
        Self(format!("pkg{millis}_{suffix:08x}"))
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

/// Lifecycle state of a packaging job
///
/// Transitions are monotonic: `Waiting -> Processing -> terminal`. A job may also go
/// straight from `Waiting` to a terminal state (canceled while queued, or failed before
/// its first bundle started).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Accepted and waiting for admission
    Waiting,
    /// A worker is building bundles
    Processing,
    /// At least one bundle was built and the job was not canceled
    Success,
    /// Every bundle failed, or the job failed before bundling
    Fail,
    /// Canceled on request (or by shutdown)
    Canceled,
    /// Abandoned by the user with an explicit reason
    UserAborted,
}

impl JobState {
    /// True for SUCCESS, FAIL, CANCELED and USER_ABORTED
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Success | JobState::Fail | JobState::Canceled | JobState::UserAborted
        )
    }

    fn rank(&self) -> u8 {
        match self {
            JobState::Waiting => 0,
            JobState::Processing => 1,
            _ => 2,
        }
    }

    /// Whether a snapshot in this state may be overwritten by one in `next`
    ///
    /// Rewriting the same non-terminal state is allowed (progress updates). A terminal
    /// state may only be rewritten with itself, which lets attributes such as
    /// `EmailSent` be added after completion.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next.rank() > self.rank()
    }

    /// Wire name of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "WAITING",
            JobState::Processing => "PROCESSING",
            JobState::Success => "SUCCESS",
            JobState::Fail => "FAIL",
            JobState::Canceled => "CANCELED",
            JobState::UserAborted => "USER_ABORTED",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags attached to a job status snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub enum JobAttribute {
    /// The wait queue was congested when the job was submitted
    LongQueue,
    /// The job outlived the immediate wait; a completion email may be sent
    CanSendEmail,
    /// A completion email was sent
    EmailSent,
    /// The job produced several bundles; a retrieval script is available
    DownloadScript,
}

/// Admission class derived from the estimated job size
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    /// Needs a global permit only
    Small,
    /// Needs a large permit and a global permit
    Large,
}

impl SizeClass {
    /// Classify an estimate: large when strictly above the threshold
    pub fn classify(estimated_bytes: u64, large_threshold: u64) -> Self {
        if estimated_bytes > large_threshold {
            SizeClass::Large
        } else {
            SizeClass::Small
        }
    }
}

/// Build state of one bundle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BundleState {
    /// Not built yet
    #[default]
    Waiting,
    /// The archiver is writing this bundle
    Processing,
    /// Archive written and published
    Success,
    /// The archiver failed for this bundle
    Fail,
}

/// Per-bundle progress within a [`JobStatus`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BundleProgress {
    /// Zero-based bundle index
    pub index: usize,
    /// Number of files planned into the bundle
    pub total_files: usize,
    /// Planned size of the bundle
    pub total_bytes: u64,
    /// Bytes the archiver reported as written
    pub processed_bytes: u64,
    /// Retrieval URL, once the archive exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Build state
    pub state: BundleState,
}

/// Snapshot of a packaging job as held by the Status Store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct JobStatus {
    /// Job id (store key)
    pub id: JobId,
    /// Lifecycle state
    pub state: JobState,
    /// Estimated size of all files in the job
    pub total_size_bytes: u64,
    /// Number of bundles planned
    pub bundle_count: usize,
    /// Per-bundle progress
    pub bundles: Vec<BundleProgress>,
    /// Human-readable messages accumulated while packaging
    pub messages: Vec<String>,
    /// Cancellation was requested
    pub canceled: bool,
    /// Reason given when the user abandoned the job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    /// Address for the completion email
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Display title of the request
    pub title: String,
    /// Base name used for archive and script file names
    pub base_file_name: String,
    /// Data source the files came from
    pub data_source: String,
    /// Flags (sorted, no duplicates)
    pub attributes: Vec<JobAttribute>,
    /// When the job was submitted
    pub created_at: DateTime<Utc>,
    /// When the snapshot was last written
    pub updated_at: DateTime<Utc>,
}

impl JobStatus {
    /// Initial WAITING snapshot for a freshly accepted request
    pub fn waiting(id: JobId, request: &DownloadRequest) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: JobState::Waiting,
            total_size_bytes: 0,
            bundle_count: 0,
            bundles: Vec::new(),
            messages: Vec::new(),
            canceled: false,
            abort_reason: None,
            email: request.email.clone().filter(|e| !e.trim().is_empty()),
            title: request.title.clone(),
            base_file_name: request.base_file_name.clone(),
            data_source: request.data_source.clone(),
            attributes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// True once the job reached SUCCESS, FAIL, CANCELED or USER_ABORTED
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether the attribute is set
    pub fn has_attribute(&self, attribute: JobAttribute) -> bool {
        self.attributes.contains(&attribute)
    }

    /// Set an attribute, keeping the list sorted and free of duplicates
    pub fn add_attribute(&mut self, attribute: JobAttribute) {
        if let Err(pos) = self.attributes.binary_search(&attribute) {
            self.attributes.insert(pos, attribute);
        }
    }

    /// Append a message unless the same text is already present
    pub fn push_message(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.messages.contains(&message) {
            self.messages.push(message);
        }
    }

    /// URLs of the bundles that were built
    pub fn urls(&self) -> Vec<&str> {
        self.bundles
            .iter()
            .filter(|b| b.state == BundleState::Success)
            .filter_map(|b| b.url.as_deref())
            .collect()
    }

    /// Bytes actually written on SUCCESS, the estimate otherwise
    pub fn effective_size_bytes(&self) -> u64 {
        if self.state == JobState::Success {
            self.bundles.iter().map(|b| b.processed_bytes).sum()
        } else {
            self.total_size_bytes
        }
    }
}

/// A packaging request as submitted by a caller
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct DownloadRequest {
    /// Base name for archives and scripts (required, non-empty)
    pub base_file_name: String,
    /// Display title
    #[serde(default)]
    pub title: String,
    /// Optional address for the completion email
    #[serde(default)]
    pub email: Option<String>,
    /// Data source identifier handed to the query collaborator (required, non-empty)
    pub data_source: String,
    /// Search parameters handed to the query collaborator
    #[serde(default)]
    pub search_parameters: HashMap<String, String>,
    /// Per-request bundle size limit; 0 or absent uses the configured default
    #[serde(default)]
    pub max_bundle_bytes: Option<u64>,
}

/// Point-in-time counters of the admission controller
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QueueStats {
    /// Jobs currently running
    pub running: usize,
    /// Large jobs currently running
    pub running_large: usize,
    /// Jobs in the wait queue
    pub waiting: usize,
    /// Large jobs in the wait queue
    pub waiting_large: usize,
    /// Global concurrency budget
    pub max_jobs: usize,
    /// Large-job concurrency budget
    pub max_large_jobs: usize,
    /// Longest the wait queue has been
    pub queue_high_water: usize,
    /// Jobs that finished since startup
    pub total_completed: u64,
    /// Jobs that started without waiting in the queue
    pub total_immediate: u64,
    /// Longest time any job spent waiting, in seconds
    pub longest_wait_secs: u64,
    /// Wait queue is above the warning size
    pub queue_long: bool,
}

/// Observational timing data for one job known to the controller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct JobDiagnostics {
    /// Job id
    pub id: JobId,
    /// Admission class
    pub size_class: SizeClass,
    /// Estimated size
    pub estimated_bytes: u64,
    /// A worker owns the job
    pub running: bool,
    /// Seconds spent in the wait queue (so far, if still waiting)
    pub waited_secs: u64,
    /// Seconds spent packaging (0 while waiting)
    pub packaging_secs: u64,
}

/// Event emitted during the packaging lifecycle
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Job entered the wait queue
    Queued {
        /// Job ID
        id: JobId,
        /// Position in the wait queue (0 = next)
        position: usize,
        /// Admission class
        size_class: SizeClass,
    },

    /// A worker picked the job up
    Started {
        /// Job ID
        id: JobId,
        /// Admission class
        size_class: SizeClass,
    },

    /// A status snapshot was written
    StatusChanged {
        /// The snapshot as stored
        status: JobStatus,
    },

    /// A completion email was handed to the mail transport
    NotificationSent {
        /// Job ID
        id: JobId,
        /// Recipient
        to: String,
    },

    /// A completion email could not be sent
    NotificationFailed {
        /// Job ID
        id: JobId,
        /// Transport error
        error: String,
    },

    /// Service is shutting down
    Shutdown,
}
