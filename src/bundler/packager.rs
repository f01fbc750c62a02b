use super::archiver::{ArchiveEntry, ArchiveRequest, Archiver, README_NAME};
use super::{PackagedBundle, archive_name};
use crate::error::{Error, Result};
use crate::model::FileGroup;
use crate::status_store::StatusStore;
use crate::types::{BundleProgress, BundleState, JobAttribute, JobId, JobState, JobStatus};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Builds the bundles of one job, in order, and records progress in the Status Store
///
/// Cancellation (the token, or the canceled flag in the store) is checked before each
/// bundle. A bundle that is already being archived always runs to completion.
pub struct Packager {
    job_id: JobId,
    base_file_name: String,
    groups: Vec<FileGroup>,
    bundles: Vec<PackagedBundle>,
    archiver: Arc<dyn Archiver>,
    store: StatusStore,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Tally {
    succeeded: usize,
    denied: usize,
    failed_files: usize,
    one_file: bool,
}

impl Packager {
    /// Bind planned bundles to the collaborators that build and record them
    pub fn new(
        job_id: JobId,
        base_file_name: impl Into<String>,
        groups: Vec<FileGroup>,
        bundles: Vec<PackagedBundle>,
        archiver: Arc<dyn Archiver>,
        store: StatusStore,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job_id,
            base_file_name: base_file_name.into(),
            groups,
            bundles,
            archiver,
            store,
            cancel,
        }
    }

    /// Job this packager works for
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Planned bundles
    pub fn bundles(&self) -> &[PackagedBundle] {
        &self.bundles
    }

    /// Build every bundle and write the terminal snapshot
    ///
    /// Per-bundle failures are recorded in the snapshot, not returned. `Err` means the
    /// Status Store itself could not be written.
    pub async fn run(mut self) -> Result<JobStatus> {
        let count = self.bundles.len();
        let total_bytes: u64 = self.bundles.iter().map(|b| b.total_bytes).sum();
        let progress = self.progress();

        let started = self
            .store
            .update(&self.job_id, move |s| {
                s.state = JobState::Processing;
                s.bundle_count = count;
                s.total_size_bytes = total_bytes;
                s.bundles = progress;
            })
            .await;
        match started {
            Ok(_) => {}
            Err(Error::InvalidTransition { from, .. }) => {
                info!(job_id = %self.job_id, state = %from, "job finished before packaging started");
                return self.store.get(&self.job_id).await;
            }
            Err(e) => return Err(e),
        }
        info!(job_id = %self.job_id, bundles = count, total_bytes, "packaging started");

        let mut tally = Tally::default();
        let mut stop: Option<JobState> = None;

        for index in 0..count {
            if let Some(state) = self.cancel_state().await {
                info!(job_id = %self.job_id, bundle = index, %state, "packaging stopped on request");
                stop = Some(state);
                break;
            }

            self.bundles[index].state = BundleState::Processing;
            self.record_bundle(index, None).await?;

            let request = self.archive_request(index, count);
            tally.denied += request.denied.len();

            let result = if request.entries.is_empty() {
                Err(Error::BundleBuild {
                    index,
                    reason: "no accessible files".into(),
                })
            } else if is_one_file(count, &request) {
                tally.one_file = true;
                self.archiver
                    .stage_single(request)
                    .await
                    .map_err(|e| Error::BundleBuild {
                        index,
                        reason: e.to_string(),
                    })
            } else {
                self.archiver
                    .build(request)
                    .await
                    .map_err(|e| Error::BundleBuild {
                        index,
                        reason: e.to_string(),
                    })
            };

            let message = match result {
                Ok(outcome) => {
                    let bundle = &mut self.bundles[index];
                    bundle.state = BundleState::Success;
                    bundle.url = Some(outcome.url);
                    bundle.processed_bytes = outcome.bytes_written;
                    tally.succeeded += 1;
                    tally.failed_files += outcome.failed.len();
                    None
                }
                Err(e) => {
                    warn!(job_id = %self.job_id, bundle = index, error = %e, "bundle build failed");
                    self.bundles[index].state = BundleState::Fail;
                    Some(format!("Bundle {} of {count} failed: {e}", index + 1))
                }
            };
            self.record_bundle(index, message).await?;
        }

        let final_state = match stop {
            Some(state) => state,
            None if tally.succeeded == 0 => JobState::Fail,
            None => JobState::Success,
        };
        let progress = self.progress();
        let one_file = tally.one_file;
        let status = self
            .store
            .update(&self.job_id, move |s| {
                s.state = final_state;
                s.bundles = progress;
                if final_state == JobState::Canceled {
                    s.push_message("Packaging canceled");
                }
                if tally.denied > 0 {
                    s.push_message(format!("Access denied to {} files.", tally.denied));
                }
                if tally.failed_files > 0 {
                    s.push_message(format!("Failed to package {} files.", tally.failed_files));
                }
                if tally.succeeded > 0 && (tally.denied > 0 || tally.failed_files > 0) {
                    s.push_message(format!("See {README_NAME} for details."));
                }
                if final_state == JobState::Fail {
                    s.push_message("Packaging failed: no bundle could be built");
                }
                if final_state == JobState::Success && count > 1 {
                    s.add_attribute(JobAttribute::DownloadScript);
                }
            })
            .await?;

        info!(
            job_id = %self.job_id,
            state = %status.state,
            bundles = count,
            bytes = status.effective_size_bytes(),
            one_file,
            "packaging finished"
        );
        Ok(status)
    }

    // terminal state to stop with, if cancellation was requested
    async fn cancel_state(&self) -> Option<JobState> {
        let stored = match self.store.get(&self.job_id).await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "status read failed during cancel check");
                None
            }
        };
        let flagged = stored.as_ref().is_some_and(|s| s.canceled);
        if !flagged && !self.cancel.is_cancelled() {
            return None;
        }
        match stored.and_then(|s| s.abort_reason) {
            Some(_) => Some(JobState::UserAborted),
            None => Some(JobState::Canceled),
        }
    }

    async fn record_bundle(&self, index: usize, message: Option<String>) -> Result<()> {
        let progress = self.bundles[index].progress();
        self.store
            .update(&self.job_id, move |s| {
                if let Some(slot) = s.bundles.get_mut(index) {
                    *slot = progress;
                }
                if let Some(message) = message {
                    s.push_message(message);
                }
            })
            .await
            .map(|_| ())
    }

    fn archive_request(&self, index: usize, count: usize) -> ArchiveRequest {
        let mut entries = Vec::new();
        let mut denied = Vec::new();
        for (group, file) in self.bundles[index].files(&self.groups) {
            if !file.access_allowed {
                denied.push(file.external_name.clone());
                continue;
            }
            let source = if file.is_url() {
                file.internal_name.clone().into()
            } else {
                group.local_path(file)
            };
            entries.push(ArchiveEntry {
                source,
                remote: file.is_url(),
                archive_path: file.external_name.clone(),
                size_bytes: file.size_bytes,
            });
        }
        ArchiveRequest {
            job_id: self.job_id.clone(),
            bundle_index: index,
            archive_name: archive_name(&self.base_file_name, index, count),
            entries,
            denied,
        }
    }

    fn progress(&self) -> Vec<BundleProgress> {
        self.bundles.iter().map(PackagedBundle::progress).collect()
    }
}

// a job of exactly one readable file is published without an archive
fn is_one_file(bundle_count: usize, request: &ArchiveRequest) -> bool {
    bundle_count == 1 && request.entries.len() == 1 && request.denied.is_empty()
}
