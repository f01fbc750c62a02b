//! Job control: status lookups, cancellation, email and retrieval scripts.

use super::PackagingService;
use super::submit::{is_plausible_email, stop_snapshot};
use crate::error::{Error, Result};
use crate::notifier::{DownloadScript, ScriptFlavor, ScriptOptions, compose_download_script};
use crate::notifier::script::script_file_name;
use crate::types::{JobAttribute, JobDiagnostics, JobId, JobState, JobStatus, QueueStats};
use tracing::info;

impl PackagingService {
    /// Latest status snapshot of a job
    ///
    /// Works for jobs submitted by any process sharing the status cache. Unknown or
    /// expired ids return [`Error::JobNotFound`].
    pub async fn status(&self, id: &JobId) -> Result<JobStatus> {
        self.store.get(id).await
    }

    /// Cancel a job
    ///
    /// A waiting job is removed from the queue and becomes CANCELED right away. A
    /// running job stops before its next bundle. Terminal jobs are returned unchanged.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use data_packager::*;
    /// # async fn example(service: PackagingService, id: JobId) -> Result<()> {
    /// let status = service.cancel(&id).await?;
    /// println!("job is now {}", status.state);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn cancel(&self, id: &JobId) -> Result<JobStatus> {
        self.stop(id, None).await
    }

    /// Abandon a job with a reason; it ends as USER_ABORTED instead of CANCELED
    pub async fn abort(&self, id: &JobId, reason: impl Into<String>) -> Result<JobStatus> {
        let reason = reason.into();
        let reason = if reason.trim().is_empty() {
            "no reason given".to_string()
        } else {
            reason.trim().to_string()
        };
        self.stop(id, Some(reason)).await
    }

    async fn stop(&self, id: &JobId, abort_reason: Option<String>) -> Result<JobStatus> {
        let current = self.store.get(id).await?;
        if current.is_terminal() {
            return Ok(current);
        }

        // still queued here: it never ran, finish it directly
        if let Some(job) = self.controller.remove_waiting(id) {
            drop(job);
            self.active_jobs.lock().await.remove(id);
            let status = self
                .store
                .update(id, move |s| {
                    if !s.is_terminal() {
                        stop_snapshot(s, abort_reason);
                    }
                })
                .await?;
            info!(job_id = %id, state = %status.state, "waiting job removed from queue");
            return Ok(status);
        }

        // running here, being prepared, or owned by another process
        let status = self
            .store
            .update(id, move |s| {
                if !s.is_terminal() {
                    s.canceled = true;
                    if abort_reason.is_some() {
                        s.abort_reason = abort_reason;
                    }
                }
            })
            .await?;
        if let Some(token) = self.active_jobs.lock().await.get(id) {
            token.cancel();
        }
        info!(job_id = %id, aborted = status.abort_reason.is_some(), "cancellation requested");
        Ok(status)
    }

    /// Set or replace the completion email address of a job
    ///
    /// Setting an address also opts the job into the completion email
    /// ([`JobAttribute::CanSendEmail`]) when it has not finished yet.
    pub async fn set_email(&self, id: &JobId, email: &str) -> Result<JobStatus> {
        let email = email.trim().to_string();
        if !is_plausible_email(&email) {
            return Err(Error::Validation(format!("invalid email address: {email}")));
        }
        self.store
            .update(id, move |s| {
                s.email = Some(email);
                if !s.is_terminal() {
                    s.add_attribute(JobAttribute::CanSendEmail);
                }
            })
            .await
    }

    /// Send the completion email of a finished job again
    ///
    /// `email` overrides (and replaces) the stored address. Only SUCCESS and FAIL jobs
    /// can be mailed.
    pub async fn resend_email(&self, id: &JobId, email: Option<&str>) -> Result<JobStatus> {
        let status = self.store.get(id).await?;
        if !matches!(status.state, JobState::Success | JobState::Fail) {
            return Err(Error::InvalidState {
                id: id.clone(),
                operation: "resend email".to_string(),
                current_state: status.state,
            });
        }

        let to = match email.map(str::trim).filter(|e| !e.is_empty()) {
            Some(email) if is_plausible_email(email) => email.to_string(),
            Some(email) => {
                return Err(Error::Validation(format!("invalid email address: {email}")));
            }
            None => status
                .email
                .clone()
                .ok_or_else(|| Error::Validation("job has no email address".into()))?,
        };

        self.notifier.send(&status, &to).await?;
        self.store
            .update(id, move |s| {
                s.email = Some(to);
                s.add_attribute(JobAttribute::EmailSent);
            })
            .await
    }

    /// Retrieval script for a job that was split into several archives
    pub async fn download_script(
        &self,
        id: &JobId,
        flavor: ScriptFlavor,
        options: ScriptOptions,
    ) -> Result<DownloadScript> {
        let status = self.store.get(id).await?;
        let urls = status.urls();
        if status.state != JobState::Success
            || !status.has_attribute(JobAttribute::DownloadScript)
            || urls.is_empty()
        {
            return Err(Error::InvalidState {
                id: id.clone(),
                operation: "create download script".to_string(),
                current_state: status.state,
            });
        }
        Ok(DownloadScript {
            file_name: script_file_name(&status.base_file_name, flavor),
            content: compose_download_script(&urls, &status.data_source, flavor, options),
        })
    }

    /// Admission counters of this process
    pub fn queue_stats(&self) -> QueueStats {
        self.controller.stats()
    }

    /// Timing data for jobs waiting or running in this process
    pub fn diagnostics(&self) -> Vec<JobDiagnostics> {
        self.controller.diagnostics()
    }
}
