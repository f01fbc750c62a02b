//! Request submission: validation, preparation and admission

use super::PackagingService;
use crate::admission::Admission;
use crate::bundler::{Packager, estimate, plan_bundles, resolve_url_sizes};
use crate::error::{Error, Result};
use crate::job::JobWrapper;
use crate::types::{
    DownloadRequest, Event, JobAttribute, JobId, JobState, JobStatus, SizeClass,
};
use crate::utils::sanitize_file_name;
use std::sync::atomic::Ordering;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

impl PackagingService {
    /// Bundle size limit for a request: its own limit when positive, else the default
    pub fn max_bundle_bytes(&self, request: &DownloadRequest) -> u64 {
        request
            .max_bundle_bytes
            .filter(|&limit| limit > 0)
            .unwrap_or(self.config.packaging.default_max_bundle_bytes)
    }

    /// Accept a packaging request
    ///
    /// The job is recorded as WAITING and prepared in the background. If it reaches a
    /// terminal state within the configured immediate wait, that snapshot is returned.
    /// Otherwise the job is flagged for a completion email
    /// ([`JobAttribute::CanSendEmail`], plus [`JobAttribute::LongQueue`] when the wait
    /// queue is long) and the current snapshot is returned while packaging continues.
    pub async fn submit(&self, request: DownloadRequest) -> Result<JobStatus> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        let request = validate_request(request)?;
        let id = JobId::generate();

        // subscribe before anything can finish so the terminal write is not missed
        let mut events = self.subscribe();
        self.store.set(JobStatus::waiting(id.clone(), &request)).await?;
        info!(
            job_id = %id,
            data_source = %request.data_source,
            base_file_name = %request.base_file_name,
            "packaging request accepted"
        );

        let service = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move { service.prepare_and_admit(job_id, request).await });

        let wait = self.config.packaging.immediate_wait;
        if let Ok(Some(status)) =
            tokio::time::timeout(wait, self.wait_for_terminal(&mut events, &id)).await
        {
            debug!(job_id = %id, state = %status.state, "job finished within the immediate wait");
            return Ok(status);
        }

        let long_queue = self.controller.is_queue_long();
        let status = self
            .store
            .update(&id, move |s| {
                if !s.is_terminal() {
                    s.add_attribute(JobAttribute::CanSendEmail);
                    if long_queue {
                        s.add_attribute(JobAttribute::LongQueue);
                    }
                }
            })
            .await?;
        if long_queue {
            warn!(
                job_id = %id,
                waiting = self.controller.queue_len(),
                "packaging queue is long"
            );
        }
        Ok(status)
    }

    // resolves once the job's snapshot turns terminal; `None` if the channel closed
    async fn wait_for_terminal(
        &self,
        events: &mut broadcast::Receiver<Event>,
        id: &JobId,
    ) -> Option<JobStatus> {
        loop {
            match events.recv().await {
                Ok(Event::StatusChanged { status }) if &status.id == id && status.is_terminal() => {
                    return Some(status);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(job_id = %id, skipped, "status events lagged, reading store");
                    if let Ok(status) = self.store.get(id).await {
                        if status.is_terminal() {
                            return Some(status);
                        }
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    // query, estimate and plan the job, then hand it to the admission controller
    async fn prepare_and_admit(&self, id: JobId, request: DownloadRequest) {
        let groups = match self.file_groups.file_groups(&request).await {
            Ok(groups) => groups,
            Err(e) => {
                self.fail_job(&id, Error::Orchestration(format!("could not enumerate files: {e}")))
                    .await;
                return;
            }
        };
        let groups = resolve_url_sizes(groups, self.config.packaging.default_url_file_bytes);
        let report = estimate(&groups);

        let bundles = match plan_bundles(&groups, self.max_bundle_bytes(&request)) {
            Ok(bundles) => bundles,
            Err(e) => {
                self.fail_job(&id, Error::Orchestration(format!("could not plan bundles: {e}")))
                    .await;
                return;
            }
        };

        let progress: Vec<_> = bundles.iter().map(|b| b.progress()).collect();
        let bundle_count = bundles.len();
        let total_bytes = report.total_bytes;
        let planned = self
            .store
            .update(&id, move |s| {
                if s.state == JobState::Waiting {
                    s.total_size_bytes = total_bytes;
                    s.bundle_count = bundle_count;
                    s.bundles = progress;
                }
            })
            .await;
        match planned {
            Ok(status) if status.canceled => {
                self.finish_stopped(&id, status.abort_reason.clone()).await;
                return;
            }
            Ok(status) if status.is_terminal() => return,
            Ok(_) => {}
            Err(e) => {
                error!(job_id = %id, error = %e, "could not record bundle plan");
                return;
            }
        }

        let threshold = self.config.packaging.large_package_bytes;
        let size_class = SizeClass::classify(total_bytes, threshold);
        info!(
            job_id = %id,
            files = report.total_files,
            total_bytes,
            bundles = bundle_count,
            ?size_class,
            "packaging job planned"
        );

        let token = CancellationToken::new();
        self.active_jobs.lock().await.insert(id.clone(), token.clone());

        // a cancel that arrived after the plan was recorded found nothing to dequeue
        if let Ok(current) = self.store.get(&id).await {
            if current.canceled || current.is_terminal() {
                self.active_jobs.lock().await.remove(&id);
                if !current.is_terminal() {
                    self.finish_stopped(&id, current.abort_reason).await;
                }
                return;
            }
        }

        let packager = Packager::new(
            id.clone(),
            request.base_file_name.clone(),
            groups,
            bundles,
            self.archiver.clone(),
            self.store.clone(),
            token,
        );
        let work = self.clone().job_work(packager, size_class);
        let job = JobWrapper::new(id.clone(), total_bytes, threshold, work);

        match self.controller.submit(job) {
            Admission::Started => {}
            Admission::Queued { position } => {
                debug!(job_id = %id, position, "packaging job queued");
                self.emit_event(Event::Queued {
                    id,
                    position,
                    size_class,
                });
            }
            Admission::Rejected => {
                self.active_jobs.lock().await.remove(&id);
                self.shutdown_cancel(&id).await;
            }
        }
    }

    // the future a worker runs for one admitted job
    async fn job_work(self, packager: Packager, size_class: SizeClass) {
        let id = packager.job_id().clone();
        self.emit_event(Event::Started {
            id: id.clone(),
            size_class,
        });

        let finished = match tokio::spawn(packager.run()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                error!(job_id = %id, error = %e, "packaging could not record its result");
                None
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "packager panicked");
                self.fail_status(&id, "Packaging failed unexpectedly").await
            }
        };

        if let Some(status) = finished {
            self.after_terminal(status).await;
        }
        self.active_jobs.lock().await.remove(&id);
    }

    /// Send the completion email if the job qualifies and record that it went out
    pub(crate) async fn after_terminal(&self, status: JobStatus) {
        if self.notifier.notify_completion(&status).await {
            if let Err(e) = self
                .store
                .update(&status.id, |s| s.add_attribute(JobAttribute::EmailSent))
                .await
            {
                warn!(job_id = %status.id, error = %e, "could not record sent email");
            }
        }
    }

    // move a non-terminal job to FAIL with a message and return the terminal snapshot
    async fn fail_status(&self, id: &JobId, message: &str) -> Option<JobStatus> {
        let message = message.to_string();
        error!(job_id = %id, reason = %message, "packaging job failed");
        match self
            .store
            .update(id, move |s| {
                if !s.is_terminal() {
                    s.state = JobState::Fail;
                    s.push_message(message);
                }
            })
            .await
        {
            Ok(status) if status.state == JobState::Fail => Some(status),
            Ok(_) => None,
            Err(e) => {
                error!(job_id = %id, error = %e, "could not record job failure");
                None
            }
        }
    }

    async fn fail_job(&self, id: &JobId, error: Error) {
        if let Some(status) = self.fail_status(id, &error.to_string()).await {
            self.after_terminal(status).await;
        }
    }

    // a job canceled while it was being prepared never reaches a worker
    async fn finish_stopped(&self, id: &JobId, abort_reason: Option<String>) {
        let result = self
            .store
            .update(id, move |s| {
                if !s.is_terminal() {
                    stop_snapshot(s, abort_reason);
                }
            })
            .await;
        match result {
            Ok(status) => info!(job_id = %id, state = %status.state, "job stopped before admission"),
            Err(e) => warn!(job_id = %id, error = %e, "could not record stopped job"),
        }
    }

    /// Mark a job that will never run as CANCELED because the service is stopping
    pub(crate) async fn shutdown_cancel(&self, id: &JobId) {
        let result = self
            .store
            .update(id, |s| {
                if !s.is_terminal() {
                    s.canceled = true;
                    s.state = JobState::Canceled;
                    s.push_message("Packaging canceled: server shutting down");
                }
            })
            .await;
        if let Err(e) = result {
            warn!(job_id = %id, error = %e, "could not record shutdown cancellation");
        }
    }
}

/// Move a snapshot to CANCELED, or USER_ABORTED when a reason is given
pub(crate) fn stop_snapshot(status: &mut JobStatus, abort_reason: Option<String>) {
    status.canceled = true;
    match abort_reason {
        Some(reason) => {
            status.state = JobState::UserAborted;
            status.push_message(format!("Aborted by user: {reason}"));
            status.abort_reason = Some(reason);
        }
        None => {
            status.state = JobState::Canceled;
            status.push_message("Packaging canceled");
        }
    }
}

fn validate_request(mut request: DownloadRequest) -> Result<DownloadRequest> {
    if request.base_file_name.trim().is_empty() {
        return Err(Error::Validation("base_file_name must not be empty".into()));
    }
    if request.data_source.trim().is_empty() {
        return Err(Error::Validation("data_source must not be empty".into()));
    }
    if let Some(email) = request.email.as_deref() {
        let email = email.trim();
        if !email.is_empty() && !is_plausible_email(email) {
            return Err(Error::Validation(format!("invalid email address: {email}")));
        }
    }
    request.email = request
        .email
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());
    request.base_file_name = sanitize_file_name(&request.base_file_name);
    Ok(request)
}

/// Minimal shape check: one `@` with text on both sides and no whitespace
pub(crate) fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}
