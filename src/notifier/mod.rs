//! Completion notifications
//!
//! A job that outlived the immediate wait carries [`JobAttribute::CanSendEmail`]; when it
//! finishes with SUCCESS or FAIL and has an email address, the [`Notifier`] composes a
//! message and hands it to a [`MailSender`]. CANCELED and USER_ABORTED jobs are never
//! notified. Transport failures are logged and published as events, never returned to
//! the job.

mod mail;
pub mod script;

pub use mail::{EmailMessage, MailSender, WebhookMailSender};
pub use script::{DownloadScript, ScriptFlavor, ScriptOptions, compose_download_script};

use crate::config::NotificationConfig;
use crate::error::{Error, Result};
use crate::types::{Event, JobAttribute, JobState, JobStatus};
use crate::utils::format_size;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Composes and sends completion emails
#[derive(Clone)]
pub struct Notifier {
    sender: Option<Arc<dyn MailSender>>,
    config: NotificationConfig,
    event_tx: broadcast::Sender<Event>,
}

impl Notifier {
    /// Notifier using `sender`; `None` disables delivery
    pub fn new(
        config: NotificationConfig,
        sender: Option<Arc<dyn MailSender>>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            sender,
            config,
            event_tx,
        }
    }

    /// Whether a mail transport is configured
    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Whether a finished job qualifies for an automatic email
    pub fn should_notify(status: &JobStatus) -> bool {
        matches!(status.state, JobState::Success | JobState::Fail)
            && status.has_attribute(JobAttribute::CanSendEmail)
            && status.email.as_deref().is_some_and(|e| !e.trim().is_empty())
    }

    /// Message for a finished job, `None` for states that are not notified
    pub fn compose(&self, status: &JobStatus, to: &str) -> Option<EmailMessage> {
        let name = if status.title.is_empty() {
            status.base_file_name.as_str()
        } else {
            status.title.as_str()
        };
        let (subject, body) = match status.state {
            JobState::Success => (
                format!("{} Download ready: {name}", self.config.subject_prefix),
                self.success_body(status, name),
            ),
            JobState::Fail => (
                format!("{} Download failed: {name}", self.config.subject_prefix),
                self.failure_body(status, name),
            ),
            _ => return None,
        };
        Some(EmailMessage {
            from: self.config.from_address.clone(),
            to: to.to_string(),
            subject,
            body,
        })
    }

    /// Compose and send a message for `status` to `to`
    ///
    /// Returns `Ok(false)` when the job's state is not notified.
    pub async fn send(&self, status: &JobStatus, to: &str) -> Result<bool> {
        let Some(sender) = &self.sender else {
            return Err(Error::Mail("no mail transport configured".into()));
        };
        let Some(message) = self.compose(status, to) else {
            return Ok(false);
        };
        sender.send(&message).await?;
        info!(job_id = %status.id, to = %to, state = %status.state, "completion email sent");
        self.event_tx
            .send(Event::NotificationSent {
                id: status.id.clone(),
                to: to.to_string(),
            })
            .ok();
        Ok(true)
    }

    /// Send the automatic completion email if the job qualifies
    ///
    /// Returns whether an email went out. Errors are absorbed.
    pub async fn notify_completion(&self, status: &JobStatus) -> bool {
        if !Self::should_notify(status) || !self.is_enabled() {
            return false;
        }
        let Some(to) = status.email.as_deref() else {
            return false;
        };
        match self.send(status, to).await {
            Ok(sent) => sent,
            Err(e) => {
                warn!(job_id = %status.id, error = %e, "completion email failed");
                self.event_tx
                    .send(Event::NotificationFailed {
                        id: status.id.clone(),
                        error: e.to_string(),
                    })
                    .ok();
                false
            }
        }
    }

    fn success_body(&self, status: &JobStatus, name: &str) -> String {
        let urls = status.urls();
        let mut lines = vec![format!("Your download request \"{name}\" has been packaged.")];
        if !status.data_source.is_empty() {
            lines.push(format!("Data source: {}", status.data_source));
        }
        lines.push(format!("Size: {}", format_size(status.effective_size_bytes())));
        lines.push(String::new());
        lines.push("Your files are available at:".to_string());
        lines.extend(urls.iter().map(|url| format!("  {url}")));

        if urls.len() > 1 {
            lines.push(String::new());
            lines.push(format!(
                "The package was split into {} archives. To retrieve them all, save the URLs above to urls.txt and run:",
                urls.len()
            ));
            lines.push("  with wget:  wget --content-disposition -i urls.txt".to_string());
            lines.push("  with curl:  xargs -n 1 curl -f -J -O < urls.txt".to_string());
            lines.push(format!(
                "A ready-made retrieval script can also be downloaded for job {}.",
                status.id
            ));
        }

        if !status.messages.is_empty() {
            lines.push(String::new());
            lines.extend(status.messages.iter().map(|m| format!("Note: {m}")));
        }
        finish_body(lines)
    }

    fn failure_body(&self, status: &JobStatus, name: &str) -> String {
        let mut lines = vec![format!(
            "We are sorry, your download request \"{name}\" could not be packaged."
        )];
        if !status.messages.is_empty() {
            lines.push(String::new());
            lines.extend(status.messages.iter().map(|m| format!("  {m}")));
        }
        lines.push(String::new());
        lines.push(match &self.config.support_contact {
            Some(contact) => format!(
                "Please contact {contact} and mention job {} if the problem persists.",
                status.id
            ),
            None => format!("Please try again later (job {}).", status.id),
        });
        finish_body(lines)
    }
}

fn finish_body(lines: Vec<String>) -> String {
    let mut body = lines.join("\n");
    body.push('\n');
    body
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BundleProgress, BundleState, DownloadRequest, JobId};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<EmailMessage>>,
        fail: bool,
    }

    #[async_trait]
    impl MailSender for Outbox {
        async fn send(&self, message: &EmailMessage) -> Result<()> {
            if self.fail {
                return Err(Error::Mail("relay unreachable".into()));
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn finished(state: JobState, bundles: usize) -> JobStatus {
        let request = DownloadRequest {
            base_file_name: "m31".into(),
            title: "M31 cutouts".into(),
            email: Some("user@example.org".into()),
            data_source: "wise".into(),
            ..Default::default()
        };
        let mut status = JobStatus::waiting(JobId::from("pkg_1"), &request);
        status.state = state;
        status.add_attribute(JobAttribute::CanSendEmail);
        status.bundles = (0..bundles)
            .map(|i| BundleProgress {
                index: i,
                total_files: 1,
                total_bytes: 10,
                processed_bytes: 10,
                url: Some(format!("http://files.local/pkg_1_{i}.zip")),
                state: BundleState::Success,
            })
            .collect();
        status
    }

    fn notifier(outbox: Arc<Outbox>) -> (Notifier, broadcast::Receiver<Event>) {
        let (tx, rx) = broadcast::channel(16);
        (
            Notifier::new(
                NotificationConfig::default(),
                Some(outbox as Arc<dyn MailSender>),
                tx,
            ),
            rx,
        )
    }

    #[test]
    fn canceled_and_aborted_jobs_compose_nothing() {
        let (n, _rx) = notifier(Arc::new(Outbox::default()));
        for state in [JobState::Canceled, JobState::UserAborted, JobState::Processing] {
            assert!(n.compose(&finished(state, 1), "x@y").is_none(), "{state} must not notify");
        }
    }

    #[test]
    fn multi_bundle_success_includes_script_guidance() {
        let (n, _rx) = notifier(Arc::new(Outbox::default()));
        let message = n.compose(&finished(JobState::Success, 2), "x@y").unwrap();
        assert_eq!(message.subject, "[Data Packager] Download ready: M31 cutouts");
        assert!(message.body.contains("http://files.local/pkg_1_1.zip"));
        assert!(message.body.contains("wget"));
        assert!(message.body.contains("curl"));

        let single = n.compose(&finished(JobState::Success, 1), "x@y").unwrap();
        assert!(!single.body.contains("wget"), "one archive needs no script");
    }

    #[test]
    fn failure_email_apologizes_and_lists_messages() {
        let (n, _rx) = notifier(Arc::new(Outbox::default()));
        let mut status = finished(JobState::Fail, 0);
        status.push_message("Bundle 1 of 1 failed: disk full");
        let message = n.compose(&status, "x@y").unwrap();
        assert!(message.subject.contains("failed"));
        assert!(message.body.contains("We are sorry"));
        assert!(message.body.contains("disk full"));
    }

    #[tokio::test]
    async fn completion_needs_can_send_email_attribute() {
        let outbox = Arc::new(Outbox::default());
        let (n, _rx) = notifier(outbox.clone());
        let mut status = finished(JobState::Success, 1);
        status.attributes.clear();

        assert!(!n.notify_completion(&status).await);
        assert!(outbox.sent.lock().unwrap().is_empty());

        status.add_attribute(JobAttribute::CanSendEmail);
        assert!(n.notify_completion(&status).await);
        assert_eq!(outbox.sent.lock().unwrap()[0].to, "user@example.org");
    }

    #[tokio::test]
    async fn transport_failure_is_absorbed_and_published() {
        let outbox = Arc::new(Outbox {
            fail: true,
            ..Default::default()
        });
        let (n, mut rx) = notifier(outbox);
        assert!(!n.notify_completion(&finished(JobState::Fail, 0)).await);

        match rx.recv().await.unwrap() {
            Event::NotificationFailed { id, error } => {
                assert_eq!(id.as_str(), "pkg_1");
                assert!(error.contains("relay unreachable"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn explicit_send_without_transport_is_an_error() {
        let (tx, _rx) = broadcast::channel(4);
        let n = Notifier::new(NotificationConfig::default(), None, tx);
        let err = n.send(&finished(JobState::Success, 1), "x@y").await.unwrap_err();
        assert!(matches!(err, Error::Mail(_)));
    }
}
