use crate::config::MailWebhookConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A composed email
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Sender address
    pub from: String,
    /// Recipient address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
}

/// Mail transport
#[async_trait]
pub trait MailSender: Send + Sync {
    /// Deliver one message
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// [`MailSender`] that POSTs each message as JSON to an HTTP mail relay
pub struct WebhookMailSender {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    auth_header: Option<String>,
}

impl WebhookMailSender {
    /// Sender for the configured relay
    pub fn new(config: &MailWebhookConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.url.clone(),
            timeout: config.timeout,
            auth_header: config.auth_header.clone(),
        }
    }
}

#[async_trait]
impl MailSender for WebhookMailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let mut request = self
            .client
            .post(&self.url)
            .json(message)
            .timeout(self.timeout);
        if let Some(auth) = &self.auth_header {
            request = request.header("Authorization", auth);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Mail(format!("mail relay returned status {status}: {body}")));
        }
        tracing::debug!(url = %self.url, to = %message.to, "mail relay accepted message");
        Ok(())
    }
}
