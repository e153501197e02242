//! Outbound mail delivery

use std::time::Duration;

use async_trait::async_trait;
use pdt_common::db::QueuedEmail;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Relay rejected message {0}: {1}")]
    Rejected(u16, String),
}

/// Delivers one queued email
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &QueuedEmail) -> Result<(), MailError>;
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    sender: &'a str,
    recipient: &'a str,
    subject: &'a str,
    body: &'a str,
}

/// HTTP mail relay accepting one JSON message per request
pub struct RelayTransport {
    http_client: reqwest::Client,
    relay_url: String,
    sender: String,
}

impl RelayTransport {
    pub fn new(relay_url: &str, sender: &str) -> Result<Self, MailError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MailError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            relay_url: relay_url.to_string(),
            sender: sender.to_string(),
        })
    }
}

#[async_trait]
impl MailTransport for RelayTransport {
    async fn send(&self, email: &QueuedEmail) -> Result<(), MailError> {
        let message = RelayMessage {
            sender: &self.sender,
            recipient: &email.recipient,
            subject: &email.subject,
            body: &email.body,
        };

        let response = self
            .http_client
            .post(&self.relay_url)
            .json(&message)
            .send()
            .await
            .map_err(|e| MailError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected(status.as_u16(), error_text));
        }

        debug!(email_id = email.id, recipient = %email.recipient, "Email handed to relay");
        Ok(())
    }
}
