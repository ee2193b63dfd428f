//! Notification channels

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::models::{PondId, Severity};

/// Rendered notification, ready for a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub alert_id: Uuid,
    pub pond_id: PondId,
    pub severity: Severity,
    pub message_key: String,
    pub locale: String,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Channel failure, classified for the retry policy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Worth retrying: timeouts, connection failures, 5xx, 429
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// Retrying cannot help: rejected payload, bad recipient, 4xx
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl ChannelError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ChannelError::Transient(_))
    }
}

/// External delivery channel
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(
        &self,
        message: &NotificationMessage,
        locale: &str,
        recipient: &str,
    ) -> Result<(), ChannelError>;
}

/// Channel that only writes the notification to the log
#[derive(Debug, Clone, Default)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(
        &self,
        message: &NotificationMessage,
        locale: &str,
        recipient: &str,
    ) -> Result<(), ChannelError> {
        info!(
            event = "notification",
            alert_id = %message.alert_id,
            pond_id = message.pond_id,
            severity = %message.severity,
            locale = %locale,
            recipient = %recipient,
            title = %message.title,
            body = %message.body,
            "Notification"
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    recipient: &'a str,
    locale: &'a str,
    #[serde(flatten)]
    message: &'a NotificationMessage,
}

/// Channel posting JSON to an HTTP endpoint
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    client: reqwest::Client,
    url: Url,
}

impl WebhookChannel {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let url = Url::parse(url)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pond-sentinel/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(
        &self,
        message: &NotificationMessage,
        locale: &str,
        recipient: &str,
    ) -> Result<(), ChannelError> {
        let payload = WebhookPayload {
            recipient,
            locale,
            message,
        };

        let response = self
            .client
            .post(self.url.clone())
            .json(&payload)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(ChannelError::Transient(format!("webhook returned {}", status)))
        } else {
            Err(ChannelError::Permanent(format!("webhook returned {}", status)))
        }
    }
}

fn classify_request_error(err: reqwest::Error) -> ChannelError {
    if err.is_builder() {
        ChannelError::Permanent(err.to_string())
    } else {
        ChannelError::Transient(err.to_string())
    }
}
