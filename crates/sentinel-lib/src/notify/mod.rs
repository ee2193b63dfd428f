//! Notification delivery
//!
//! Alerts are rendered by a [`MessageCatalog`], delivered through a
//! [`NotificationChannel`] with bounded retries by the [`Dispatcher`], and
//! handed off from detection through the [`DispatchQueue`].

mod catalog;
mod channel;
pub(crate) mod dispatcher;
mod queue;

pub use catalog::{MessageCatalog, StaticCatalog};
pub use channel::{ChannelError, LogChannel, NotificationChannel, NotificationMessage, WebhookChannel};
pub use dispatcher::{
    DeliveryOutcome, DeliveryResult, Dispatcher, RecipientDelivery, RetryPolicy, DEFAULT_RECIPIENT,
};
pub use queue::{DeliveryLog, DispatchQueue, DispatchRequest, DispatchWorker, EnqueueError};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;
    use chrono::Utc;
    use std::time::Duration;
    use uuid::Uuid;

    fn message() -> NotificationMessage {
        NotificationMessage {
            alert_id: Uuid::new_v4(),
            pond_id: 3,
            severity: Severity::Critical,
            message_key: "critical_oxygen_low".to_string(),
            locale: "en".to_string(),
            title: "[CRITICAL] pond 3 limit_breach".to_string(),
            body: "Critical low dissolved oxygen: 1.50mg/L in pond 3".to_string(),
            created_at: Utc::now(),
        }
    }

    async fn send_with_status(status: usize) -> Result<(), ChannelError> {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"recipient": "ops", "locale": "en", "pond_id": 3}"#.to_string(),
            ))
            .with_status(status)
            .create_async()
            .await;

        let channel =
            WebhookChannel::new(&format!("{}/hook", server.url()), Duration::from_secs(5)).unwrap();
        let result = channel.send(&message(), "en", "ops").await;
        mock.assert_async().await;
        result
    }

    #[tokio::test]
    async fn test_webhook_success() {
        assert!(send_with_status(200).await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_server_error_is_transient() {
        let err = send_with_status(503).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_webhook_rate_limit_is_transient() {
        let err = send_with_status(429).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_webhook_client_error_is_permanent() {
        let err = send_with_status(400).await.unwrap_err();
        assert!(matches!(err, ChannelError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_transient() {
        let channel =
            WebhookChannel::new("http://127.0.0.1:9/hook", Duration::from_millis(200)).unwrap();
        let err = channel.send(&message(), "en", "ops").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_invalid_webhook_url() {
        assert!(WebhookChannel::new("not a url", Duration::from_secs(1)).is_err());
    }
}
