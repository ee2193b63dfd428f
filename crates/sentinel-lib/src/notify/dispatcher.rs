//! Alert delivery with bounded retries

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ChannelError, MessageCatalog, NotificationChannel, NotificationMessage};
use crate::clock::{Clock, SystemClock};
use crate::config::{NotificationConfig, RecipientConfig};
use crate::models::{Alert, PondId};

/// Recipient used when none is configured for a pond
pub const DEFAULT_RECIPIENT: &str = "default";

/// Exponential backoff settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &NotificationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
        }
    }

    /// Delay before retry number `retry` (1-based), doubling and capped
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Final outcome for one recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    Failed { error: String, permanent: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipientDelivery {
    pub recipient: String,
    pub attempts: u32,
    pub outcome: DeliveryOutcome,
}

impl RecipientDelivery {
    pub fn is_delivered(&self) -> bool {
        self.outcome == DeliveryOutcome::Delivered
    }
}

/// Result of dispatching one alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub alert_id: Uuid,
    pub pond_id: PondId,
    pub locale: String,
    pub channel: String,
    pub recipients: Vec<RecipientDelivery>,
    pub completed_at: DateTime<Utc>,
}

impl DeliveryResult {
    pub fn is_delivered(&self) -> bool {
        self.recipients.iter().all(RecipientDelivery::is_delivered)
    }

    pub fn failures(&self) -> impl Iterator<Item = &RecipientDelivery> {
        self.recipients.iter().filter(|r| !r.is_delivered())
    }

    pub fn total_attempts(&self) -> u64 {
        self.recipients.iter().map(|r| r.attempts as u64).sum()
    }
}

/// Renders alerts and delivers them through a channel
pub struct Dispatcher {
    channel: Arc<dyn NotificationChannel>,
    catalog: Arc<dyn MessageCatalog>,
    recipients: Vec<RecipientConfig>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(
        config: &NotificationConfig,
        channel: Arc<dyn NotificationChannel>,
        catalog: Arc<dyn MessageCatalog>,
    ) -> Self {
        Self {
            channel,
            catalog,
            recipients: config.recipients.clone(),
            retry: RetryPolicy::from_config(config),
            clock: Arc::new(SystemClock),
        }
    }

    /// Time source for `completed_at`; share the engine's clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Recipients bound to the pond, else the unbound ones, else [`DEFAULT_RECIPIENT`]
    pub fn recipients_for(&self, pond_id: PondId) -> Vec<String> {
        let bound: Vec<String> = self
            .recipients
            .iter()
            .filter(|r| r.pond_id == Some(pond_id))
            .map(|r| r.address.clone())
            .collect();
        if !bound.is_empty() {
            return bound;
        }

        let unbound: Vec<String> = self
            .recipients
            .iter()
            .filter(|r| r.pond_id.is_none())
            .map(|r| r.address.clone())
            .collect();
        if unbound.is_empty() {
            vec![DEFAULT_RECIPIENT.to_string()]
        } else {
            unbound
        }
    }

    /// Deliver an alert to every recipient of its pond.
    ///
    /// Never fails: exhausted retries are reported in the result.
    pub async fn dispatch(&self, alert: &Alert, locale: &str) -> DeliveryResult {
        let message = self.catalog.render(alert, locale);
        let mut recipients = Vec::new();

        for recipient in self.recipients_for(alert.pond_id) {
            let delivery = self.deliver(&message, recipient).await;
            recipients.push(delivery);
        }

        DeliveryResult {
            alert_id: alert.id,
            pond_id: alert.pond_id,
            locale: message.locale.clone(),
            channel: self.channel.name().to_string(),
            recipients,
            completed_at: self.clock.now(),
        }
    }

    async fn deliver(
        &self,
        message: &NotificationMessage,
        recipient: String,
    ) -> RecipientDelivery {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.channel.send(message, &message.locale, &recipient).await {
                Ok(()) => {
                    debug!(
                        alert_id = %message.alert_id,
                        recipient = %recipient,
                        attempts = attempts,
                        "Notification delivered"
                    );
                    return RecipientDelivery {
                        recipient,
                        attempts,
                        outcome: DeliveryOutcome::Delivered,
                    };
                }
                Err(ChannelError::Transient(error)) if attempts < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempts);
                    warn!(
                        alert_id = %message.alert_id,
                        recipient = %recipient,
                        attempt = attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %error,
                        "Notification attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    let permanent = !err.is_transient();
                    return RecipientDelivery {
                        recipient,
                        attempts,
                        outcome: DeliveryOutcome::Failed {
                            error: err.to_string(),
                            permanent,
                        },
                    };
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Channel replaying scripted results, then succeeding
    #[derive(Default)]
    pub struct ScriptedChannel {
        script: Mutex<VecDeque<Result<(), ChannelError>>>,
        pub sent: Mutex<Vec<(String, String, NotificationMessage)>>,
    }

    impl ScriptedChannel {
        pub fn new(script: Vec<Result<(), ChannelError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                sent: Mutex::new(Vec::new()),
            }
        }

        /// A channel failing transiently forever
        pub fn always_down() -> Self {
            Self::new(vec![Err(ChannelError::Transient("down".into())); 64])
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl NotificationChannel for ScriptedChannel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(
            &self,
            message: &NotificationMessage,
            locale: &str,
            recipient: &str,
        ) -> Result<(), ChannelError> {
            let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
            if next.is_ok() {
                self.sent.lock().unwrap().push((
                    recipient.to_string(),
                    locale.to_string(),
                    message.clone(),
                ));
            }
            next
        }
    }

    pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }
}
