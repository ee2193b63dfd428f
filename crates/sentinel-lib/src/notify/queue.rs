//! Asynchronous hand-off between detection and delivery
//!
//! Detection never waits on the network: alerts are pushed into a bounded
//! queue with `try_send`, and a [`DispatchWorker`] drains it with a bounded
//! number of concurrent deliveries.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{DeliveryResult, Dispatcher};
use crate::health::{Component, ComponentStatus, HealthRegistry};
use crate::models::{Alert, PondId};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::store::Store;

/// Delivery results kept for the query surface
const DELIVERY_LOG_CAPACITY: usize = 512;

/// One alert waiting for delivery
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub alert: Alert,
    pub locale: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    #[error("dispatch queue is full")]
    Full,

    #[error("dispatch queue is closed")]
    Closed,
}

/// Producer side of the dispatch queue
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    sender: mpsc::Sender<DispatchRequest>,
}

impl DispatchQueue {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<DispatchRequest>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Queue an alert without waiting
    pub fn enqueue(&self, request: DispatchRequest) -> Result<(), EnqueueError> {
        self.sender.try_send(request).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Requests waiting in the queue
    pub fn depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}

/// Most recent delivery results, newest last
#[derive(Debug, Clone, Default)]
pub struct DeliveryLog {
    entries: Arc<Mutex<VecDeque<DeliveryResult>>>,
}

impl DeliveryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, result: DeliveryResult) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == DELIVERY_LOG_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(result);
    }

    /// Up to `limit` results for a pond, newest first
    pub fn recent(&self, pond_id: PondId, limit: usize) -> Vec<DeliveryResult> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .filter(|r| r.pond_id == pond_id)
            .take(limit)
            .cloned()
            .collect()
    }
}

/// Consumer side: delivers queued alerts and records the outcomes
pub struct DispatchWorker {
    dispatcher: Arc<Dispatcher>,
    receiver: mpsc::Receiver<DispatchRequest>,
    store: Arc<dyn Store>,
    health: HealthRegistry,
    metrics: EngineMetrics,
    logger: StructuredLogger,
    deliveries: DeliveryLog,
    in_flight: Arc<Semaphore>,
}

impl DispatchWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        receiver: mpsc::Receiver<DispatchRequest>,
        store: Arc<dyn Store>,
        health: HealthRegistry,
        metrics: EngineMetrics,
        logger: StructuredLogger,
        deliveries: DeliveryLog,
        max_in_flight: usize,
    ) -> Self {
        Self {
            dispatcher,
            receiver,
            store,
            health,
            metrics,
            logger,
            deliveries,
            in_flight: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Run until shutdown or until every queue handle is dropped.
    ///
    /// On shutdown the queue is closed and what is already queued is still
    /// delivered before returning.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            max_in_flight = self.in_flight.available_permits(),
            "Starting notification dispatch worker"
        );

        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                request = self.receiver.recv() => {
                    match request {
                        Some(request) => self.spawn_delivery(&mut tasks, request).await,
                        None => break,
                    }
                }
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                _ = shutdown.recv() => {
                    info!("Shutting down notification dispatch worker");
                    self.receiver.close();
                    while let Some(request) = self.receiver.recv().await {
                        self.spawn_delivery(&mut tasks, request).await;
                    }
                    break;
                }
            }
        }

        while tasks.join_next().await.is_some() {}
        debug!("Notification dispatch worker drained");
    }

    async fn spawn_delivery(&self, tasks: &mut JoinSet<()>, request: DispatchRequest) {
        let permit = match self.in_flight.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let dispatcher = self.dispatcher.clone();
        let store = self.store.clone();
        let health = self.health.clone();
        let metrics = self.metrics.clone();
        let logger = self.logger.clone();
        let deliveries = self.deliveries.clone();

        tasks.spawn(async move {
            let result = dispatcher.dispatch(&request.alert, &request.locale).await;
            drop(permit);
            record_result(result, store.as_ref(), &health, &metrics, &logger, &deliveries).await;
        });
    }
}

async fn record_result(
    result: DeliveryResult,
    store: &dyn Store,
    health: &HealthRegistry,
    metrics: &EngineMetrics,
    logger: &StructuredLogger,
    deliveries: &DeliveryLog,
) {
    metrics.add_delivery_attempts(result.total_attempts());

    if let Err(e) = store.save_delivery(&result).await {
        warn!(alert_id = %result.alert_id, error = %e, "Failed to record delivery result");
    }

    if result.is_delivered() {
        if health.status_of(Component::Dispatcher).await == Some(ComponentStatus::Degraded) {
            health.set_healthy(Component::Dispatcher).await;
        }
    } else {
        logger.log_delivery_failed(&result);
        metrics.inc_delivery_failures();
        health
            .set_degraded(
                Component::Dispatcher,
                format!("delivery of alert {} exhausted retries", result.alert_id),
            )
            .await;
    }

    deliveries.record(result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotificationConfig;
    use crate::models::{AlertKind, DedupKey, Severity};
    use crate::notify::dispatcher::test_support::{fast_retry, ScriptedChannel};
    use crate::notify::StaticCatalog;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use uuid::Uuid;

    fn request(pond_id: PondId) -> DispatchRequest {
        let dedup_key = DedupKey {
            pond_id,
            sensor_type: None,
            kind: AlertKind::StaleData,
        };
        DispatchRequest {
            alert: Alert {
                id: Uuid::new_v4(),
                pond_id,
                sensor_type: None,
                kind: AlertKind::StaleData,
                severity: Severity::Warning,
                reason: "No sensor data received for over 1 hour".to_string(),
                message_key: "stale_data".to_string(),
                value: None,
                created_at: Utc::now(),
                dedup_key,
            },
            locale: "en".to_string(),
        }
    }

    fn worker(
        channel: ScriptedChannel,
        receiver: mpsc::Receiver<DispatchRequest>,
        store: Arc<MemoryStore>,
        health: HealthRegistry,
        deliveries: DeliveryLog,
    ) -> DispatchWorker {
        let dispatcher = Dispatcher::new(
            &NotificationConfig::default(),
            Arc::new(channel),
            Arc::new(StaticCatalog::default()),
        )
        .with_retry(fast_retry(2));

        DispatchWorker::new(
            Arc::new(dispatcher),
            receiver,
            store,
            health,
            EngineMetrics::new(),
            StructuredLogger::new("test"),
            deliveries,
            2,
        )
    }

    #[test]
    fn test_full_queue_rejects_without_waiting() {
        let (queue, _receiver) = DispatchQueue::bounded(1);

        assert!(queue.enqueue(request(1)).is_ok());
        assert_eq!(queue.depth(), 1);
        assert_eq!(queue.enqueue(request(1)), Err(EnqueueError::Full));
    }

    #[test]
    fn test_closed_queue() {
        let (queue, receiver) = DispatchQueue::bounded(4);
        drop(receiver);
        assert_eq!(queue.enqueue(request(1)), Err(EnqueueError::Closed));
    }

    #[tokio::test]
    async fn test_worker_drains_queue_on_shutdown() {
        let (queue, receiver) = DispatchQueue::bounded(8);
        let store = Arc::new(MemoryStore::new());
        let health = HealthRegistry::with_all_components().await;
        let deliveries = DeliveryLog::new();

        for pond in 1..=3 {
            queue.enqueue(request(pond)).unwrap();
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        shutdown_tx.send(()).unwrap();
        worker(
            ScriptedChannel::default(),
            receiver,
            store.clone(),
            health.clone(),
            deliveries.clone(),
        )
        .run(shutdown_rx)
        .await;

        assert_eq!(store.deliveries().len(), 3);
        assert!(store.deliveries().iter().all(DeliveryResult::is_delivered));
        assert_eq!(deliveries.recent(2, 10).len(), 1);
        assert_eq!(
            health.status_of(Component::Dispatcher).await,
            Some(ComponentStatus::Healthy)
        );
    }

    #[tokio::test]
    async fn test_exhausted_delivery_degrades_dispatcher() {
        let (queue, receiver) = DispatchQueue::bounded(8);
        let store = Arc::new(MemoryStore::new());
        let health = HealthRegistry::with_all_components().await;

        queue.enqueue(request(7)).unwrap();
        drop(queue);

        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        worker(
            ScriptedChannel::always_down(),
            receiver,
            store.clone(),
            health.clone(),
            DeliveryLog::new(),
        )
        .run(shutdown_rx)
        .await;

        let recorded = store.deliveries();
        assert_eq!(recorded.len(), 1);
        assert!(!recorded[0].is_delivered());
        assert_eq!(recorded[0].total_attempts(), 2);
        assert_eq!(
            health.status_of(Component::Dispatcher).await,
            Some(ComponentStatus::Degraded)
        );
    }
}
