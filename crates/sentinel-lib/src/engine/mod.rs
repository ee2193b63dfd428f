//! Streaming detection and alerting engine
//!
//! [`Engine`] is the single entry point for readings. Each reading is
//! validated, persisted and then processed under its series' exclusive
//! section: detector update, bucket accumulation, alert classification
//! and pond health scoring. Alerts are recorded before they are handed to
//! the dispatch queue, so delivery never blocks detection and a failed
//! delivery never loses an alert.
//!
//! Periodic work (bucket closing, retention, checkpoints, stale-data and
//! daily-summary alerts) lives in [`MaintenanceLoop`].

mod r#loop;


pub use r#loop::{MaintenanceLoop, MaintenanceReport};

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::aggregation::{AggregationEngine, BucketUpdate};
use crate::anomaly::{AlertClassifier, AlertEvent, ChangePoint, Classification, DetectorStep, PageHinkley};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, EngineConfig};
use crate::health::{Component, ComponentStatus, HealthRegistry};
use crate::models::{
    AggregateBucket, Alert, DetectorState, Granularity, HealthScore, PondId, Reading, SensorType,
    SeriesKey,
};
use crate::notify::{DeliveryLog, DeliveryResult, DispatchQueue, DispatchRequest, EnqueueError};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::scoring::{ActiveAlarm, HealthScorer};
use crate::store::{MemoryStore, Store, StoreError};
use crate::validator::{ReadingValidator, RejectionReason};

/// How many days back `get_recent_alerts` can look
pub const RECENT_ALERT_DAYS: i64 = 7;

/// What happened to one accepted reading
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub series: SeriesKey,
    pub timestamp: DateTime<Utc>,
    /// Whether `save_reading` succeeded
    pub persisted: bool,
    /// Page-Hinkley deviation after the update; absent on alarm or reset
    pub deviation: Option<f64>,
    pub change_point: Option<ChangePoint>,
    pub detector_reset: bool,
    pub buckets: Vec<BucketUpdate>,
    pub alerts: Vec<Alert>,
    pub suppressed: usize,
    pub health: HealthScore,
}

/// State owned by one series' exclusive section
struct SeriesState {
    detector: PageHinkley,
    /// Updated since the last checkpoint
    dirty: bool,
}

/// Per-pond inputs for health scoring and staleness
#[derive(Debug, Clone)]
struct PondState {
    latest: BTreeMap<SensorType, (f64, DateTime<Utc>)>,
    alarms: BTreeMap<SensorType, DateTime<Utc>>,
    last_seen: DateTime<Utc>,
    stale_reported: bool,
}

impl PondState {
    fn new(last_seen: DateTime<Utc>) -> Self {
        Self {
            latest: BTreeMap::new(),
            alarms: BTreeMap::new(),
            last_seen,
            stale_reported: false,
        }
    }
}

/// Builder for [`Engine`]
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn Store>>,
    clock: Option<Arc<dyn Clock>>,
    dispatch: Option<DispatchQueue>,
    deliveries: Option<DeliveryLog>,
    health: Option<HealthRegistry>,
    instance: String,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            clock: None,
            dispatch: None,
            deliveries: None,
            health: None,
            instance: "pond-sentinel".to_string(),
        }
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Hand alerts to this queue for delivery
    pub fn dispatch_queue(mut self, queue: DispatchQueue) -> Self {
        self.dispatch = Some(queue);
        self
    }

    /// Delivery results shared with the dispatch worker
    pub fn delivery_log(mut self, deliveries: DeliveryLog) -> Self {
        self.deliveries = Some(deliveries);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    /// Validate the configuration and build the engine
    pub fn build(self) -> Result<Engine, ConfigError> {
        self.config.validate()?;

        let config = self.config;
        Ok(Engine {
            validator: ReadingValidator::new(&config),
            scorer: HealthScorer::new(config.health.clone(), config.sensors.clone()),
            classifier: AlertClassifier::new(config.alerts.clone()),
            aggregation: AggregationEngine::new(&config.aggregation),
            store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            dispatch: self.dispatch,
            deliveries: self.deliveries.unwrap_or_default(),
            health: self.health.unwrap_or_default(),
            metrics: EngineMetrics::new(),
            logger: StructuredLogger::new(self.instance),
            series: DashMap::new(),
            ponds: DashMap::new(),
            recent_alerts: DashMap::new(),
            unsaved_alerts: Mutex::new(Vec::new()),
            config,
        })
    }
}

/// The change-detection and alerting engine
pub struct Engine {
    config: EngineConfig,
    validator: ReadingValidator,
    scorer: HealthScorer,
    classifier: AlertClassifier,
    aggregation: AggregationEngine,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    dispatch: Option<DispatchQueue>,
    deliveries: DeliveryLog,
    health: HealthRegistry,
    metrics: EngineMetrics,
    logger: StructuredLogger,
    series: DashMap<SeriesKey, Arc<tokio::sync::Mutex<SeriesState>>>,
    ponds: DashMap<PondId, PondState>,
    /// Per-pond alert history in creation order, bounded by [`RECENT_ALERT_DAYS`]
    recent_alerts: DashMap<PondId, VecDeque<Alert>>,
    /// Alerts whose `save_alert` failed, retried by maintenance
    unsaved_alerts: Mutex<Vec<Alert>>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn health_registry(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Number of series with live detector state
    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    /// Validate and process one reading.
    ///
    /// Rejections are logged, counted and returned; a rejected reading
    /// reaches neither the detector nor the aggregator.
    pub async fn ingest(&self, reading: Reading) -> Result<IngestReport, RejectionReason> {
        let started = Instant::now();
        let now = self.clock.now();

        let valid = match self.validator.validate(reading.clone(), now) {
            Ok(valid) => valid,
            Err(reason) => {
                self.metrics.inc_rejected(&reason);
                self.logger.log_reading_rejected(&reading, &reason);
                return Err(reason);
            }
        };
        self.metrics.inc_ingested();

        let series = valid.series_key();
        let value = valid.value();
        let timestamp = valid.timestamp();

        let persisted = match self.store.save_reading(&valid).await {
            Ok(()) => true,
            Err(e) => {
                self.note_store_error("save_reading", &e).await;
                false
            }
        };

        let state = self.series_state(series).await?;
        let mut state = state.lock().await;

        let step = state.detector.update(value, timestamp);
        state.dirty = true;

        let buckets = self.aggregation.ingest(series, value, timestamp);
        for _ in buckets.iter().filter(|update| update.is_late()) {
            self.metrics.inc_late_readings();
        }

        let mut deviation = None;
        let mut change_point = None;
        let mut detector_reset = false;
        let mut events = Vec::new();

        match step {
            DetectorStep::Steady { deviation: d } => deviation = Some(d),
            DetectorStep::Alarm(alarm) => {
                self.metrics.inc_change_points(series.sensor_type.as_str());
                self.logger.log_change_point(&alarm);

                match self
                    .store
                    .save_detector_state(series, state.detector.state())
                    .await
                {
                    Ok(()) => state.dirty = false,
                    Err(e) => self.note_store_error("save_detector_state", &e).await,
                }

                events.push(AlertEvent::ChangePoint(alarm.clone()));
                change_point = Some(alarm);
            }
            DetectorStep::Corrupted => {
                self.metrics.inc_detector_resets();
                self.logger.log_detector_reset(series, "update");
                detector_reset = true;
            }
        }

        events.push(AlertEvent::LimitBreach {
            series,
            value,
            timestamp,
        });

        let health = self.update_pond(series, value, timestamp, change_point.as_ref(), now);
        events.push(AlertEvent::HealthScore {
            pond_id: series.pond_id,
            score: health.score,
            timestamp: now,
        });

        let mut alerts = Vec::new();
        let mut suppressed = 0;
        for event in &events {
            let (emitted, skipped) = self.classify_and_record(event, now).await;
            alerts.extend(emitted);
            suppressed += skipped;
        }
        drop(state);

        self.metrics
            .observe_ingest_latency(started.elapsed().as_secs_f64());
        Ok(IngestReport {
            series,
            timestamp,
            persisted,
            deviation,
            change_point,
            detector_reset,
            buckets,
            alerts,
            suppressed,
            health,
        })
    }

    /// Latest detector state of a series, from memory or the store
    pub async fn get_active_detector_state(
        &self,
        pond_id: PondId,
        sensor_type: SensorType,
    ) -> Option<DetectorState> {
        let series = SeriesKey::new(pond_id, sensor_type);
        let live = self.series.get(&series).map(|entry| entry.value().clone());
        match live {
            Some(state) => Some(state.lock().await.detector.state().clone()),
            None => self.store.load_detector_state(series).await.ok().flatten(),
        }
    }

    /// Alerts of a pond created at or after `since`, newest first.
    ///
    /// History reaches back [`RECENT_ALERT_DAYS`]; older alerts are only
    /// in the store.
    pub fn get_recent_alerts(&self, pond_id: PondId, since: DateTime<Utc>) -> Vec<Alert> {
        let Some(history) = self.recent_alerts.get(&pond_id) else {
            return Vec::new();
        };
        history
            .iter()
            .rev()
            .filter(|alert| alert.created_at >= since)
            .cloned()
            .collect()
    }

    /// Buckets of a series starting in `[from, to)`
    pub fn get_aggregate_buckets(
        &self,
        pond_id: PondId,
        sensor_type: SensorType,
        granularity: Granularity,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<AggregateBucket> {
        self.aggregation
            .buckets(SeriesKey::new(pond_id, sensor_type), granularity, from, to)
    }

    /// Current health score of a pond, or `None` if it never reported
    pub fn get_health_score(&self, pond_id: PondId) -> Option<HealthScore> {
        let now = self.clock.now();
        self.ponds
            .get(&pond_id)
            .map(|pond| self.score_pond(pond_id, pond.value(), now))
    }

    /// Most recent delivery results of a pond, newest first
    pub fn recent_deliveries(&self, pond_id: PondId, limit: usize) -> Vec<DeliveryResult> {
        self.deliveries.recent(pond_id, limit)
    }

    /// Resume closed history and open buckets from the store.
    ///
    /// Returns how many open buckets were restored.
    pub async fn restore(&self) -> Result<usize, StoreError> {
        let since = self.clock.now() - self.config.retention.aggregate_horizon();
        let closed = self.store.load_aggregate_buckets(since).await?;
        self.aggregation.restore_closed(closed);

        let open = self.store.load_open_buckets().await?;
        let restored = self.aggregation.restore_open(open);
        debug!(restored = restored, "Restored open aggregate buckets");
        Ok(restored)
    }

    /// Persist dirty detector states, open buckets and unsaved alerts
    pub async fn flush(&self) -> Result<(), StoreError> {
        self.checkpoint_detectors().await;
        self.retry_unsaved_alerts().await;
        self.store
            .save_open_buckets(&self.aggregation.snapshot_open())
            .await
    }

    pub(crate) fn aggregation(&self) -> &AggregationEngine {
        &self.aggregation
    }

    pub(crate) fn classifier(&self) -> &AlertClassifier {
        &self.classifier
    }

    pub(crate) fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Classify an event and record any emitted alert; returns the emitted
    /// alerts and the number of suppressed events
    pub(crate) async fn classify_and_record(
        &self,
        event: &AlertEvent,
        now: DateTime<Utc>,
    ) -> (Vec<Alert>, usize) {
        match self.classifier.classify(event, now) {
            Classification::Emit(alert) => {
                self.record_alert(alert.clone()).await;
                (vec![alert], 0)
            }
            Classification::Suppressed {
                dedup_key,
                severity,
                active,
            } => {
                self.metrics.inc_suppressed();
                self.logger.log_alert_suppressed(&dedup_key, severity, active);
                (Vec::new(), 1)
            }
            Classification::NoAlert => (Vec::new(), 0),
        }
    }

    /// Save every dirty detector state; returns how many were saved and how many failed
    pub(crate) async fn checkpoint_detectors(&self) -> (usize, usize) {
        let states: Vec<(SeriesKey, Arc<tokio::sync::Mutex<SeriesState>>)> = self
            .series
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let (mut saved, mut failed) = (0, 0);
        for (series, state) in states {
            let mut state = state.lock().await;
            if !state.dirty {
                continue;
            }
            match self
                .store
                .save_detector_state(series, state.detector.state())
                .await
            {
                Ok(()) => {
                    state.dirty = false;
                    saved += 1;
                }
                Err(e) => {
                    failed += 1;
                    self.note_store_error("save_detector_state", &e).await;
                }
            }
        }
        (saved, failed)
    }

    /// Retry alerts whose first save failed; returns how many were saved
    pub(crate) async fn retry_unsaved_alerts(&self) -> usize {
        let pending =
            std::mem::take(&mut *self.unsaved_alerts.lock().unwrap_or_else(PoisonError::into_inner));
        if pending.is_empty() {
            return 0;
        }

        let mut saved = 0;
        let mut still_pending = Vec::new();
        for alert in pending {
            match self.store.save_alert(&alert).await {
                Ok(()) => saved += 1,
                Err(e) => {
                    self.note_store_error("save_alert", &e).await;
                    still_pending.push(alert);
                }
            }
        }

        if !still_pending.is_empty() {
            self.unsaved_alerts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(still_pending);
        }
        saved
    }

    /// Drop alert history older than [`RECENT_ALERT_DAYS`]; returns how many were removed
    pub(crate) fn prune_recent_alerts(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::days(RECENT_ALERT_DAYS);
        let mut removed = 0;
        self.recent_alerts.retain(|_, history| {
            removed += expire_before(history, cutoff);
            !history.is_empty()
        });
        removed
    }

    pub(crate) fn unsaved_alert_count(&self) -> usize {
        self.unsaved_alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Ponds silent since before `cutoff` that were not reported yet.
    ///
    /// Each returned pond is marked reported until it sends data again.
    pub(crate) fn take_stale_ponds(&self, cutoff: DateTime<Utc>) -> Vec<(PondId, DateTime<Utc>)> {
        let mut stale = Vec::new();
        for mut pond in self.ponds.iter_mut() {
            if !pond.stale_reported && pond.last_seen <= cutoff {
                pond.stale_reported = true;
                stale.push((*pond.key(), pond.last_seen));
            }
        }
        stale
    }

    pub(crate) async fn note_store_error(&self, operation: &str, error: &StoreError) {
        warn!(operation = operation, error = %error, "Store operation failed");
        self.health
            .set_degraded(Component::Store, format!("{} failed: {}", operation, error))
            .await;
    }

    pub(crate) async fn note_store_recovered(&self) {
        if self.health.status_of(Component::Store).await == Some(ComponentStatus::Degraded) {
            self.health.set_healthy(Component::Store).await;
        }
    }

    async fn series_state(
        &self,
        series: SeriesKey,
    ) -> Result<Arc<tokio::sync::Mutex<SeriesState>>, RejectionReason> {
        if let Some(existing) = self.series.get(&series).map(|entry| entry.value().clone()) {
            return Ok(existing);
        }

        let params = self
            .config
            .detector_params(series.sensor_type)
            .ok_or(RejectionReason::UnmonitoredSensor(series.sensor_type))?;

        let detector = match self.store.load_detector_state(series).await {
            Ok(Some(state)) => {
                let (detector, reset) = PageHinkley::restore(series, params, state);
                if reset {
                    self.metrics.inc_detector_resets();
                    self.logger.log_detector_reset(series, "restore");
                }
                if let Some(at) = detector.state().last_alarm_at {
                    self.ponds
                        .entry(series.pond_id)
                        .or_insert_with(|| PondState::new(at))
                        .alarms
                        .insert(series.sensor_type, at);
                }
                detector
            }
            Ok(None) => PageHinkley::new(series, params),
            Err(e) => {
                self.note_store_error("load_detector_state", &e).await;
                PageHinkley::new(series, params)
            }
        };

        let state = self
            .series
            .entry(series)
            .or_insert_with(|| {
                Arc::new(tokio::sync::Mutex::new(SeriesState {
                    detector,
                    dirty: false,
                }))
            })
            .value()
            .clone();
        self.metrics.set_series_tracked(self.series.len() as i64);
        Ok(state)
    }

    fn update_pond(
        &self,
        series: SeriesKey,
        value: f64,
        timestamp: DateTime<Utc>,
        change_point: Option<&ChangePoint>,
        now: DateTime<Utc>,
    ) -> HealthScore {
        let mut pond = self
            .ponds
            .entry(series.pond_id)
            .or_insert_with(|| PondState::new(timestamp));

        let newer = pond
            .latest
            .get(&series.sensor_type)
            .map_or(true, |(_, seen)| timestamp >= *seen);
        if newer {
            pond.latest.insert(series.sensor_type, (value, timestamp));
        }
        if timestamp > pond.last_seen {
            pond.last_seen = timestamp;
        }
        pond.stale_reported = false;

        if let Some(change_point) = change_point {
            pond.alarms.insert(series.sensor_type, change_point.timestamp);
        }

        self.score_pond(series.pond_id, pond.value(), now)
    }

    fn score_pond(&self, pond_id: PondId, pond: &PondState, now: DateTime<Utc>) -> HealthScore {
        let hold = self.config.health.alarm_hold();
        let alarms: Vec<ActiveAlarm> = pond
            .alarms
            .iter()
            .filter(|(_, at)| now - **at < hold)
            .map(|(&sensor_type, _)| ActiveAlarm {
                sensor_type,
                severity: self
                    .classifier
                    .policy()
                    .change_point_severity(pond_id, sensor_type),
            })
            .collect();
        let latest: BTreeMap<SensorType, f64> = pond
            .latest
            .iter()
            .map(|(&sensor, &(value, _))| (sensor, value))
            .collect();

        self.scorer.score(pond_id, &latest, &alarms, now)
    }

    async fn record_alert(&self, alert: Alert) {
        self.metrics.inc_alerts(alert.severity);
        self.logger.log_alert_created(&alert);

        if let Err(e) = self.store.save_alert(&alert).await {
            self.note_store_error("save_alert", &e).await;
            self.unsaved_alerts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(alert.clone());
        }

        {
            let mut history = self.recent_alerts.entry(alert.pond_id).or_default();
            expire_before(&mut history, alert.created_at - Duration::days(RECENT_ALERT_DAYS));
            history.push_back(alert.clone());
        }

        let Some(queue) = &self.dispatch else {
            return;
        };
        let locale = self.config.notifications.locale_for(alert.pond_id).to_string();
        let alert_id = alert.id;
        match queue.enqueue(DispatchRequest { alert, locale }) {
            Ok(()) => {}
            Err(EnqueueError::Full) => {
                self.metrics.inc_notifications_dropped();
                warn!(alert_id = %alert_id, "Dispatch queue full, notification dropped");
            }
            Err(EnqueueError::Closed) => {
                warn!(alert_id = %alert_id, "Dispatch queue closed, notification dropped");
            }
        }
        self.metrics.set_queue_depth(queue.depth() as i64);
    }
}

/// Pop alerts created before `cutoff` off the front of a history
fn expire_before(history: &mut VecDeque<Alert>, cutoff: DateTime<Utc>) -> usize {
    let before = history.len();
    while history.front().is_some_and(|alert| alert.created_at < cutoff) {
        history.pop_front();
    }
    before - history.len()
}
