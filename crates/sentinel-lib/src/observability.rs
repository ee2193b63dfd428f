//! Observability for the pond sentinel engine
//!
//! Provides:
//! - Prometheus metrics (ingestion, detection, alerting, aggregation, delivery)
//! - Structured JSON logging of engine events with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{debug, error, info, warn};

use crate::anomaly::ChangePoint;
use crate::models::{AggregateBucket, Alert, DedupKey, Reading, SeriesKey, Severity};
use crate::notify::DeliveryResult;
use crate::validator::RejectionReason;

/// Histogram buckets for ingest latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.00005, 0.0001, 0.00025, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    readings_ingested: IntCounter,
    readings_rejected: IntCounterVec,
    late_readings: IntCounter,
    change_points: IntCounterVec,
    detector_resets: IntCounter,
    alerts_created: IntCounterVec,
    alerts_suppressed: IntCounter,
    delivery_attempts: IntCounter,
    delivery_failures: IntCounter,
    notifications_dropped: IntCounter,
    buckets_closed: IntCounterVec,
    bucket_persist_failures: IntCounter,
    series_tracked: IntGauge,
    dispatch_queue_depth: IntGauge,
    ingest_latency_seconds: Histogram,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            readings_ingested: register_int_counter!(
                "pond_sentinel_readings_ingested_total",
                "Readings accepted by the validator"
            )
            .expect("Failed to register readings_ingested_total"),

            readings_rejected: register_int_counter_vec!(
                "pond_sentinel_readings_rejected_total",
                "Readings rejected at validation",
                &["reason"]
            )
            .expect("Failed to register readings_rejected_total"),

            late_readings: register_int_counter!(
                "pond_sentinel_late_readings_total",
                "Readings that arrived after their aggregation window closed"
            )
            .expect("Failed to register late_readings_total"),

            change_points: register_int_counter_vec!(
                "pond_sentinel_change_points_total",
                "Page-Hinkley alarms raised",
                &["sensor"]
            )
            .expect("Failed to register change_points_total"),

            detector_resets: register_int_counter!(
                "pond_sentinel_detector_resets_total",
                "Detector states reset after becoming non-finite"
            )
            .expect("Failed to register detector_resets_total"),

            alerts_created: register_int_counter_vec!(
                "pond_sentinel_alerts_total",
                "Alerts created",
                &["severity"]
            )
            .expect("Failed to register alerts_total"),

            alerts_suppressed: register_int_counter!(
                "pond_sentinel_alerts_suppressed_total",
                "Alert events suppressed by cool-down"
            )
            .expect("Failed to register alerts_suppressed_total"),

            delivery_attempts: register_int_counter!(
                "pond_sentinel_delivery_attempts_total",
                "Notification send attempts"
            )
            .expect("Failed to register delivery_attempts_total"),

            delivery_failures: register_int_counter!(
                "pond_sentinel_delivery_failures_total",
                "Notifications that exhausted their retries"
            )
            .expect("Failed to register delivery_failures_total"),

            notifications_dropped: register_int_counter!(
                "pond_sentinel_notifications_dropped_total",
                "Notifications not queued because the dispatch queue was full"
            )
            .expect("Failed to register notifications_dropped_total"),

            buckets_closed: register_int_counter_vec!(
                "pond_sentinel_buckets_closed_total",
                "Aggregate buckets closed and persisted",
                &["granularity"]
            )
            .expect("Failed to register buckets_closed_total"),

            bucket_persist_failures: register_int_counter!(
                "pond_sentinel_bucket_persist_failures_total",
                "Failed attempts to persist a sealed bucket"
            )
            .expect("Failed to register bucket_persist_failures_total"),

            series_tracked: register_int_gauge!(
                "pond_sentinel_series_tracked",
                "Number of (pond, sensor) series with live detector state"
            )
            .expect("Failed to register series_tracked"),

            dispatch_queue_depth: register_int_gauge!(
                "pond_sentinel_dispatch_queue_depth",
                "Notifications waiting in the dispatch queue"
            )
            .expect("Failed to register dispatch_queue_depth"),

            ingest_latency_seconds: register_histogram!(
                "pond_sentinel_ingest_latency_seconds",
                "Time spent processing one reading",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register ingest_latency_seconds"),
        }
    }
}

/// Lightweight handle to the global engine metrics.
///
/// Clones share the same underlying collectors.
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EngineMetricsInner {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new)
    }

    pub fn inc_ingested(&self) {
        self.inner().readings_ingested.inc();
    }

    pub fn inc_rejected(&self, reason: &RejectionReason) {
        self.inner()
            .readings_rejected
            .with_label_values(&[reason.code()])
            .inc();
    }

    pub fn inc_late_readings(&self) {
        self.inner().late_readings.inc();
    }

    pub fn inc_change_points(&self, sensor: &str) {
        self.inner().change_points.with_label_values(&[sensor]).inc();
    }

    pub fn inc_detector_resets(&self) {
        self.inner().detector_resets.inc();
    }

    pub fn inc_alerts(&self, severity: Severity) {
        self.inner()
            .alerts_created
            .with_label_values(&[severity.as_str()])
            .inc();
    }

    pub fn inc_suppressed(&self) {
        self.inner().alerts_suppressed.inc();
    }

    pub fn add_delivery_attempts(&self, attempts: u64) {
        self.inner().delivery_attempts.inc_by(attempts);
    }

    pub fn inc_delivery_failures(&self) {
        self.inner().delivery_failures.inc();
    }

    pub fn inc_notifications_dropped(&self) {
        self.inner().notifications_dropped.inc();
    }

    pub fn inc_buckets_closed(&self, granularity: &str) {
        self.inner()
            .buckets_closed
            .with_label_values(&[granularity])
            .inc();
    }

    pub fn inc_bucket_persist_failures(&self) {
        self.inner().bucket_persist_failures.inc();
    }

    pub fn set_series_tracked(&self, count: i64) {
        self.inner().series_tracked.set(count);
    }

    pub fn set_queue_depth(&self, depth: i64) {
        self.inner().dispatch_queue_depth.set(depth);
    }

    pub fn observe_ingest_latency(&self, duration_secs: f64) {
        self.inner().ingest_latency_seconds.observe(duration_secs);
    }
}

/// Structured logger for engine events.
///
/// Every event carries an `event` field so log pipelines can route on it.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn log_reading_rejected(&self, reading: &Reading, reason: &RejectionReason) {
        warn!(
            event = "reading_rejected",
            instance = %self.instance,
            pond_id = reading.pond_id,
            sensor = %reading.sensor_type,
            value = reading.value,
            unit = %reading.unit,
            timestamp = %reading.timestamp,
            reason = reason.code(),
            details = %reason,
            "Reading rejected"
        );
    }

    pub fn log_change_point(&self, change_point: &ChangePoint) {
        warn!(
            event = "change_point",
            instance = %self.instance,
            series = %change_point.series,
            value = change_point.value,
            mean_before = change_point.mean_before,
            deviation = change_point.deviation,
            lambda = change_point.lambda,
            samples = change_point.samples,
            "Page-Hinkley alarm raised"
        );
    }

    pub fn log_alert_created(&self, alert: &Alert) {
        match alert.severity {
            Severity::Critical => warn!(
                event = "alert_created",
                instance = %self.instance,
                alert_id = %alert.id,
                pond_id = alert.pond_id,
                kind = %alert.kind,
                severity = %alert.severity,
                dedup_key = %alert.dedup_key,
                reason = %alert.reason,
                "Critical alert created"
            ),
            _ => info!(
                event = "alert_created",
                instance = %self.instance,
                alert_id = %alert.id,
                pond_id = alert.pond_id,
                kind = %alert.kind,
                severity = %alert.severity,
                dedup_key = %alert.dedup_key,
                reason = %alert.reason,
                "Alert created"
            ),
        }
    }

    pub fn log_alert_suppressed(&self, key: &DedupKey, severity: Severity, active: Severity) {
        debug!(
            event = "alert_suppressed",
            instance = %self.instance,
            dedup_key = %key,
            severity = %severity,
            active_severity = %active,
            "Alert suppressed within cool-down"
        );
    }

    pub fn log_detector_reset(&self, series: SeriesKey, source: &str) {
        warn!(
            event = "detector_state_reset",
            instance = %self.instance,
            series = %series,
            source = source,
            "Non-finite detector state reset to initial"
        );
    }

    pub fn log_bucket_closed(&self, bucket: &AggregateBucket) {
        debug!(
            event = "bucket_closed",
            instance = %self.instance,
            series = %bucket.series_key(),
            granularity = %bucket.granularity,
            bucket_start = %bucket.bucket_start,
            count = bucket.count,
            "Aggregate bucket closed"
        );
    }

    pub fn log_delivery_failed(&self, result: &DeliveryResult) {
        for failure in result.failures() {
            error!(
                event = "delivery_failed",
                instance = %self.instance,
                alert_id = %result.alert_id,
                pond_id = result.pond_id,
                recipient = %failure.recipient,
                attempts = failure.attempts,
                error = ?failure.outcome,
                "Notification delivery failed"
            );
        }
    }

    pub fn log_startup(&self, version: &str, open_buckets_restored: usize) {
        info!(
            event = "engine_started",
            instance = %self.instance,
            version = %version,
            open_buckets_restored = open_buckets_restored,
            "Pond sentinel engine started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "engine_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Pond sentinel engine shutting down"
        );
    }
}
