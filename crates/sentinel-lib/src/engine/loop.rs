//! Periodic maintenance pass
//!
//! Runs independently of ingestion on its own interval. Each pass reads
//! "now" once and uses it for every decision in the pass.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::Engine;
use crate::anomaly::AlertEvent;
use crate::health::{Component, ComponentStatus};
use crate::models::{Granularity, PondId};

/// Counts from one maintenance pass
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MaintenanceReport {
    pub buckets_closed: usize,
    pub buckets_pending: usize,
    pub buckets_purged: usize,
    pub detectors_checkpointed: usize,
    pub alerts_retried: usize,
    pub alerts_emitted: usize,
    pub dedup_entries_pruned: usize,
    pub alerts_expired: usize,
}

/// Drives [`MaintenanceLoop::run_pass`] on a fixed interval
pub struct MaintenanceLoop {
    engine: Arc<Engine>,
    interval: Duration,
}

impl MaintenanceLoop {
    pub fn new(engine: Arc<Engine>) -> Self {
        let interval = engine.config().aggregation.close_interval();
        Self { engine, interval }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run until shutdown, then run a final pass and flush engine state
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting maintenance loop"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_pass(self.engine.now()).await;
                    debug!(?report, "Maintenance pass complete");
                }
                _ = shutdown.recv() => {
                    info!("Shutting down maintenance loop");
                    break;
                }
            }
        }

        self.run_pass(self.engine.now()).await;
        if let Err(e) = self.engine.flush().await {
            warn!(error = %e, "Failed to flush engine state at shutdown");
        }
    }

    /// One pass at the given instant
    pub async fn run_pass(&self, now: DateTime<Utc>) -> MaintenanceReport {
        let engine = &self.engine;
        let mut report = MaintenanceReport::default();
        let mut store_ok = true;

        let pass = engine
            .aggregation()
            .close_expired(now, engine.store().as_ref())
            .await;
        for bucket in &pass.closed {
            engine.metrics().inc_buckets_closed(bucket.granularity.as_str());
            engine.logger().log_bucket_closed(bucket);
        }
        report.buckets_closed = pass.closed.len();
        report.buckets_pending = pass.pending;

        let health = engine.health_registry();
        if pass.pending > 0 {
            store_ok = false;
            for _ in 0..pass.pending {
                engine.metrics().inc_bucket_persist_failures();
            }
            health
                .set_degraded(
                    Component::Aggregation,
                    format!("{} sealed buckets waiting to be persisted", pass.pending),
                )
                .await;
        } else if health.status_of(Component::Aggregation).await == Some(ComponentStatus::Degraded) {
            health.set_healthy(Component::Aggregation).await;
        }

        // One summary per pond and closed day
        let mut days: BTreeMap<(PondId, DateTime<Utc>), (usize, u64)> = BTreeMap::new();
        for bucket in pass.closed.iter().filter(|b| b.granularity == Granularity::Day) {
            let entry = days.entry((bucket.pond_id, bucket.bucket_start)).or_default();
            entry.0 += 1;
            entry.1 += bucket.count;
        }
        for ((pond_id, day), (series, readings)) in days {
            let event = AlertEvent::DailySummary {
                pond_id,
                day,
                series,
                readings,
            };
            report.alerts_emitted += engine.classify_and_record(&event, now).await.0.len();
        }

        let horizon = now - engine.config().retention.aggregate_horizon();
        match engine
            .aggregation()
            .purge_older_than(horizon, engine.store().as_ref())
            .await
        {
            Ok(purged) => report.buckets_purged = purged,
            Err(e) => {
                store_ok = false;
                engine.note_store_error("purge_buckets_before", &e).await;
            }
        }

        let (checkpointed, failed) = engine.checkpoint_detectors().await;
        report.detectors_checkpointed = checkpointed;
        if failed > 0 {
            store_ok = false;
        }
        report.alerts_retried = engine.retry_unsaved_alerts().await;
        if engine.unsaved_alert_count() > 0 {
            store_ok = false;
        }

        let cutoff = now - engine.config().alerts.stale_after();
        for (pond_id, last_seen) in engine.take_stale_ponds(cutoff) {
            let event = AlertEvent::StaleData { pond_id, last_seen };
            report.alerts_emitted += engine.classify_and_record(&event, now).await.0.len();
        }

        report.dedup_entries_pruned = engine.classifier().prune_expired(now);
        report.alerts_expired = engine.prune_recent_alerts(now);
        engine.metrics().set_series_tracked(engine.series_count() as i64);

        if store_ok {
            engine.note_store_recovered().await;
        }
        report
    }
}
