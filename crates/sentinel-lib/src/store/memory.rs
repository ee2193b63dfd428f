//! In-memory store

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{same_window, Store, StoreError};
use crate::models::{AggregateBucket, Alert, DetectorState, SeriesKey, ValidReading};
use crate::notify::DeliveryResult;

#[derive(Debug, Default)]
struct Tables {
    readings: Vec<ValidReading>,
    alerts: Vec<Alert>,
    buckets: Vec<AggregateBucket>,
    open_buckets: Vec<AggregateBucket>,
    detector_states: HashMap<SeriesKey, DetectorState>,
    deliveries: Vec<DeliveryResult>,
}

/// Store keeping everything in process memory.
///
/// Writes can be switched off with [`MemoryStore::set_unavailable`] to
/// exercise retry paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail with [`StoreError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn readings(&self) -> Vec<ValidReading> {
        self.read(|t| t.readings.clone())
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.read(|t| t.alerts.clone())
    }

    pub fn buckets(&self) -> Vec<AggregateBucket> {
        self.read(|t| t.buckets.clone())
    }

    pub fn open_buckets(&self) -> Vec<AggregateBucket> {
        self.read(|t| t.open_buckets.clone())
    }

    pub fn deliveries(&self) -> Vec<DeliveryResult> {
        self.read(|t| t.deliveries.clone())
    }

    pub fn detector_state(&self, series: SeriesKey) -> Option<DetectorState> {
        self.read(|t| t.detector_states.get(&series).cloned())
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        f(&tables)
    }

    fn write<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> Result<T, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&mut tables))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_reading(&self, reading: &ValidReading) -> Result<(), StoreError> {
        self.write(|t| t.readings.push(reading.clone()))
    }

    async fn save_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        self.write(|t| t.alerts.push(alert.clone()))
    }

    async fn save_aggregate_bucket(&self, bucket: &AggregateBucket) -> Result<(), StoreError> {
        self.write(|t| {
            t.buckets.retain(|b| !same_window(b, bucket));
            t.buckets.push(bucket.clone());
        })
    }

    async fn load_aggregate_buckets(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<AggregateBucket>, StoreError> {
        Ok(self.read(|t| {
            t.buckets
                .iter()
                .filter(|b| b.bucket_start >= since)
                .cloned()
                .collect()
        }))
    }

    async fn load_detector_state(
        &self,
        series: SeriesKey,
    ) -> Result<Option<DetectorState>, StoreError> {
        Ok(self.detector_state(series))
    }

    async fn save_detector_state(
        &self,
        series: SeriesKey,
        state: &DetectorState,
    ) -> Result<(), StoreError> {
        self.write(|t| {
            t.detector_states.insert(series, state.clone());
        })
    }

    async fn save_open_buckets(&self, buckets: &[AggregateBucket]) -> Result<(), StoreError> {
        self.write(|t| t.open_buckets = buckets.to_vec())
    }

    async fn load_open_buckets(&self) -> Result<Vec<AggregateBucket>, StoreError> {
        Ok(self.open_buckets())
    }

    async fn purge_buckets_before(&self, horizon: DateTime<Utc>) -> Result<usize, StoreError> {
        self.write(|t| {
            let before = t.buckets.len();
            t.buckets.retain(|b| b.bucket_start >= horizon);
            before - t.buckets.len()
        })
    }

    async fn save_delivery(&self, result: &DeliveryResult) -> Result<(), StoreError> {
        self.write(|t| t.deliveries.push(result.clone()))
    }
}
