//! Durable storage collaborator
//!
//! The engine never assumes in-memory-only operation: readings, alerts,
//! closed buckets, detector states and delivery outcomes all go through
//! [`Store`]. Two implementations are provided:
//! - [`MemoryStore`] for tests and ephemeral deployments
//! - [`FileStore`] writing JSON-lines logs and atomic JSON snapshots

mod file;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{AggregateBucket, Alert, DetectorState, Granularity, SeriesKey, ValidReading};
use crate::notify::DeliveryResult;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Storage failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn save_reading(&self, reading: &ValidReading) -> Result<(), StoreError>;

    async fn save_alert(&self, alert: &Alert) -> Result<(), StoreError>;

    /// Persist a closed bucket. Saving the same window twice must not duplicate it.
    async fn save_aggregate_bucket(&self, bucket: &AggregateBucket) -> Result<(), StoreError>;

    /// Closed buckets starting at or after `since`
    async fn load_aggregate_buckets(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<AggregateBucket>, StoreError>;

    async fn load_detector_state(
        &self,
        series: SeriesKey,
    ) -> Result<Option<DetectorState>, StoreError>;

    async fn save_detector_state(
        &self,
        series: SeriesKey,
        state: &DetectorState,
    ) -> Result<(), StoreError>;

    /// Replace the snapshot of open buckets
    async fn save_open_buckets(&self, buckets: &[AggregateBucket]) -> Result<(), StoreError>;

    async fn load_open_buckets(&self) -> Result<Vec<AggregateBucket>, StoreError>;

    /// Delete closed buckets starting before `horizon`; returns how many were removed
    async fn purge_buckets_before(&self, horizon: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn save_delivery(&self, result: &DeliveryResult) -> Result<(), StoreError>;
}

/// Identity of a bucket window, used to keep bucket saves idempotent
pub(crate) type WindowKey = (SeriesKey, Granularity, DateTime<Utc>);

pub(crate) fn window_key(bucket: &AggregateBucket) -> WindowKey {
    (bucket.series_key(), bucket.granularity, bucket.bucket_start)
}

pub(crate) fn same_window(a: &AggregateBucket, b: &AggregateBucket) -> bool {
    window_key(a) == window_key(b)
}
