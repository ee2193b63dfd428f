//! Time-bucketed aggregation of validated readings
//!
//! Every series keeps one open bucket per configured granularity. Buckets
//! are sealed when a reading for a later window arrives or when the
//! watermark passes their end, persisted on the next close pass, and kept
//! as closed history until retention purges them.

mod engine;

pub use engine::AggregationEngine;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{AggregateBucket, Granularity};

/// What `ingest` did for one granularity
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BucketUpdate {
    /// The reading was added to the open bucket
    Updated {
        granularity: Granularity,
        bucket_start: DateTime<Utc>,
    },
    /// The previous open bucket was sealed and a new one opened
    Rolled {
        granularity: Granularity,
        sealed_start: DateTime<Utc>,
        bucket_start: DateTime<Utc>,
    },
    /// The reading's window is already past the watermark or behind the open bucket
    Late {
        granularity: Granularity,
        bucket_start: DateTime<Utc>,
    },
}

impl BucketUpdate {
    pub fn is_late(&self) -> bool {
        matches!(self, BucketUpdate::Late { .. })
    }
}

/// Outcome of one `close_expired` pass
#[derive(Debug, Default)]
pub struct ClosePass {
    /// Buckets persisted and closed during this pass
    pub closed: Vec<AggregateBucket>,
    /// Sealed buckets whose persistence failed; retried next pass
    pub pending: usize,
    pub watermark: Option<DateTime<Utc>>,
}
