//! Open/sealed/closed bucket bookkeeping

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};

use super::{BucketUpdate, ClosePass};
use crate::config::AggregationConfig;
use crate::models::{AggregateBucket, Granularity, SeriesKey};
use crate::store::{Store, StoreError};

type BucketKey = (SeriesKey, Granularity);

/// Rolls readings into hour/day buckets per series.
///
/// Ingestion and close passes may run concurrently: the watermark is
/// checked while holding the open bucket's map entry, and a pass advances
/// the watermark before removing anything.
pub struct AggregationEngine {
    granularities: Vec<Granularity>,
    grace: Duration,
    open: DashMap<BucketKey, AggregateBucket>,
    /// Sealed buckets waiting to be persisted
    sealed: Mutex<Vec<AggregateBucket>>,
    /// Closed history, keyed by bucket start
    closed: RwLock<BTreeMap<BucketKey, BTreeMap<DateTime<Utc>, AggregateBucket>>>,
    watermark: RwLock<Option<DateTime<Utc>>>,
}

impl AggregationEngine {
    pub fn new(config: &AggregationConfig) -> Self {
        let mut granularities = config.granularities.clone();
        granularities.sort();
        granularities.dedup();

        Self {
            granularities,
            grace: config.grace(),
            open: DashMap::new(),
            sealed: Mutex::new(Vec::new()),
            closed: RwLock::new(BTreeMap::new()),
            watermark: RwLock::new(None),
        }
    }

    pub fn granularities(&self) -> &[Granularity] {
        &self.granularities
    }

    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        *self.watermark.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn sealed_count(&self) -> usize {
        self.sealed.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Add a reading to every configured granularity
    pub fn ingest(&self, series: SeriesKey, value: f64, ts: DateTime<Utc>) -> Vec<BucketUpdate> {
        self.granularities
            .iter()
            .map(|&granularity| self.ingest_one(series, granularity, value, ts))
            .collect()
    }

    fn ingest_one(
        &self,
        series: SeriesKey,
        granularity: Granularity,
        value: f64,
        ts: DateTime<Utc>,
    ) -> BucketUpdate {
        let window_start = granularity.window_start(ts);
        let late = BucketUpdate::Late {
            granularity,
            bucket_start: window_start,
        };

        let entry = self.open.entry((series, granularity));
        if self.is_past_watermark(window_start + granularity.duration()) {
            return late;
        }

        match entry {
            Entry::Vacant(vacant) => {
                if self.is_closed(series, granularity, window_start) {
                    return late;
                }
                let mut bucket = AggregateBucket::open(series, granularity, ts);
                bucket.record(value);
                vacant.insert(bucket);
                BucketUpdate::Updated {
                    granularity,
                    bucket_start: window_start,
                }
            }
            Entry::Occupied(mut occupied) => {
                let bucket = occupied.get_mut();
                if window_start == bucket.bucket_start {
                    bucket.record(value);
                    BucketUpdate::Updated {
                        granularity,
                        bucket_start: window_start,
                    }
                } else if window_start < bucket.bucket_start {
                    late
                } else {
                    let mut next = AggregateBucket::open(series, granularity, ts);
                    next.record(value);
                    let previous = std::mem::replace(bucket, next);
                    let sealed_start = previous.bucket_start;
                    self.seal(previous);
                    BucketUpdate::Rolled {
                        granularity,
                        sealed_start,
                        bucket_start: window_start,
                    }
                }
            }
        }
    }

    /// Seal buckets whose window ended before `now - grace`, then persist
    /// everything sealed. Failed saves stay sealed for the next pass.
    pub async fn close_expired(&self, now: DateTime<Utc>, store: &dyn Store) -> ClosePass {
        let watermark = self.advance_watermark(now - self.grace);

        let expired: Vec<BucketKey> = self
            .open
            .iter()
            .filter(|entry| entry.value().bucket_end() <= watermark)
            .map(|entry| *entry.key())
            .collect();
        for key in expired {
            if let Some((_, bucket)) = self
                .open
                .remove_if(&key, |_, bucket| bucket.bucket_end() <= watermark)
            {
                self.seal(bucket);
            }
        }

        let sealed = std::mem::take(&mut *self.sealed.lock().unwrap_or_else(PoisonError::into_inner));
        let mut pass = ClosePass {
            watermark: Some(watermark),
            ..ClosePass::default()
        };
        let mut retry = Vec::new();

        for mut bucket in sealed {
            if self.is_closed(bucket.series_key(), bucket.granularity, bucket.bucket_start) {
                continue;
            }

            bucket.closed = true;
            match store.save_aggregate_bucket(&bucket).await {
                Ok(()) => {
                    self.insert_closed(bucket.clone());
                    pass.closed.push(bucket);
                }
                Err(e) => {
                    warn!(
                        series = %bucket.series_key(),
                        granularity = %bucket.granularity,
                        bucket_start = %bucket.bucket_start,
                        error = %e,
                        "Failed to persist sealed bucket, will retry"
                    );
                    bucket.closed = false;
                    retry.push(bucket);
                }
            }
        }

        pass.pending = retry.len();
        if !retry.is_empty() {
            self.sealed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(retry);
        }

        debug!(
            watermark = %watermark,
            closed = pass.closed.len(),
            pending = pass.pending,
            "Aggregation close pass complete"
        );
        pass
    }

    /// Delete closed buckets starting before `horizon`. Open and sealed
    /// buckets are never touched.
    pub async fn purge_older_than(
        &self,
        horizon: DateTime<Utc>,
        store: &dyn Store,
    ) -> Result<usize, StoreError> {
        store.purge_buckets_before(horizon).await?;

        let mut closed = self.closed.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        for history in closed.values_mut() {
            let kept = history.split_off(&horizon);
            removed += history.len();
            *history = kept;
        }
        closed.retain(|_, history| !history.is_empty());

        Ok(removed)
    }

    /// Closed, sealed and open buckets of a series starting in `[from, to)`
    pub fn buckets(
        &self,
        series: SeriesKey,
        granularity: Granularity,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<AggregateBucket> {
        if from >= to {
            return Vec::new();
        }
        let in_range = |b: &AggregateBucket| b.bucket_start >= from && b.bucket_start < to;

        let mut buckets: Vec<AggregateBucket> = self
            .closed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(series, granularity))
            .map(|history| history.range(from..to).map(|(_, b)| b.clone()).collect())
            .unwrap_or_default();

        buckets.extend(
            self.sealed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|b| b.series_key() == series && b.granularity == granularity)
                .filter(|b| in_range(b))
                .cloned(),
        );

        if let Some(open) = self.open.get(&(series, granularity)) {
            if in_range(open.value()) {
                buckets.push(open.value().clone());
            }
        }

        buckets.sort_by_key(|b| b.bucket_start);
        buckets
    }

    /// Open and not-yet-persisted sealed buckets, for flushing at shutdown
    pub fn snapshot_open(&self) -> Vec<AggregateBucket> {
        let mut buckets: Vec<AggregateBucket> =
            self.open.iter().map(|entry| entry.value().clone()).collect();
        buckets.extend(
            self.sealed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .cloned(),
        );
        buckets.sort_by_key(|b| (b.series_key(), b.granularity, b.bucket_start));
        buckets
    }

    /// Resume buckets flushed by a previous run. Returns how many were restored.
    pub fn restore_open(&self, buckets: Vec<AggregateBucket>) -> usize {
        let mut restored = 0;
        for bucket in buckets {
            if bucket.closed
                || bucket.count == 0
                || !self.granularities.contains(&bucket.granularity)
                || self.is_closed(bucket.series_key(), bucket.granularity, bucket.bucket_start)
            {
                continue;
            }

            match self.open.entry((bucket.series_key(), bucket.granularity)) {
                Entry::Vacant(vacant) => {
                    vacant.insert(bucket);
                }
                Entry::Occupied(mut occupied) => {
                    let current = occupied.get_mut();
                    if bucket.bucket_start == current.bucket_start {
                        continue;
                    } else if bucket.bucket_start < current.bucket_start {
                        self.seal(bucket);
                    } else {
                        let previous = std::mem::replace(current, bucket);
                        self.seal(previous);
                    }
                }
            }
            restored += 1;
        }
        restored
    }

    /// Load persisted closed history; the watermark resumes at the latest closed window end
    pub fn restore_closed(&self, buckets: Vec<AggregateBucket>) {
        let mut latest_end = None;
        for mut bucket in buckets {
            bucket.closed = true;
            latest_end = latest_end.max(Some(bucket.bucket_end()));
            self.insert_closed(bucket);
        }
        if let Some(end) = latest_end {
            self.advance_watermark(end);
        }
    }

    fn seal(&self, bucket: AggregateBucket) {
        self.sealed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(bucket);
    }

    fn insert_closed(&self, bucket: AggregateBucket) {
        self.closed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((bucket.series_key(), bucket.granularity))
            .or_default()
            .insert(bucket.bucket_start, bucket);
    }

    fn is_closed(&self, series: SeriesKey, granularity: Granularity, start: DateTime<Utc>) -> bool {
        self.closed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(series, granularity))
            .map_or(false, |history| history.contains_key(&start))
    }

    fn is_past_watermark(&self, window_end: DateTime<Utc>) -> bool {
        self.watermark().map_or(false, |watermark| window_end <= watermark)
    }

    /// Move the watermark forward, never back; returns the effective watermark
    fn advance_watermark(&self, candidate: DateTime<Utc>) -> DateTime<Utc> {
        let mut watermark = self.watermark.write().unwrap_or_else(PoisonError::into_inner);
        let effective = watermark.map_or(candidate, |current| current.max(candidate));
        *watermark = Some(effective);
        effective
    }
}
