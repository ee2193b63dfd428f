//! File-backed store
//!
//! Layout of the state directory:
//! - `readings.jsonl`, `alerts.jsonl`, `deliveries.jsonl`: append-only logs
//! - `buckets.jsonl`: closed buckets, rewritten on purge
//! - `detector_states.json`, `open_buckets.json`: snapshots replaced atomically

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{window_key, Store, StoreError, WindowKey};
use crate::models::{AggregateBucket, Alert, DetectorState, SeriesKey, ValidReading};
use crate::notify::DeliveryResult;

const READINGS_LOG: &str = "readings.jsonl";
const ALERTS_LOG: &str = "alerts.jsonl";
const BUCKETS_LOG: &str = "buckets.jsonl";
const DELIVERIES_LOG: &str = "deliveries.jsonl";
const DETECTOR_SNAPSHOT: &str = "detector_states.json";
const OPEN_BUCKETS_SNAPSHOT: &str = "open_buckets.json";

#[derive(Debug, Serialize, Deserialize)]
struct DetectorEntry {
    series: SeriesKey,
    state: DetectorState,
}

/// Store persisting to a local state directory
pub struct FileStore {
    dir: PathBuf,
    /// Serializes file writes
    write_lock: Mutex<()>,
    /// Detector states mirrored in memory and snapshotted on change
    detector_states: Mutex<HashMap<SeriesKey, DetectorState>>,
    /// Windows present in the bucket log
    persisted_windows: Mutex<HashSet<WindowKey>>,
}

impl FileStore {
    /// Open (or create) a state directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let snapshot = dir.join(DETECTOR_SNAPSHOT);
        let detector_states = if snapshot.exists() {
            let entries: Vec<DetectorEntry> = read_json(&snapshot)?;
            entries.into_iter().map(|e| (e.series, e.state)).collect()
        } else {
            HashMap::new()
        };

        let persisted_windows: HashSet<WindowKey> =
            read_lines::<AggregateBucket>(&dir.join(BUCKETS_LOG))?
                .iter()
                .map(window_key)
                .collect();

        info!(
            path = %dir.display(),
            detector_states = detector_states.len(),
            closed_buckets = persisted_windows.len(),
            "Opened file store"
        );

        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
            detector_states: Mutex::new(detector_states),
            persisted_windows: Mutex::new(persisted_windows),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn append<T: Serialize>(&self, log: &str, record: &T) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(log))?;
        file.write_all(&line)?;
        Ok(())
    }

    fn snapshot<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_vec(value)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        write_atomic(&self.dir.join(name), &json)
    }

    fn read_buckets(&self) -> Result<Vec<AggregateBucket>, StoreError> {
        read_lines(&self.dir.join(BUCKETS_LOG))
    }
}

#[async_trait]
impl Store for FileStore {
    async fn save_reading(&self, reading: &ValidReading) -> Result<(), StoreError> {
        self.append(READINGS_LOG, reading)
    }

    async fn save_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        self.append(ALERTS_LOG, alert)
    }

    async fn save_aggregate_bucket(&self, bucket: &AggregateBucket) -> Result<(), StoreError> {
        let key = window_key(bucket);
        let mut windows = self
            .persisted_windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if windows.contains(&key) {
            debug!(
                pond_id = bucket.pond_id,
                sensor = %bucket.sensor_type,
                "Bucket window already persisted"
            );
            return Ok(());
        }
        self.append(BUCKETS_LOG, bucket)?;
        windows.insert(key);
        Ok(())
    }

    async fn load_aggregate_buckets(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<AggregateBucket>, StoreError> {
        let mut buckets = self.read_buckets()?;
        buckets.retain(|b| b.bucket_start >= since);
        Ok(buckets)
    }

    async fn load_detector_state(
        &self,
        series: SeriesKey,
    ) -> Result<Option<DetectorState>, StoreError> {
        let states = self
            .detector_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(states.get(&series).cloned())
    }

    async fn save_detector_state(
        &self,
        series: SeriesKey,
        state: &DetectorState,
    ) -> Result<(), StoreError> {
        let entries: Vec<DetectorEntry> = {
            let mut states = self
                .detector_states
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            states.insert(series, state.clone());
            states
                .iter()
                .map(|(series, state)| DetectorEntry {
                    series: *series,
                    state: state.clone(),
                })
                .collect()
        };
        self.snapshot(DETECTOR_SNAPSHOT, &entries)
    }

    async fn save_open_buckets(&self, buckets: &[AggregateBucket]) -> Result<(), StoreError> {
        self.snapshot(OPEN_BUCKETS_SNAPSHOT, buckets)
    }

    async fn load_open_buckets(&self) -> Result<Vec<AggregateBucket>, StoreError> {
        let path = self.dir.join(OPEN_BUCKETS_SNAPSHOT);
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_json(&path)
    }

    async fn purge_buckets_before(&self, horizon: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut windows = self
            .persisted_windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if windows.iter().all(|(_, _, start)| *start >= horizon) {
            return Ok(0);
        }

        let buckets = self.read_buckets()?;
        let before = buckets.len();
        let kept: Vec<AggregateBucket> = buckets
            .into_iter()
            .filter(|b| b.bucket_start >= horizon)
            .collect();
        let removed = before - kept.len();
        if removed == 0 {
            return Ok(0);
        }

        let mut data = Vec::new();
        for bucket in &kept {
            serde_json::to_writer(&mut data, bucket)?;
            data.push(b'\n');
        }
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        write_atomic(&self.dir.join(BUCKETS_LOG), &data)?;
        windows.retain(|(_, _, start)| *start >= horizon);
        Ok(removed)
    }

    async fn save_delivery(&self, result: &DeliveryResult) -> Result<(), StoreError> {
        self.append(DELIVERIES_LOG, result)
    }
}

/// Write via a temp file, sync, then rename over the target
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Read a JSON-lines log; a torn trailing line is skipped
fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(path = %path.display(), line = index + 1, error = %e, "Skipping unreadable record");
            }
        }
    }
    Ok(records)
}
