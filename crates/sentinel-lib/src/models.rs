//! Core data models for the pond sentinel engine

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pond identifier as assigned by the farm management layer
pub type PondId = u32;

/// Water quality parameters measured in a pond
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Temperature,
    Ph,
    DissolvedOxygen,
    Turbidity,
    Ammonia,
    Nitrate,
}

impl SensorType {
    pub const ALL: [SensorType; 6] = [
        SensorType::Temperature,
        SensorType::Ph,
        SensorType::DissolvedOxygen,
        SensorType::Turbidity,
        SensorType::Ammonia,
        SensorType::Nitrate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorType::Temperature => "temperature",
            SensorType::Ph => "ph",
            SensorType::DissolvedOxygen => "dissolved_oxygen",
            SensorType::Turbidity => "turbidity",
            SensorType::Ammonia => "ammonia",
            SensorType::Nitrate => "nitrate",
        }
    }

    /// Unit every reading of this type is expected to be expressed in
    pub fn canonical_unit(&self) -> &'static str {
        match self {
            SensorType::Temperature => "°C",
            SensorType::Ph => "pH",
            SensorType::DissolvedOxygen | SensorType::Ammonia | SensorType::Nitrate => "mg/L",
            SensorType::Turbidity => "NTU",
        }
    }

    fn unit_aliases(&self) -> &'static [&'static str] {
        match self {
            SensorType::Temperature => &["c", "degc", "celsius"],
            SensorType::Ph => &[],
            SensorType::DissolvedOxygen | SensorType::Ammonia | SensorType::Nitrate => &["ppm"],
            SensorType::Turbidity => &[],
        }
    }

    /// Check a unit against the canonical unit and its aliases (case-insensitive)
    pub fn accepts_unit(&self, unit: &str) -> bool {
        let unit = unit.trim().to_lowercase();
        unit == self.canonical_unit().to_lowercase()
            || self.unit_aliases().iter().any(|alias| *alias == unit)
    }

    /// Hard physical range a sensor can report; anything outside is a sensor fault
    pub fn physical_bounds(&self) -> (f64, f64) {
        match self {
            SensorType::Temperature => (-10.0, 45.0),
            SensorType::Ph => (0.0, 14.0),
            SensorType::DissolvedOxygen => (0.0, 25.0),
            SensorType::Turbidity => (0.0, 1000.0),
            SensorType::Ammonia => (0.0, 50.0),
            SensorType::Nitrate => (0.0, 500.0),
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sensor type: {0}")]
pub struct UnknownSensorType(pub String);

impl FromStr for SensorType {
    type Err = UnknownSensorType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "temperature" | "temp" => Ok(SensorType::Temperature),
            "ph" => Ok(SensorType::Ph),
            "dissolved_oxygen" | "oxygen" | "do" => Ok(SensorType::DissolvedOxygen),
            "turbidity" => Ok(SensorType::Turbidity),
            "ammonia" => Ok(SensorType::Ammonia),
            "nitrate" => Ok(SensorType::Nitrate),
            other => Err(UnknownSensorType(other.to_string())),
        }
    }
}

/// Identity of a single measurement stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub pond_id: PondId,
    pub sensor_type: SensorType,
}

impl SeriesKey {
    pub fn new(pond_id: PondId, sensor_type: SensorType) -> Self {
        Self {
            pond_id,
            sensor_type,
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pond-{}/{}", self.pond_id, self.sensor_type)
    }
}

/// Raw sensor reading as handed over by the ingestion transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub pond_id: PondId,
    pub sensor_type: SensorType,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::new(self.pond_id, self.sensor_type)
    }
}

/// A reading that passed validation. Only the validator can build one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValidReading(Reading);

impl ValidReading {
    pub(crate) fn new(reading: Reading) -> Self {
        Self(reading)
    }

    pub fn reading(&self) -> &Reading {
        &self.0
    }

    pub fn pond_id(&self) -> PondId {
        self.0.pond_id
    }

    pub fn sensor_type(&self) -> SensorType {
        self.0.sensor_type
    }

    pub fn value(&self) -> f64 {
        self.0.value
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.0.timestamp
    }

    pub fn series_key(&self) -> SeriesKey {
        self.0.series_key()
    }

    pub fn into_inner(self) -> Reading {
        self.0
    }
}

/// Page-Hinkley statistics for one series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectorState {
    /// Running mean estimate
    pub mean: f64,
    /// Cumulative deviation U_t
    pub cumulative_sum: f64,
    /// Minimum of U_t seen since the last reset (m_t)
    pub min_cumulative_sum: f64,
    /// Samples since the last reset
    pub sample_count: u64,
    /// Timestamp of the last alarm raised on this series
    pub last_alarm_at: Option<DateTime<Utc>>,
}

impl DetectorState {
    pub fn is_finite(&self) -> bool {
        self.mean.is_finite()
            && self.cumulative_sum.is_finite()
            && self.min_cumulative_sum.is_finite()
    }

    /// Current Page-Hinkley deviation (U_t - m_t)
    pub fn deviation(&self) -> f64 {
        self.cumulative_sum - self.min_cumulative_sum
    }
}

/// Alert severity levels, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source class of an alert; part of the deduplication identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ChangePoint,
    LimitBreach,
    HealthScore,
    StaleData,
    DailySummary,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::ChangePoint => "change_point",
            AlertKind::LimitBreach => "limit_breach",
            AlertKind::HealthScore => "health_score",
            AlertKind::StaleData => "stale_data",
            AlertKind::DailySummary => "daily_summary",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key grouping related alert events for deduplication and escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub pond_id: PondId,
    pub sensor_type: Option<SensorType>,
    pub kind: AlertKind,
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sensor_type {
            Some(sensor) => write!(f, "{}:{}:{}", self.pond_id, sensor, self.kind),
            None => write!(f, "{}:*:{}", self.pond_id, self.kind),
        }
    }
}

/// A classified alert. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub pond_id: PondId,
    pub sensor_type: Option<SensorType>,
    pub kind: AlertKind,
    pub severity: Severity,
    /// Human-readable English reason
    pub reason: String,
    /// Localization key selected for notification rendering
    pub message_key: String,
    /// Observed value that triggered the alert, if any
    pub value: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub dedup_key: DedupKey,
}

/// One input to a pond health score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "factor", rename_all = "snake_case")]
pub enum ContributingFactor {
    SubScore {
        sensor_type: SensorType,
        value: f64,
        sub_score: f64,
        weight: f64,
    },
    ActiveAlarm {
        sensor_type: SensorType,
        severity: Severity,
        penalty: f64,
    },
    MissingSeries {
        sensor_type: SensorType,
    },
}

/// Normalized pond health, recomputed on each reading for the pond
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthScore {
    pub pond_id: PondId,
    pub timestamp: DateTime<Utc>,
    /// Score in [0, 100]
    pub score: f64,
    pub grade: String,
    pub status: String,
    pub contributing_factors: Vec<ContributingFactor>,
}

/// Aggregation window size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Granularity::Hour => Duration::hours(1),
            Granularity::Day => Duration::days(1),
        }
    }

    /// Start of the UTC window containing `ts`
    pub fn window_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let width = self.duration().num_seconds();
        let secs = ts.timestamp();
        let start = secs - secs.rem_euclid(width);
        DateTime::from_timestamp(start, 0).unwrap_or(ts)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hour" | "hourly" | "h" => Ok(Granularity::Hour),
            "day" | "daily" | "d" => Ok(Granularity::Day),
            other => Err(format!("unknown granularity: {}", other)),
        }
    }
}

/// Count/sum/min/max summary of a series over one time window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateBucket {
    pub pond_id: PondId,
    pub sensor_type: SensorType,
    pub granularity: Granularity,
    pub bucket_start: DateTime<Utc>,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub closed: bool,
}

impl AggregateBucket {
    /// Open an empty bucket for the window containing `ts`
    pub fn open(series: SeriesKey, granularity: Granularity, ts: DateTime<Utc>) -> Self {
        Self {
            pond_id: series.pond_id,
            sensor_type: series.sensor_type,
            granularity,
            bucket_start: granularity.window_start(ts),
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            closed: false,
        }
    }

    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::new(self.pond_id, self.sensor_type)
    }

    pub fn bucket_end(&self) -> DateTime<Utc> {
        self.bucket_start + self.granularity.duration()
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.bucket_start && ts < self.bucket_end()
    }

    pub fn record(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sensor_type_round_trips_through_str() {
        for sensor in SensorType::ALL {
            assert_eq!(sensor.as_str().parse::<SensorType>().unwrap(), sensor);
        }
        assert!("salinity".parse::<SensorType>().is_err());
    }

    #[test]
    fn test_unit_aliases() {
        assert!(SensorType::Temperature.accepts_unit("°C"));
        assert!(SensorType::Temperature.accepts_unit(" celsius "));
        assert!(SensorType::DissolvedOxygen.accepts_unit("mg/l"));
        assert!(!SensorType::DissolvedOxygen.accepts_unit("°C"));
        assert!(!SensorType::Ph.accepts_unit("NTU"));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn test_window_start_truncates_to_utc_boundaries() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 10, 14, 37, 12).unwrap();
        assert_eq!(
            Granularity::Hour.window_start(ts),
            Utc.with_ymd_and_hms(2024, 3, 10, 14, 0, 0).unwrap()
        );
        assert_eq!(
            Granularity::Day.window_start(ts),
            Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_bucket_record() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 10, 14, 5, 0).unwrap();
        let mut bucket = AggregateBucket::open(
            SeriesKey::new(1, SensorType::Ph),
            Granularity::Hour,
            ts,
        );
        assert!(bucket.mean().is_none());

        bucket.record(7.0);
        bucket.record(8.0);
        bucket.record(6.5);

        assert_eq!(bucket.count, 3);
        assert_eq!(bucket.min, 6.5);
        assert_eq!(bucket.max, 8.0);
        assert!((bucket.mean().unwrap() - 7.1666).abs() < 1e-3);
        assert!(bucket.contains(ts));
        assert!(!bucket.contains(bucket.bucket_end()));
    }

    #[test]
    fn test_dedup_key_display() {
        let key = DedupKey {
            pond_id: 4,
            sensor_type: None,
            kind: AlertKind::HealthScore,
        };
        assert_eq!(key.to_string(), "4:*:health_score");
    }
}
