//! Engine configuration
//!
//! Page-Hinkley parameters are safety critical and have no defaults: a
//! monitored sensor without `delta`/`lambda` is rejected at startup. All other
//! sections default to the values the farm deployments run with.

use std::collections::BTreeMap;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Granularity, PondId, SensorType, Severity};

/// Upper bound for every configured duration (ten years)
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Configured seconds as a chrono duration, saturating at [`MAX_DURATION_SECS`]
fn bounded_seconds(secs: u64) -> Duration {
    i64::try_from(secs.min(MAX_DURATION_SECS))
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or_else(|| Duration::seconds(MAX_DURATION_SECS as i64))
}

fn days_to_secs(days: u32) -> u64 {
    u64::from(days) * 24 * 60 * 60
}

/// Configuration errors surfaced at startup
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("no sensor types are monitored")]
    NoSensors,

    #[error("missing Page-Hinkley parameters (delta, lambda) for sensor {0}")]
    MissingDetectorParams(SensorType),

    #[error("invalid delta {value} for sensor {sensor}: must be finite and >= 0")]
    InvalidDelta { sensor: SensorType, value: f64 },

    #[error("invalid lambda {value} for sensor {sensor}: must be finite and > 0")]
    InvalidLambda { sensor: SensorType, value: f64 },

    #[error("missing health range for sensor {0}")]
    MissingHealthRange(SensorType),

    #[error("invalid health range for sensor {sensor}: {reason}")]
    InvalidHealthRange { sensor: SensorType, reason: String },

    #[error("alarm penalties must be positive")]
    InvalidPenalty,

    #[error("health thresholds must satisfy 0 <= critical_below <= warning_below <= 100")]
    InvalidHealthThresholds,

    #[error("invalid limits for sensor {sensor}: {reason}")]
    InvalidLimits { sensor: SensorType, reason: String },

    #[error("at least one aggregation granularity is required")]
    NoGranularities,

    #[error("invalid notification settings: {0}")]
    InvalidNotification(String),

    #[error("{field} of {secs}s exceeds the maximum of {max}s", max = MAX_DURATION_SECS)]
    DurationOutOfRange { field: &'static str, secs: u64 },
}

/// Page-Hinkley tuning for one sensor type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorParams {
    /// Tolerance magnitude subtracted at every step
    pub delta: f64,
    /// Alarm threshold on U_t - m_t
    pub lambda: f64,
}

/// Ideal operating range and weight of a sensor in the health score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthRange {
    pub ideal_min: f64,
    pub ideal_max: f64,
    /// Distance outside the ideal range at which the sub-score reaches zero
    pub tolerance: f64,
    pub weight: f64,
}

impl HealthRange {
    pub const fn new(ideal_min: f64, ideal_max: f64, tolerance: f64, weight: f64) -> Self {
        Self {
            ideal_min,
            ideal_max,
            tolerance,
            weight,
        }
    }
}

/// Score penalty applied per active detector alarm
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlarmPenalty {
    pub warning: f64,
    pub critical: f64,
}

impl AlarmPenalty {
    pub fn for_severity(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Critical => self.critical,
            Severity::Warning | Severity::Info => self.warning,
        }
    }
}

impl Default for AlarmPenalty {
    fn default() -> Self {
        Self {
            warning: 10.0,
            critical: 25.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthPolicy {
    #[serde(default = "default_health_ranges")]
    pub ranges: BTreeMap<SensorType, HealthRange>,
    #[serde(default)]
    pub alarm_penalty: AlarmPenalty,
    /// How long an alarm counts as active for scoring
    #[serde(default = "default_alarm_hold_secs")]
    pub alarm_hold_secs: u64,
}

impl HealthPolicy {
    pub fn alarm_hold(&self) -> Duration {
        bounded_seconds(self.alarm_hold_secs)
    }
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            ranges: default_health_ranges(),
            alarm_penalty: AlarmPenalty::default(),
            alarm_hold_secs: default_alarm_hold_secs(),
        }
    }
}

fn default_health_ranges() -> BTreeMap<SensorType, HealthRange> {
    BTreeMap::from([
        (SensorType::Temperature, HealthRange::new(20.0, 28.0, 6.0, 0.25)),
        (SensorType::Ph, HealthRange::new(6.5, 8.5, 1.0, 0.20)),
        (SensorType::DissolvedOxygen, HealthRange::new(5.0, 12.0, 3.0, 0.30)),
        (SensorType::Turbidity, HealthRange::new(0.0, 10.0, 40.0, 0.10)),
        (SensorType::Ammonia, HealthRange::new(0.0, 0.25, 0.75, 0.10)),
        (SensorType::Nitrate, HealthRange::new(0.0, 20.0, 60.0, 0.05)),
    ])
}

fn default_alarm_hold_secs() -> u64 {
    60 * 60
}

/// Suppression window per severity. Zero disables suppression.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CooldownPolicy {
    pub info_secs: u64,
    pub warning_secs: u64,
    pub critical_secs: u64,
}

impl CooldownPolicy {
    /// A single cool-down applied to every severity
    pub fn uniform(secs: u64) -> Self {
        Self {
            info_secs: secs,
            warning_secs: secs,
            critical_secs: secs,
        }
    }

    pub fn for_severity(&self, severity: Severity) -> Duration {
        let secs = match severity {
            Severity::Info => self.info_secs,
            Severity::Warning => self.warning_secs,
            Severity::Critical => self.critical_secs,
        };
        bounded_seconds(secs)
    }
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            info_secs: 60 * 60,
            warning_secs: 30 * 60,
            critical_secs: 5 * 60,
        }
    }
}

/// Warning and critical bands for direct limit checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitBands {
    pub warning_min: Option<f64>,
    pub warning_max: Option<f64>,
    pub critical_min: Option<f64>,
    pub critical_max: Option<f64>,
}

impl LimitBands {
    /// Severity of a value against these bands, if it breaches any
    pub fn classify(&self, value: f64) -> Option<Severity> {
        let below = |limit: Option<f64>| limit.map(|l| value < l).unwrap_or(false);
        let above = |limit: Option<f64>| limit.map(|l| value > l).unwrap_or(false);

        if below(self.critical_min) || above(self.critical_max) {
            Some(Severity::Critical)
        } else if below(self.warning_min) || above(self.warning_max) {
            Some(Severity::Warning)
        } else {
            None
        }
    }
}

/// Per-pond override of the change-point severity for one sensor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityOverride {
    pub pond_id: PondId,
    pub sensor_type: SensorType,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPolicy {
    #[serde(default)]
    pub cooldown: CooldownPolicy,
    #[serde(default = "default_change_point_severity")]
    pub change_point_severity: BTreeMap<SensorType, Severity>,
    #[serde(default)]
    pub pond_overrides: Vec<SeverityOverride>,
    #[serde(default = "default_limits")]
    pub limits: BTreeMap<SensorType, LimitBands>,
    #[serde(default = "default_health_warning_below")]
    pub health_warning_below: f64,
    #[serde(default = "default_health_critical_below")]
    pub health_critical_below: f64,
    /// A pond silent for this long raises a stale-data alert
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl AlertPolicy {
    /// Severity of a detector alarm for this pond and sensor
    pub fn change_point_severity(&self, pond_id: PondId, sensor: SensorType) -> Severity {
        self.pond_overrides
            .iter()
            .find(|o| o.pond_id == pond_id && o.sensor_type == sensor)
            .map(|o| o.severity)
            .or_else(|| self.change_point_severity.get(&sensor).copied())
            .unwrap_or(Severity::Warning)
    }

    /// Severity of a health score, if it falls below a threshold
    pub fn health_severity(&self, score: f64) -> Option<Severity> {
        if score < self.health_critical_below {
            Some(Severity::Critical)
        } else if score < self.health_warning_below {
            Some(Severity::Warning)
        } else {
            None
        }
    }

    pub fn stale_after(&self) -> Duration {
        bounded_seconds(self.stale_after_secs)
    }
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            cooldown: CooldownPolicy::default(),
            change_point_severity: default_change_point_severity(),
            pond_overrides: Vec::new(),
            limits: default_limits(),
            health_warning_below: default_health_warning_below(),
            health_critical_below: default_health_critical_below(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

fn default_change_point_severity() -> BTreeMap<SensorType, Severity> {
    BTreeMap::from([(SensorType::DissolvedOxygen, Severity::Critical)])
}

fn default_limits() -> BTreeMap<SensorType, LimitBands> {
    let bands = |warning_min, warning_max, critical_min, critical_max| LimitBands {
        warning_min,
        warning_max,
        critical_min,
        critical_max,
    };
    BTreeMap::from([
        (
            SensorType::Temperature,
            bands(Some(18.0), Some(30.0), Some(15.0), Some(35.0)),
        ),
        (SensorType::Ph, bands(Some(6.0), Some(9.0), Some(5.5), Some(9.5))),
        (
            SensorType::DissolvedOxygen,
            bands(Some(3.0), Some(15.0), Some(2.0), Some(20.0)),
        ),
        (SensorType::Turbidity, bands(None, Some(25.0), None, Some(50.0))),
        (SensorType::Ammonia, bands(None, Some(0.5), None, Some(1.0))),
        (SensorType::Nitrate, bands(None, Some(40.0), None, Some(80.0))),
    ])
}

fn default_health_warning_below() -> f64 {
    70.0
}

fn default_health_critical_below() -> f64 {
    50.0
}

fn default_stale_after_secs() -> u64 {
    60 * 60
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationConfig {
    #[serde(default = "default_granularities")]
    pub granularities: Vec<Granularity>,
    /// Cadence of the maintenance pass (bucket close, purge, checkpoints)
    #[serde(default = "default_close_interval_secs")]
    pub close_interval_secs: u64,
    /// Grace period after a window ends before it is closed
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
}

impl AggregationConfig {
    pub fn close_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.close_interval_secs.clamp(1, MAX_DURATION_SECS))
    }

    pub fn grace(&self) -> Duration {
        bounded_seconds(self.grace_secs)
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            granularities: default_granularities(),
            close_interval_secs: default_close_interval_secs(),
            grace_secs: default_grace_secs(),
        }
    }
}

fn default_granularities() -> Vec<Granularity> {
    vec![Granularity::Hour, Granularity::Day]
}

fn default_close_interval_secs() -> u64 {
    60
}

fn default_grace_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Readings older than this are rejected at ingestion
    #[serde(default = "default_raw_days")]
    pub raw_days: u32,
    /// Closed buckets older than this are purged
    #[serde(default = "default_aggregate_days")]
    pub aggregate_days: u32,
    /// Tolerated clock skew for readings stamped in the future
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: u64,
}

impl RetentionConfig {
    pub fn raw_horizon(&self) -> Duration {
        bounded_seconds(days_to_secs(self.raw_days))
    }

    pub fn aggregate_horizon(&self) -> Duration {
        bounded_seconds(days_to_secs(self.aggregate_days))
    }

    pub fn clock_skew(&self) -> Duration {
        bounded_seconds(self.clock_skew_secs)
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            raw_days: default_raw_days(),
            aggregate_days: default_aggregate_days(),
            clock_skew_secs: default_clock_skew_secs(),
        }
    }
}

fn default_raw_days() -> u32 {
    90
}

fn default_aggregate_days() -> u32 {
    730
}

fn default_clock_skew_secs() -> u64 {
    5 * 60
}

/// Notification recipient, optionally bound to one pond
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientConfig {
    #[serde(default)]
    pub pond_id: Option<PondId>,
    pub address: String,
}

/// Preferred locale of a pond's operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PondLocale {
    pub pond_id: PondId,
    pub locale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_locale")]
    pub default_locale: String,
    #[serde(default)]
    pub pond_locales: Vec<PondLocale>,
    #[serde(default)]
    pub recipients: Vec<RecipientConfig>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Webhook endpoint; notifications are only logged when unset
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl NotificationConfig {
    pub fn initial_backoff(&self) -> StdDuration {
        StdDuration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> StdDuration {
        StdDuration::from_millis(self.max_backoff_ms)
    }

    pub fn locale_for(&self, pond_id: PondId) -> &str {
        self.pond_locales
            .iter()
            .find(|p| p.pond_id == pond_id)
            .map(|p| p.locale.as_str())
            .unwrap_or(&self.default_locale)
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            default_locale: default_locale(),
            pond_locales: Vec::new(),
            recipients: Vec::new(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            queue_size: default_queue_size(),
            max_in_flight: default_max_in_flight(),
            webhook_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_locale() -> String {
    "en".to_string()
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_queue_size() -> usize {
    256
}

fn default_max_in_flight() -> usize {
    4
}

fn default_request_timeout_secs() -> u64 {
    10
}

/// Complete configuration of the detection and alerting engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_sensors")]
    pub sensors: Vec<SensorType>,
    pub detectors: BTreeMap<SensorType, DetectorParams>,
    #[serde(default)]
    pub health: HealthPolicy,
    #[serde(default)]
    pub alerts: AlertPolicy,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

fn default_sensors() -> Vec<SensorType> {
    SensorType::ALL.to_vec()
}

impl EngineConfig {
    /// Configuration with the given detector parameters and default policies
    pub fn new(detectors: BTreeMap<SensorType, DetectorParams>) -> Self {
        Self {
            sensors: default_sensors(),
            detectors,
            health: HealthPolicy::default(),
            alerts: AlertPolicy::default(),
            aggregation: AggregationConfig::default(),
            retention: RetentionConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }

    pub fn is_monitored(&self, sensor: SensorType) -> bool {
        self.sensors.contains(&sensor)
    }

    pub fn detector_params(&self, sensor: SensorType) -> Option<DetectorParams> {
        self.detectors.get(&sensor).copied()
    }

    /// Check the configuration for every monitored sensor
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sensors.is_empty() {
            return Err(ConfigError::NoSensors);
        }

        for &sensor in &self.sensors {
            let params = self
                .detectors
                .get(&sensor)
                .ok_or(ConfigError::MissingDetectorParams(sensor))?;
            if !params.delta.is_finite() || params.delta < 0.0 {
                return Err(ConfigError::InvalidDelta {
                    sensor,
                    value: params.delta,
                });
            }
            if !params.lambda.is_finite() || params.lambda <= 0.0 {
                return Err(ConfigError::InvalidLambda {
                    sensor,
                    value: params.lambda,
                });
            }

            let range = self
                .health
                .ranges
                .get(&sensor)
                .ok_or(ConfigError::MissingHealthRange(sensor))?;
            validate_health_range(sensor, range)?;

            if let Some(bands) = self.alerts.limits.get(&sensor) {
                validate_limits(sensor, bands)?;
            }
        }

        let penalty = &self.health.alarm_penalty;
        if !(penalty.warning > 0.0 && penalty.critical > 0.0) {
            return Err(ConfigError::InvalidPenalty);
        }

        let alerts = &self.alerts;
        if !(0.0 <= alerts.health_critical_below
            && alerts.health_critical_below <= alerts.health_warning_below
            && alerts.health_warning_below <= 100.0)
        {
            return Err(ConfigError::InvalidHealthThresholds);
        }

        if self.aggregation.granularities.is_empty() {
            return Err(ConfigError::NoGranularities);
        }

        self.validate_durations()?;

        let notifications = &self.notifications;
        if notifications.max_attempts == 0 {
            return Err(ConfigError::InvalidNotification(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if notifications.queue_size == 0 || notifications.max_in_flight == 0 {
            return Err(ConfigError::InvalidNotification(
                "queue_size and max_in_flight must be at least 1".to_string(),
            ));
        }
        if notifications.default_locale.trim().is_empty() {
            return Err(ConfigError::InvalidNotification(
                "default_locale must not be empty".to_string(),
            ));
        }
        if let Some(ref url) = notifications.webhook_url {
            url::Url::parse(url).map_err(|e| {
                ConfigError::InvalidNotification(format!("webhook_url {}: {}", url, e))
            })?;
        }

        Ok(())
    }

    fn validate_durations(&self) -> Result<(), ConfigError> {
        let cooldown = &self.alerts.cooldown;
        let retention = &self.retention;
        let notifications = &self.notifications;
        let durations = [
            ("health.alarm_hold_secs", self.health.alarm_hold_secs),
            ("alerts.cooldown.info_secs", cooldown.info_secs),
            ("alerts.cooldown.warning_secs", cooldown.warning_secs),
            ("alerts.cooldown.critical_secs", cooldown.critical_secs),
            ("alerts.stale_after_secs", self.alerts.stale_after_secs),
            ("aggregation.close_interval_secs", self.aggregation.close_interval_secs),
            ("aggregation.grace_secs", self.aggregation.grace_secs),
            ("retention.raw_days", days_to_secs(retention.raw_days)),
            ("retention.aggregate_days", days_to_secs(retention.aggregate_days)),
            ("retention.clock_skew_secs", retention.clock_skew_secs),
            ("notifications.max_backoff_ms", notifications.max_backoff_ms / 1000),
            ("notifications.request_timeout_secs", notifications.request_timeout_secs),
        ];

        match durations.into_iter().find(|(_, secs)| *secs > MAX_DURATION_SECS) {
            Some((field, secs)) => Err(ConfigError::DurationOutOfRange { field, secs }),
            None => Ok(()),
        }
    }
}

fn validate_health_range(sensor: SensorType, range: &HealthRange) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidHealthRange {
        sensor,
        reason: reason.to_string(),
    };

    if !(range.ideal_min.is_finite() && range.ideal_max.is_finite()) {
        return Err(invalid("bounds must be finite"));
    }
    if range.ideal_min > range.ideal_max {
        return Err(invalid("ideal_min is greater than ideal_max"));
    }
    if !(range.tolerance.is_finite() && range.tolerance > 0.0) {
        return Err(invalid("tolerance must be positive"));
    }
    if !(range.weight.is_finite() && range.weight > 0.0) {
        return Err(invalid("weight must be positive"));
    }
    Ok(())
}

fn validate_limits(sensor: SensorType, bands: &LimitBands) -> Result<(), ConfigError> {
    let ordered = |low: Option<f64>, high: Option<f64>| match (low, high) {
        (Some(l), Some(h)) => l <= h,
        _ => true,
    };

    if !ordered(bands.critical_min, bands.warning_min)
        || !ordered(bands.warning_max, bands.critical_max)
        || !ordered(bands.warning_min, bands.warning_max)
    {
        return Err(ConfigError::InvalidLimits {
            sensor,
            reason: "bands must nest: critical_min <= warning_min <= warning_max <= critical_max"
                .to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Parameters used across the engine tests
    pub fn detector_params() -> BTreeMap<SensorType, DetectorParams> {
        SensorType::ALL
            .iter()
            .map(|&sensor| {
                (
                    sensor,
                    DetectorParams {
                        delta: 0.5,
                        lambda: 5.0,
                    },
                )
            })
            .collect()
    }

    pub fn engine_config() -> EngineConfig {
        EngineConfig::new(detector_params())
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_default_policies_validate() {
        assert_eq!(engine_config().validate(), Ok(()));
    }

    #[test]
    fn test_missing_detector_params_is_fatal() {
        let mut config = engine_config();
        config.detectors.remove(&SensorType::Ammonia);

        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingDetectorParams(SensorType::Ammonia))
        );
    }

    #[test]
    fn test_unmonitored_sensor_needs_no_params() {
        let mut config = engine_config();
        config.detectors.remove(&SensorType::Nitrate);
        config.sensors.retain(|s| *s != SensorType::Nitrate);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_lambda_rejected() {
        let mut config = engine_config();
        config.detectors.insert(
            SensorType::Ph,
            DetectorParams {
                delta: 0.1,
                lambda: 0.0,
            },
        );

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLambda { sensor: SensorType::Ph, .. })
        ));
    }

    #[test]
    fn test_deserialize_requires_detectors() {
        let json = r#"{ "sensors": ["temperature"] }"#;
        assert!(serde_json::from_str::<EngineConfig>(json).is_err());

        let json = r#"{
            "sensors": ["temperature"],
            "detectors": { "temperature": { "delta": 0.5, "lambda": 5.0 } }
        }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.aggregation.granularities.len(), 2);
    }

    #[test]
    fn test_change_point_severity_override() {
        let mut policy = AlertPolicy::default();
        assert_eq!(
            policy.change_point_severity(1, SensorType::DissolvedOxygen),
            Severity::Critical
        );
        assert_eq!(
            policy.change_point_severity(1, SensorType::Temperature),
            Severity::Warning
        );

        policy.pond_overrides.push(SeverityOverride {
            pond_id: 7,
            sensor_type: SensorType::Temperature,
            severity: Severity::Critical,
        });
        assert_eq!(
            policy.change_point_severity(7, SensorType::Temperature),
            Severity::Critical
        );
        assert_eq!(
            policy.change_point_severity(1, SensorType::Temperature),
            Severity::Warning
        );
    }

    #[test]
    fn test_limit_bands() {
        let policy = AlertPolicy::default();
        let oxygen = policy.limits[&SensorType::DissolvedOxygen];
        assert_eq!(oxygen.classify(1.5), Some(Severity::Critical));
        assert_eq!(oxygen.classify(2.5), Some(Severity::Warning));
        assert_eq!(oxygen.classify(7.0), None);
    }

    #[test]
    fn test_oversized_cooldown_rejected() {
        let mut config = engine_config();
        config.alerts.cooldown = CooldownPolicy::uniform(10_000_000_000_000);

        assert_eq!(
            config.validate(),
            Err(ConfigError::DurationOutOfRange {
                field: "alerts.cooldown.info_secs",
                secs: 10_000_000_000_000,
            })
        );
    }

    #[test]
    fn test_oversized_retention_rejected() {
        let mut config = engine_config();
        config.retention.raw_days = u32::MAX;

        assert!(matches!(
            config.validate(),
            Err(ConfigError::DurationOutOfRange {
                field: "retention.raw_days",
                ..
            })
        ));

        let mut config = engine_config();
        config.retention.aggregate_days = 3650;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_durations_saturate_instead_of_wrapping() {
        let cooldown = CooldownPolicy::uniform(u64::MAX);
        let secs = cooldown.for_severity(Severity::Warning).num_seconds();
        assert_eq!(secs, MAX_DURATION_SECS as i64);

        let retention = RetentionConfig {
            raw_days: u32::MAX,
            ..RetentionConfig::default()
        };
        assert!(retention.raw_horizon() > Duration::zero());
    }

    #[test]
    fn test_uniform_cooldown() {
        let cooldown = CooldownPolicy::uniform(600);
        assert_eq!(cooldown.for_severity(Severity::Info), Duration::minutes(10));
        assert_eq!(cooldown.for_severity(Severity::Critical), Duration::minutes(10));
    }
}
