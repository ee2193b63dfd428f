//! Reading validation gate
//!
//! Every reading passes through [`ReadingValidator::validate`] before it can
//! reach the detectors or the aggregation engine. Rejections are returned to
//! the caller with a specific reason.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::config::EngineConfig;
use crate::models::{Reading, SensorType, ValidReading};

/// Why a reading was refused at the boundary
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectionReason {
    #[error("pond id must be non-zero")]
    InvalidPond,

    #[error("sensor type {0} is not monitored")]
    UnmonitoredSensor(SensorType),

    #[error("value is not a finite number")]
    NonFiniteValue,

    #[error("unit {unit:?} does not match {expected} for {sensor}")]
    UnitMismatch {
        sensor: SensorType,
        unit: String,
        expected: &'static str,
    },

    #[error("value {value} outside physical bounds [{min}, {max}] for {sensor}")]
    OutOfBounds {
        sensor: SensorType,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("timestamp {timestamp} is in the future (now {now})")]
    FutureTimestamp {
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[error("timestamp {timestamp} is older than the retention horizon {horizon}")]
    TooOld {
        timestamp: DateTime<Utc>,
        horizon: DateTime<Utc>,
    },
}

impl RejectionReason {
    /// Stable code used in API responses and metric labels
    pub fn code(&self) -> &'static str {
        match self {
            RejectionReason::InvalidPond => "invalid_pond",
            RejectionReason::UnmonitoredSensor(_) => "unmonitored_sensor",
            RejectionReason::NonFiniteValue => "non_finite_value",
            RejectionReason::UnitMismatch { .. } => "unit_mismatch",
            RejectionReason::OutOfBounds { .. } => "out_of_bounds",
            RejectionReason::FutureTimestamp { .. } => "future_timestamp",
            RejectionReason::TooOld { .. } => "too_old",
        }
    }
}

/// Stateless gate in front of detection and aggregation
#[derive(Debug, Clone)]
pub struct ReadingValidator {
    monitored: Vec<SensorType>,
    clock_skew: Duration,
    retention: Duration,
}

impl ReadingValidator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            monitored: config.sensors.clone(),
            clock_skew: config.retention.clock_skew(),
            retention: config.retention.raw_horizon(),
        }
    }

    pub fn validate(
        &self,
        reading: Reading,
        now: DateTime<Utc>,
    ) -> Result<ValidReading, RejectionReason> {
        let sensor = reading.sensor_type;

        if reading.pond_id == 0 {
            return Err(RejectionReason::InvalidPond);
        }
        if !self.monitored.contains(&sensor) {
            return Err(RejectionReason::UnmonitoredSensor(sensor));
        }
        if !reading.value.is_finite() {
            return Err(RejectionReason::NonFiniteValue);
        }
        if !sensor.accepts_unit(&reading.unit) {
            return Err(RejectionReason::UnitMismatch {
                sensor,
                unit: reading.unit,
                expected: sensor.canonical_unit(),
            });
        }

        let (min, max) = sensor.physical_bounds();
        if reading.value < min || reading.value > max {
            return Err(RejectionReason::OutOfBounds {
                sensor,
                value: reading.value,
                min,
                max,
            });
        }

        let latest = now
            .checked_add_signed(self.clock_skew)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if reading.timestamp > latest {
            return Err(RejectionReason::FutureTimestamp {
                timestamp: reading.timestamp,
                now,
            });
        }
        let horizon = now
            .checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        if reading.timestamp < horizon {
            return Err(RejectionReason::TooOld {
                timestamp: reading.timestamp,
                horizon,
            });
        }

        Ok(ValidReading::new(reading))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::engine_config;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn reading(sensor: SensorType, value: f64, unit: &str) -> Reading {
        Reading {
            pond_id: 1,
            sensor_type: sensor,
            value,
            unit: unit.to_string(),
            timestamp: now(),
        }
    }

    #[test]
    fn test_valid_reading_passes() {
        let validator = ReadingValidator::new(&engine_config());
        let valid = validator
            .validate(reading(SensorType::Temperature, 25.0, "°C"), now())
            .unwrap();
        assert_eq!(valid.value(), 25.0);
        assert_eq!(valid.pond_id(), 1);
    }

    #[test]
    fn test_unit_mismatch_rejected() {
        let validator = ReadingValidator::new(&engine_config());
        let err = validator
            .validate(reading(SensorType::DissolvedOxygen, 6.0, "°C"), now())
            .unwrap_err();
        assert_eq!(err.code(), "unit_mismatch");
    }

    #[test]
    fn test_physical_bounds_are_inclusive() {
        let validator = ReadingValidator::new(&engine_config());
        assert!(validator
            .validate(reading(SensorType::Ph, 14.0, "pH"), now())
            .is_ok());
        assert!(matches!(
            validator.validate(reading(SensorType::Ph, 14.1, "pH"), now()),
            Err(RejectionReason::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_non_finite_rejected_before_bounds() {
        let validator = ReadingValidator::new(&engine_config());
        let err = validator
            .validate(reading(SensorType::Turbidity, f64::NAN, "NTU"), now())
            .unwrap_err();
        assert_eq!(err, RejectionReason::NonFiniteValue);
    }

    #[test]
    fn test_timestamp_window() {
        let validator = ReadingValidator::new(&engine_config());

        let mut skewed = reading(SensorType::Ammonia, 0.1, "mg/L");
        skewed.timestamp = now() + Duration::minutes(4);
        assert!(validator.validate(skewed, now()).is_ok());

        let mut future = reading(SensorType::Ammonia, 0.1, "mg/L");
        future.timestamp = now() + Duration::minutes(10);
        assert_eq!(
            validator.validate(future, now()).unwrap_err().code(),
            "future_timestamp"
        );

        let mut old = reading(SensorType::Ammonia, 0.1, "mg/L");
        old.timestamp = now() - Duration::days(91);
        assert_eq!(validator.validate(old, now()).unwrap_err().code(), "too_old");
    }

    #[test]
    fn test_unmonitored_and_zero_pond() {
        let mut config = engine_config();
        config.sensors = vec![SensorType::Temperature];
        let validator = ReadingValidator::new(&config);

        assert_eq!(
            validator
                .validate(reading(SensorType::Nitrate, 5.0, "mg/L"), now())
                .unwrap_err(),
            RejectionReason::UnmonitoredSensor(SensorType::Nitrate)
        );

        let mut zero = reading(SensorType::Temperature, 25.0, "°C");
        zero.pond_id = 0;
        assert_eq!(
            validator.validate(zero, now()).unwrap_err(),
            RejectionReason::InvalidPond
        );
    }
}
