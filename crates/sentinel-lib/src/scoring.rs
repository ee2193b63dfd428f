//! Pond health scoring
//!
//! Combines the latest value of every series of a pond with its active
//! detector alarms into a score in `[0, 100]`:
//! - each available sensor gets a sub-score in `[0, 1]` against its ideal range
//! - sub-scores are combined as a weighted mean over available series only
//! - each active alarm subtracts its severity's penalty
//! - the result is clamped and mapped to a letter grade

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{HealthPolicy, HealthRange};
use crate::models::{ContributingFactor, HealthScore, PondId, SensorType, Severity};

/// A detector alarm still counting against a pond's score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActiveAlarm {
    pub sensor_type: SensorType,
    pub severity: Severity,
}

/// Stateless scorer; callers supply the latest values and active alarms
#[derive(Debug, Clone)]
pub struct HealthScorer {
    policy: HealthPolicy,
    monitored: Vec<SensorType>,
}

impl HealthScorer {
    pub fn new(policy: HealthPolicy, monitored: Vec<SensorType>) -> Self {
        Self { policy, monitored }
    }

    pub fn score(
        &self,
        pond_id: PondId,
        latest: &BTreeMap<SensorType, f64>,
        alarms: &[ActiveAlarm],
        timestamp: DateTime<Utc>,
    ) -> HealthScore {
        let mut factors = Vec::new();
        let mut weighted = 0.0;
        let mut total_weight = 0.0;

        for &sensor in &self.monitored {
            let Some(range) = self.policy.ranges.get(&sensor) else {
                continue;
            };
            match latest.get(&sensor) {
                Some(&value) => {
                    let sub_score = sub_score(range, value);
                    weighted += range.weight * sub_score;
                    total_weight += range.weight;
                    factors.push(ContributingFactor::SubScore {
                        sensor_type: sensor,
                        value,
                        sub_score,
                        weight: range.weight,
                    });
                }
                None => factors.push(ContributingFactor::MissingSeries {
                    sensor_type: sensor,
                }),
            }
        }

        let mut score = if total_weight > 0.0 {
            100.0 * weighted / total_weight
        } else {
            0.0
        };

        for alarm in alarms {
            let penalty = self.policy.alarm_penalty.for_severity(alarm.severity);
            score -= penalty;
            factors.push(ContributingFactor::ActiveAlarm {
                sensor_type: alarm.sensor_type,
                severity: alarm.severity,
                penalty,
            });
        }

        let score = score.clamp(0.0, 100.0);
        let (grade, status) = grade(score);

        HealthScore {
            pond_id,
            timestamp,
            score,
            grade: grade.to_string(),
            status: status.to_string(),
            contributing_factors: factors,
        }
    }
}

/// 1.0 inside the ideal range, decaying linearly to 0 at `tolerance` outside it
pub fn sub_score(range: &HealthRange, value: f64) -> f64 {
    let distance = if value < range.ideal_min {
        range.ideal_min - value
    } else if value > range.ideal_max {
        value - range.ideal_max
    } else {
        0.0
    };
    (1.0 - distance / range.tolerance).max(0.0)
}

/// Letter grade and status for a score
pub fn grade(score: f64) -> (&'static str, &'static str) {
    match score {
        s if s >= 90.0 => ("A+", "Excellent"),
        s if s >= 85.0 => ("A", "Very Good"),
        s if s >= 80.0 => ("B+", "Good"),
        s if s >= 75.0 => ("B", "Satisfactory"),
        s if s >= 70.0 => ("C+", "Fair"),
        s if s >= 60.0 => ("C", "Poor"),
        s if s >= 50.0 => ("D", "Very Poor"),
        _ => ("F", "Critical"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn scorer() -> HealthScorer {
        HealthScorer::new(HealthPolicy::default(), SensorType::ALL.to_vec())
    }

    fn ideal() -> BTreeMap<SensorType, f64> {
        BTreeMap::from([
            (SensorType::Temperature, 25.0),
            (SensorType::Ph, 7.5),
            (SensorType::DissolvedOxygen, 8.0),
            (SensorType::Turbidity, 5.0),
            (SensorType::Ammonia, 0.1),
            (SensorType::Nitrate, 10.0),
        ])
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_ideal_pond_scores_100() {
        let health = scorer().score(1, &ideal(), &[], ts());
        assert!((health.score - 100.0).abs() < 1e-9);
        assert_eq!(health.grade, "A+");
        assert_eq!(health.contributing_factors.len(), 6);
    }

    #[test]
    fn test_critical_alarm_lowers_score() {
        let alarm = ActiveAlarm {
            sensor_type: SensorType::DissolvedOxygen,
            severity: Severity::Critical,
        };
        let clean = scorer().score(1, &ideal(), &[], ts());
        let alarmed = scorer().score(1, &ideal(), &[alarm], ts());

        assert!(alarmed.score < clean.score);
        assert!(alarmed
            .contributing_factors
            .iter()
            .any(|f| matches!(f, ContributingFactor::ActiveAlarm { penalty, .. } if *penalty == 25.0)));
    }

    #[test]
    fn test_missing_series_excluded_from_average() {
        let mut latest = ideal();
        latest.remove(&SensorType::Nitrate);
        latest.remove(&SensorType::Ammonia);

        let health = scorer().score(1, &latest, &[], ts());
        assert!((health.score - 100.0).abs() < 1e-9);
        let missing = health
            .contributing_factors
            .iter()
            .filter(|f| matches!(f, ContributingFactor::MissingSeries { .. }))
            .count();
        assert_eq!(missing, 2);
    }

    #[test]
    fn test_score_is_clamped() {
        let latest = BTreeMap::from([(SensorType::DissolvedOxygen, 0.5)]);
        let alarms = vec![
            ActiveAlarm {
                sensor_type: SensorType::DissolvedOxygen,
                severity: Severity::Critical,
            };
            5
        ];

        let health = scorer().score(2, &latest, &alarms, ts());
        assert_eq!(health.score, 0.0);
        assert_eq!(health.grade, "F");
    }

    #[test]
    fn test_no_data_scores_zero() {
        let health = scorer().score(3, &BTreeMap::new(), &[], ts());
        assert_eq!(health.score, 0.0);
    }

    #[test]
    fn test_sub_score_decays_outside_range() {
        let range = HealthRange::new(20.0, 28.0, 6.0, 0.25);
        assert_eq!(sub_score(&range, 24.0), 1.0);
        assert!((sub_score(&range, 31.0) - 0.5).abs() < 1e-9);
        assert_eq!(sub_score(&range, 40.0), 0.0);
        assert!((sub_score(&range, 17.0) - 0.5).abs() < 1e-9);
    }
}
