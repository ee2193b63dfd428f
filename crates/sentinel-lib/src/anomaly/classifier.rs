//! Alert classification with deduplication and escalation
//!
//! Handles:
//! - Mapping detector alarms, limit breaches, health scores and maintenance
//!   events to severity-tagged alerts
//! - Per-key cool-down so a flapping series does not produce alert storms
//! - Immediate escalation when a strictly higher severity arrives

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::ChangePoint;
use crate::config::AlertPolicy;
use crate::models::{Alert, AlertKind, DedupKey, PondId, SensorType, SeriesKey, Severity};

/// Input to the classifier
#[derive(Debug, Clone, PartialEq)]
pub enum AlertEvent {
    /// Detector alarm on one series
    ChangePoint(ChangePoint),
    /// Value outside configured operating limits
    LimitBreach {
        series: SeriesKey,
        value: f64,
        timestamp: DateTime<Utc>,
    },
    /// Recomputed pond health score
    HealthScore {
        pond_id: PondId,
        score: f64,
        timestamp: DateTime<Utc>,
    },
    /// Pond has been silent for longer than the stale threshold
    StaleData {
        pond_id: PondId,
        last_seen: DateTime<Utc>,
    },
    /// Daily buckets for a pond were closed
    DailySummary {
        pond_id: PondId,
        day: DateTime<Utc>,
        series: usize,
        readings: u64,
    },
}

/// Dedup state of one key
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DedupState {
    Inactive,
    Active {
        severity: Severity,
        expires_at: DateTime<Utc>,
    },
}

/// Result of classifying one event
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// A new alert was created
    Emit(Alert),
    /// Event mapped to an active key with equal or lower severity
    Suppressed {
        dedup_key: DedupKey,
        severity: Severity,
        active: Severity,
    },
    /// Event carries nothing alert-worthy (e.g. a healthy score)
    NoAlert,
}

/// Alert attributes before deduplication
struct Candidate {
    pond_id: PondId,
    sensor_type: Option<SensorType>,
    kind: AlertKind,
    severity: Severity,
    reason: String,
    message_key: String,
    value: Option<f64>,
}

impl Candidate {
    fn dedup_key(&self) -> DedupKey {
        DedupKey {
            pond_id: self.pond_id,
            sensor_type: self.sensor_type,
            kind: self.kind,
        }
    }
}

/// Turns events into alerts, holding one dedup state machine per key
pub struct AlertClassifier {
    policy: AlertPolicy,
    states: Mutex<HashMap<DedupKey, DedupState>>,
}

impl AlertClassifier {
    pub fn new(policy: AlertPolicy) -> Self {
        Self {
            policy,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &AlertPolicy {
        &self.policy
    }

    /// Classify an event at `now`
    pub fn classify(&self, event: &AlertEvent, now: DateTime<Utc>) -> Classification {
        let Some(candidate) = self.candidate(event) else {
            return Classification::NoAlert;
        };

        let dedup_key = candidate.dedup_key();
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let state = states.get(&dedup_key).copied().unwrap_or(DedupState::Inactive);

        match state {
            DedupState::Active {
                severity: active,
                expires_at,
            } if now < expires_at && candidate.severity <= active => {
                return Classification::Suppressed {
                    dedup_key,
                    severity: candidate.severity,
                    active,
                };
            }
            _ => {}
        }

        let cooldown = self.policy.cooldown.for_severity(candidate.severity);
        let expires_at = now
            .checked_add_signed(cooldown)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        states.insert(
            dedup_key,
            DedupState::Active {
                severity: candidate.severity,
                expires_at,
            },
        );

        Classification::Emit(Alert {
            id: Uuid::new_v4(),
            pond_id: candidate.pond_id,
            sensor_type: candidate.sensor_type,
            kind: candidate.kind,
            severity: candidate.severity,
            reason: candidate.reason,
            message_key: candidate.message_key,
            value: candidate.value,
            created_at: now,
            dedup_key,
        })
    }

    /// Current state of a dedup key
    pub fn state(&self, key: &DedupKey) -> DedupState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(DedupState::Inactive)
    }

    /// Drop entries whose cool-down has expired; returns how many were removed
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let before = states.len();
        states.retain(|_, state| match state {
            DedupState::Active { expires_at, .. } => now < *expires_at,
            DedupState::Inactive => false,
        });
        before - states.len()
    }

    fn candidate(&self, event: &AlertEvent) -> Option<Candidate> {
        match event {
            AlertEvent::ChangePoint(cp) => {
                let sensor = cp.series.sensor_type;
                let severity = self
                    .policy
                    .change_point_severity(cp.series.pond_id, sensor);
                let direction = if cp.is_increase() { "increase" } else { "decrease" };
                Some(Candidate {
                    pond_id: cp.series.pond_id,
                    sensor_type: Some(sensor),
                    kind: AlertKind::ChangePoint,
                    severity,
                    reason: format!(
                        "Sustained {} in {} detected: {:.2} {} (mean {:.2}, deviation {:.2} > {:.2})",
                        direction,
                        sensor,
                        cp.value,
                        sensor.canonical_unit(),
                        cp.mean_before,
                        cp.deviation,
                        cp.lambda
                    ),
                    message_key: "anomaly_detected".to_string(),
                    value: Some(cp.value),
                })
            }
            AlertEvent::LimitBreach { series, value, .. } => {
                let sensor = series.sensor_type;
                let severity = self.policy.limits.get(&sensor)?.classify(*value)?;
                let high = self
                    .policy
                    .limits
                    .get(&sensor)
                    .and_then(|bands| bands.warning_max.or(bands.critical_max))
                    .map(|max| *value > max)
                    .unwrap_or(false);
                Some(Candidate {
                    pond_id: series.pond_id,
                    sensor_type: Some(sensor),
                    kind: AlertKind::LimitBreach,
                    severity,
                    reason: format!(
                        "{} {} limit breached: {:.2} {}",
                        sensor,
                        severity,
                        value,
                        sensor.canonical_unit()
                    ),
                    message_key: limit_message_key(sensor, severity, high),
                    value: Some(*value),
                })
            }
            AlertEvent::HealthScore { pond_id, score, .. } => {
                let severity = self.policy.health_severity(*score)?;
                Some(Candidate {
                    pond_id: *pond_id,
                    sensor_type: None,
                    kind: AlertKind::HealthScore,
                    severity,
                    reason: format!("Pond health score dropped to {:.1}", score),
                    message_key: format!("health_{}", severity),
                    value: Some(*score),
                })
            }
            AlertEvent::StaleData { pond_id, last_seen } => Some(Candidate {
                pond_id: *pond_id,
                sensor_type: None,
                kind: AlertKind::StaleData,
                severity: Severity::Warning,
                reason: format!("No sensor data received since {}", last_seen.to_rfc3339()),
                message_key: "stale_data".to_string(),
                value: None,
            }),
            AlertEvent::DailySummary {
                pond_id,
                day,
                series,
                readings,
            } => Some(Candidate {
                pond_id: *pond_id,
                sensor_type: None,
                kind: AlertKind::DailySummary,
                severity: Severity::Info,
                reason: format!(
                    "Daily summary for {}: {} readings across {} series",
                    day.format("%Y-%m-%d"),
                    readings,
                    series
                ),
                message_key: "daily_summary".to_string(),
                value: Some(*readings as f64),
            }),
        }
    }
}

fn limit_message_key(sensor: SensorType, severity: Severity, high: bool) -> String {
    let direction = if high { "high" } else { "low" };
    match (severity, sensor) {
        (Severity::Critical, SensorType::Temperature) => format!("critical_temp_{}", direction),
        (Severity::Critical, SensorType::Ph) => format!("critical_ph_{}", direction),
        (Severity::Critical, SensorType::DissolvedOxygen) if !high => {
            "critical_oxygen_low".to_string()
        }
        (Severity::Critical, _) => "critical_generic".to_string(),
        _ => format!("warning_{}", sensor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CooldownPolicy;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    fn classifier() -> AlertClassifier {
        let mut policy = AlertPolicy::default();
        policy.cooldown = CooldownPolicy {
            info_secs: 3600,
            warning_secs: 1800,
            critical_secs: 600,
        };
        AlertClassifier::new(policy)
    }

    fn health(score: f64) -> AlertEvent {
        AlertEvent::HealthScore {
            pond_id: 3,
            score,
            timestamp: t0(),
        }
    }

    fn emitted(classification: Classification) -> Alert {
        match classification {
            Classification::Emit(alert) => alert,
            other => panic!("expected an alert, got {:?}", other),
        }
    }

    #[test]
    fn test_equal_severity_suppressed_within_cooldown() {
        let classifier = classifier();

        let first = emitted(classifier.classify(&health(65.0), t0()));
        assert_eq!(first.severity, Severity::Warning);

        let second = classifier.classify(&health(62.0), t0() + Duration::minutes(5));
        assert!(matches!(
            second,
            Classification::Suppressed {
                severity: Severity::Warning,
                active: Severity::Warning,
                ..
            }
        ));
    }

    #[test]
    fn test_escalation_supersedes_and_restarts_cooldown() {
        let classifier = classifier();
        emitted(classifier.classify(&health(65.0), t0()));

        let escalated = emitted(classifier.classify(&health(40.0), t0() + Duration::minutes(1)));
        assert_eq!(escalated.severity, Severity::Critical);
        assert_eq!(escalated.message_key, "health_critical");

        let key = escalated.dedup_key;
        assert_eq!(
            classifier.state(&key),
            DedupState::Active {
                severity: Severity::Critical,
                expires_at: t0() + Duration::minutes(11),
            }
        );

        // Lower severity stays suppressed while the critical window is active
        assert!(matches!(
            classifier.classify(&health(65.0), t0() + Duration::minutes(5)),
            Classification::Suppressed { .. }
        ));
    }

    #[test]
    fn test_alert_after_cooldown_expiry() {
        let classifier = classifier();
        emitted(classifier.classify(&health(65.0), t0()));

        let later = t0() + Duration::minutes(30);
        let again = emitted(classifier.classify(&health(66.0), later));
        assert_eq!(again.created_at, later);
    }

    #[test]
    fn test_zero_cooldown_never_suppresses() {
        let mut policy = AlertPolicy::default();
        policy.cooldown = CooldownPolicy::uniform(0);
        let classifier = AlertClassifier::new(policy);

        emitted(classifier.classify(&health(40.0), t0()));
        emitted(classifier.classify(&health(40.0), t0()));
    }

    #[test]
    fn test_huge_cooldown_saturates() {
        let mut policy = AlertPolicy::default();
        policy.cooldown = CooldownPolicy::uniform(u64::MAX);
        let classifier = AlertClassifier::new(policy);

        let near_end = DateTime::<Utc>::MAX_UTC - Duration::days(1);
        let alert = emitted(classifier.classify(&health(40.0), near_end));
        assert_eq!(
            classifier.state(&alert.dedup_key),
            DedupState::Active {
                severity: Severity::Critical,
                expires_at: DateTime::<Utc>::MAX_UTC,
            }
        );

        // Still suppressing, not wrapped into the past
        assert!(matches!(
            classifier.classify(&health(40.0), near_end + Duration::hours(1)),
            Classification::Suppressed { .. }
        ));
    }

    #[test]
    fn test_healthy_score_produces_no_alert() {
        let classifier = classifier();
        assert_eq!(classifier.classify(&health(92.0), t0()), Classification::NoAlert);
    }

    #[test]
    fn test_different_kinds_not_deduplicated() {
        let classifier = classifier();
        let series = SeriesKey::new(3, SensorType::DissolvedOxygen);

        let breach = emitted(classifier.classify(
            &AlertEvent::LimitBreach {
                series,
                value: 1.5,
                timestamp: t0(),
            },
            t0(),
        ));
        assert_eq!(breach.severity, Severity::Critical);
        assert_eq!(breach.message_key, "critical_oxygen_low");

        let change = emitted(classifier.classify(
            &AlertEvent::ChangePoint(ChangePoint {
                series,
                value: 1.5,
                mean_before: 6.0,
                deviation: 7.0,
                lambda: 5.0,
                samples: 12,
                timestamp: t0(),
            }),
            t0(),
        ));
        assert_eq!(change.kind, AlertKind::ChangePoint);
        assert_eq!(change.severity, Severity::Critical);
        assert!(change.reason.contains("decrease"));
    }

    #[test]
    fn test_limit_within_bands_is_not_an_alert() {
        let classifier = classifier();
        let event = AlertEvent::LimitBreach {
            series: SeriesKey::new(1, SensorType::Temperature),
            value: 25.0,
            timestamp: t0(),
        };
        assert_eq!(classifier.classify(&event, t0()), Classification::NoAlert);

        let hot = AlertEvent::LimitBreach {
            series: SeriesKey::new(1, SensorType::Temperature),
            value: 36.0,
            timestamp: t0(),
        };
        assert_eq!(
            emitted(classifier.classify(&hot, t0())).message_key,
            "critical_temp_high"
        );
    }

    #[test]
    fn test_prune_expired() {
        let classifier = classifier();
        emitted(classifier.classify(&health(40.0), t0()));
        emitted(classifier.classify(
            &AlertEvent::StaleData {
                pond_id: 9,
                last_seen: t0(),
            },
            t0(),
        ));

        assert_eq!(classifier.prune_expired(t0() + Duration::minutes(15)), 1);
        assert_eq!(classifier.prune_expired(t0() + Duration::hours(1)), 1);
    }
}
