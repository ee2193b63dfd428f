//! Page-Hinkley change detection
//!
//! Runs the one-sided Page-Hinkley test incrementally on a single series:
//! - the running mean is updated first (sample count incremented first)
//! - `U_t` accumulates `x_t - mean_t - delta`
//! - `m_t` tracks the minimum of `U_t` since the last reset
//! - an alarm fires when `U_t - m_t > lambda`, then the state is re-seeded
//!   with the alarming value

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DetectorParams;
use crate::models::{DetectorState, SeriesKey};

/// Detector alarm for one series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePoint {
    pub series: SeriesKey,
    /// Value that triggered the alarm
    pub value: f64,
    /// Running mean just before the reset
    pub mean_before: f64,
    /// Page-Hinkley deviation at alarm time
    pub deviation: f64,
    pub lambda: f64,
    /// Samples accumulated since the previous reset
    pub samples: u64,
    pub timestamp: DateTime<Utc>,
}

impl ChangePoint {
    /// Whether the shift went up or down relative to the old mean
    pub fn is_increase(&self) -> bool {
        self.value > self.mean_before
    }
}

/// Outcome of feeding one value to the detector
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorStep {
    /// No alarm; carries the current deviation
    Steady { deviation: f64 },
    /// Alarm fired and the state was re-seeded
    Alarm(ChangePoint),
    /// State became non-finite and was reset to initial
    Corrupted,
}

/// Page-Hinkley detector bound to one series
#[derive(Debug, Clone)]
pub struct PageHinkley {
    series: SeriesKey,
    params: DetectorParams,
    state: DetectorState,
}

impl PageHinkley {
    /// Create a detector in the initial zero state
    pub fn new(series: SeriesKey, params: DetectorParams) -> Self {
        Self {
            series,
            params,
            state: DetectorState::default(),
        }
    }

    /// Resume from persisted state.
    ///
    /// Returns the detector and whether the recovered state had to be reset
    /// because it contained non-finite statistics.
    pub fn restore(series: SeriesKey, params: DetectorParams, state: DetectorState) -> (Self, bool) {
        if state.is_finite() {
            (Self { series, params, state }, false)
        } else {
            (Self::new(series, params), true)
        }
    }

    pub fn series(&self) -> SeriesKey {
        self.series
    }

    pub fn params(&self) -> DetectorParams {
        self.params
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    /// Feed one finite value in arrival order
    pub fn update(&mut self, value: f64, timestamp: DateTime<Utc>) -> DetectorStep {
        if !self.state.is_finite() {
            self.reset();
            return DetectorStep::Corrupted;
        }

        let state = &mut self.state;
        state.sample_count += 1;
        state.mean += (value - state.mean) / state.sample_count as f64;
        state.cumulative_sum += value - state.mean - self.params.delta;
        state.min_cumulative_sum = state.min_cumulative_sum.min(state.cumulative_sum);

        if !state.is_finite() {
            self.reset();
            return DetectorStep::Corrupted;
        }

        let deviation = state.deviation();
        if deviation > self.params.lambda {
            let change_point = ChangePoint {
                series: self.series,
                value,
                mean_before: state.mean,
                deviation,
                lambda: self.params.lambda,
                samples: state.sample_count,
                timestamp,
            };
            self.reseed(value, timestamp);
            DetectorStep::Alarm(change_point)
        } else {
            DetectorStep::Steady { deviation }
        }
    }

    /// Drop all statistics and start over from the zero state
    pub fn reset(&mut self) {
        self.state = DetectorState::default();
    }

    fn reseed(&mut self, value: f64, timestamp: DateTime<Utc>) {
        self.state = DetectorState {
            mean: value,
            cumulative_sum: 0.0,
            min_cumulative_sum: 0.0,
            sample_count: 1,
            last_alarm_at: Some(timestamp),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SensorType;
    use chrono::{Duration, TimeZone};

    fn detector(delta: f64, lambda: f64) -> PageHinkley {
        PageHinkley::new(
            SeriesKey::new(1, SensorType::Temperature),
            DetectorParams { delta, lambda },
        )
    }

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 6, 0, 0).unwrap() + Duration::minutes(minute)
    }

    #[test]
    fn test_first_sample_never_alarms() {
        let mut ph = detector(0.0, 0.001);
        assert!(matches!(ph.update(1000.0, at(0)), DetectorStep::Steady { .. }));
        assert_eq!(ph.state().sample_count, 1);
        assert_eq!(ph.state().mean, 1000.0);
    }

    #[test]
    fn test_no_alarm_for_noise_below_delta() {
        let mut ph = detector(0.5, 5.0);

        for i in 0..10_000 {
            let noise = ((i * 7) % 5 - 2) as f64 * 0.1;
            let step = ph.update(20.0 + noise, at(i));
            assert!(
                matches!(step, DetectorStep::Steady { .. }),
                "unexpected step at sample {}: {:?}",
                i,
                step
            );
        }
        assert!(ph.state().last_alarm_at.is_none());
    }

    #[test]
    fn test_step_change_alarms_and_resets() {
        let mut ph = detector(0.5, 5.0);
        for i in 0..50 {
            assert!(matches!(ph.update(10.0, at(i)), DetectorStep::Steady { .. }));
        }

        let mut alarm = None;
        for i in 50..60 {
            if let DetectorStep::Alarm(cp) = ph.update(12.0, at(i)) {
                alarm = Some((i, cp));
                break;
            }
        }

        let (index, change_point) = alarm.expect("step change should alarm within 10 samples");
        assert!(change_point.deviation > 5.0);
        assert!(change_point.is_increase());
        assert_eq!(change_point.timestamp, at(index));

        let state = ph.state();
        assert_eq!(state.cumulative_sum, 0.0);
        assert_eq!(state.min_cumulative_sum, 0.0);
        assert_eq!(state.sample_count, 1);
        assert_eq!(state.mean, 12.0);
        assert_eq!(state.last_alarm_at, Some(at(index)));
    }

    #[test]
    fn test_temperature_shift_scenario() {
        let mut ph = detector(0.5, 5.0);
        let values = [25.0, 25.1, 24.9, 25.0, 30.0, 30.2, 30.1];

        let alarms: Vec<usize> = values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| match ph.update(*v, at(i as i64)) {
                DetectorStep::Alarm(_) => Some(i),
                _ => None,
            })
            .collect();

        assert_eq!(alarms, vec![5]);
        assert_eq!(ph.state().sample_count, 2);
        assert_eq!(ph.state().deviation(), 0.0);
    }

    #[test]
    fn test_restore_rejects_non_finite_state() {
        let series = SeriesKey::new(2, SensorType::Ph);
        let params = DetectorParams {
            delta: 0.1,
            lambda: 1.0,
        };
        let corrupt = DetectorState {
            mean: f64::NAN,
            cumulative_sum: 1.0,
            min_cumulative_sum: 0.0,
            sample_count: 12,
            last_alarm_at: None,
        };

        let (ph, reset) = PageHinkley::restore(series, params, corrupt);
        assert!(reset);
        assert_eq!(ph.state(), &DetectorState::default());

        let healthy = DetectorState {
            mean: 7.2,
            sample_count: 3,
            ..DetectorState::default()
        };
        let (ph, reset) = PageHinkley::restore(series, params, healthy.clone());
        assert!(!reset);
        assert_eq!(ph.state(), &healthy);
    }

    #[test]
    fn test_overflowing_state_is_reset() {
        let mut ph = detector(0.5, f64::MAX);
        ph.state.cumulative_sum = f64::MAX;
        ph.state.sample_count = 1;
        ph.state.mean = 0.0;

        assert_eq!(ph.update(1.0e308, at(0)), DetectorStep::Corrupted);
        assert_eq!(ph.state(), &DetectorState::default());
    }
}
