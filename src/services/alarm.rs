//! Size-delta metric and the threshold alarm evaluated over it.
//!
//! Each store event contributes a signed size delta, logged as a structured
//! line and folded into a trailing-window sum. The alarm fires once when
//! the sum rises above the threshold and clears once it falls back.

use crate::models::event::StoreEvent;
use std::{
    collections::VecDeque,
    sync::Mutex,
    time::Duration,
};
use tracing::info;

/// Trailing-window sum of size deltas keyed by unix second.
pub struct SizeDeltaMetric {
    period: i64,
    points: Mutex<VecDeque<(i64, i64)>>,
}

impl SizeDeltaMetric {
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.as_secs().max(1) as i64,
            points: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, timestamp: i64, delta: i64) {
        let mut points = self.points.lock().unwrap_or_else(|e| e.into_inner());
        points.push_back((timestamp, delta));
    }

    /// Sum of deltas recorded in `(now - period, now]`. Points that have
    /// left the window are discarded.
    pub fn window_sum(&self, now: i64) -> i64 {
        let start = now - self.period;
        let mut points = self.points.lock().unwrap_or_else(|e| e.into_inner());
        points.retain(|(ts, _)| *ts > start);
        points
            .iter()
            .filter(|(ts, _)| *ts <= now)
            .map(|(_, delta)| delta)
            .sum()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlarmState {
    Ok,
    Alarm,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlarmTransition {
    Triggered { sum: i64 },
    Cleared { sum: i64 },
}

pub struct SizeAlarm {
    threshold: i64,
    metric: SizeDeltaMetric,
    state: Mutex<AlarmState>,
}

impl SizeAlarm {
    pub fn new(threshold: i64, period: Duration) -> Self {
        Self {
            threshold,
            metric: SizeDeltaMetric::new(period),
            state: Mutex::new(AlarmState::Ok),
        }
    }

    pub fn state(&self) -> AlarmState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Log and record the event's size delta, then re-evaluate.
    pub fn observe(&self, event: &StoreEvent, now: i64) -> Option<AlarmTransition> {
        let delta = event.size_delta();
        info!(object_name = %event.key, size_delta = delta, "size delta");
        self.metric.record(now, delta);
        self.evaluate(now)
    }

    /// Compare the window sum against the threshold and report a state
    /// change, if any.
    pub fn evaluate(&self, now: i64) -> Option<AlarmTransition> {
        let sum = self.metric.window_sum(now);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match (*state, sum > self.threshold) {
            (AlarmState::Ok, true) => {
                *state = AlarmState::Alarm;
                Some(AlarmTransition::Triggered { sum })
            }
            (AlarmState::Alarm, false) => {
                *state = AlarmState::Ok;
                Some(AlarmTransition::Cleared { sum })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alarm() -> SizeAlarm {
        SizeAlarm::new(20, Duration::from_secs(10))
    }

    #[test]
    fn window_drops_old_points() {
        let metric = SizeDeltaMetric::new(Duration::from_secs(10));
        metric.record(100, 19);
        metric.record(105, 28);
        assert_eq!(metric.window_sum(105), 47);
        assert_eq!(metric.window_sum(110), 28);
        assert_eq!(metric.window_sum(115), 0);
    }

    #[test]
    fn fires_once_above_threshold() {
        let alarm = alarm();
        assert_eq!(alarm.observe(&StoreEvent::created("b", "a", 19), 100), None);
        assert_eq!(
            alarm.observe(&StoreEvent::created("b", "b", 28), 105),
            Some(AlarmTransition::Triggered { sum: 47 })
        );
        assert_eq!(alarm.observe(&StoreEvent::created("b", "c", 2), 106), None);
        assert_eq!(alarm.state(), AlarmState::Alarm);
    }

    #[test]
    fn exactly_threshold_does_not_fire() {
        let alarm = alarm();
        assert_eq!(alarm.observe(&StoreEvent::created("b", "a", 20), 100), None);
        assert_eq!(alarm.state(), AlarmState::Ok);
    }

    #[test]
    fn clears_when_a_removal_brings_the_sum_down() {
        let alarm = alarm();
        alarm.observe(&StoreEvent::created("b", "big", 28), 100);
        assert_eq!(alarm.state(), AlarmState::Alarm);

        assert_eq!(
            alarm.observe(&StoreEvent::removed("b", "big", Some(28)), 101),
            Some(AlarmTransition::Cleared { sum: 0 })
        );
    }

    #[test]
    fn clears_when_the_window_moves_on() {
        let alarm = alarm();
        alarm.observe(&StoreEvent::created("b", "big", 28), 100);
        assert_eq!(alarm.evaluate(109), None);
        assert_eq!(
            alarm.evaluate(110),
            Some(AlarmTransition::Cleared { sum: 0 })
        );
    }
}
