use std::time::{SystemTime, UNIX_EPOCH};

use opentelemetry::time::now;

/// Most recent sample for one attribute group.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LastValueAccumulation {
    start_time: SystemTime,
    current: f64,
    sample_time: SystemTime,
}

impl LastValueAccumulation {
    pub(crate) fn new(start_time: SystemTime, current: f64, sample_time: SystemTime) -> Self {
        LastValueAccumulation {
            start_time,
            current,
            sample_time,
        }
    }

    pub(crate) fn record(&mut self, value: f64) {
        self.current = value;
        self.sample_time = now();
    }

    pub(crate) fn value(&self) -> f64 {
        self.current
    }

    pub(crate) fn start_time(&self) -> SystemTime {
        self.start_time
    }

    pub(crate) fn set_start_time(&mut self, start_time: SystemTime) {
        self.start_time = start_time;
    }

    /// Keeps the chronologically later sample of the two.
    pub(crate) fn merge(
        previous: &LastValueAccumulation,
        delta: &LastValueAccumulation,
    ) -> LastValueAccumulation {
        let latest = if micros(delta.sample_time) >= micros(previous.sample_time) {
            delta
        } else {
            previous
        };
        LastValueAccumulation::new(previous.start_time, latest.current, latest.sample_time)
    }

    /// Same resolution rule as [`merge`](Self::merge); a gauge has no
    /// meaningful subtraction, the later sample simply wins.
    pub(crate) fn diff(
        previous: &LastValueAccumulation,
        current: &LastValueAccumulation,
    ) -> LastValueAccumulation {
        let latest = if micros(current.sample_time) >= micros(previous.sample_time) {
            current
        } else {
            previous
        };
        LastValueAccumulation::new(current.start_time, latest.current, latest.sample_time)
    }
}

// Compared at microsecond granularity so that sub-microsecond jitter between
// concurrently captured samples does not flip the ordering.
fn micros(time: SystemTime) -> u128 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or(0)
}
