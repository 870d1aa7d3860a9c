use std::time::SystemTime;

/// Running arithmetic total for one attribute group.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SumAccumulation {
    start_time: SystemTime,
    monotonic: bool,
    current: f64,
    reset: bool,
}

impl SumAccumulation {
    pub(crate) fn new(start_time: SystemTime, monotonic: bool, current: f64, reset: bool) -> Self {
        SumAccumulation {
            start_time,
            monotonic,
            current,
            reset,
        }
    }

    /// Adds the value to the running total.
    ///
    /// Negative values on a monotonic sum are dropped without adjusting the
    /// total; the caller has already been warned at the storage boundary.
    pub(crate) fn record(&mut self, value: f64) {
        if self.monotonic && value < 0.0 {
            return;
        }
        self.current += value;
    }

    pub(crate) fn value(&self) -> f64 {
        self.current
    }

    pub(crate) fn reset(&self) -> bool {
        self.reset
    }

    pub(crate) fn start_time(&self) -> SystemTime {
        self.start_time
    }

    pub(crate) fn set_start_time(&mut self, start_time: SystemTime) {
        self.start_time = start_time;
    }

    /// Folds a delta into this accumulation.
    ///
    /// A delta carrying the reset flag replaces the previous total outright;
    /// the reset propagates forward as the new stream origin.
    pub(crate) fn merge(previous: &SumAccumulation, delta: &SumAccumulation) -> SumAccumulation {
        if delta.reset {
            return SumAccumulation::new(delta.start_time, delta.monotonic, delta.current, false);
        }
        SumAccumulation::new(
            previous.start_time,
            previous.monotonic,
            previous.current + delta.current,
            false,
        )
    }

    /// Computes the change between two cumulative readings.
    ///
    /// A monotonic total that moved backwards means the source counter
    /// restarted: the current reading is taken as-is and flagged as a reset
    /// instead of emitting a negative delta.
    pub(crate) fn diff(previous: &SumAccumulation, current: &SumAccumulation) -> SumAccumulation {
        if current.monotonic && previous.current > current.current {
            return SumAccumulation::new(current.start_time, current.monotonic, current.current, true);
        }
        SumAccumulation::new(
            current.start_time,
            current.monotonic,
            current.current - previous.current,
            false,
        )
    }
}
