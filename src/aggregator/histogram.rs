use std::sync::Arc;
use std::time::SystemTime;

/// Bucketed distribution state for one attribute group.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HistogramAccumulation {
    start_time: SystemTime,
    boundaries: Arc<[f64]>,
    record_min_max: bool,
    counts: Vec<u64>,
    count: u64,
    sum: f64,
    has_min_max: bool,
    min: f64,
    max: f64,
}

impl HistogramAccumulation {
    pub(crate) fn new(
        start_time: SystemTime,
        boundaries: Arc<[f64]>,
        record_min_max: bool,
    ) -> Self {
        let counts = vec![0; boundaries.len() + 1];
        HistogramAccumulation {
            start_time,
            boundaries,
            record_min_max,
            counts,
            count: 0,
            sum: 0.0,
            has_min_max: false,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Places the value into its bucket and updates the summary statistics.
    ///
    /// NaN measurements are ignored; they have no position on the bucket axis.
    pub(crate) fn record(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }
        self.count += 1;
        self.sum += value;
        if self.record_min_max {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
            self.has_min_max = true;
        }

        // Bucket i holds values <= boundaries[i]; the final bucket holds
        // everything above the largest boundary.
        let index = self.boundaries.partition_point(|&x| x < value);
        self.counts[index] += 1;
    }

    pub(crate) fn start_time(&self) -> SystemTime {
        self.start_time
    }

    pub(crate) fn set_start_time(&mut self, start_time: SystemTime) {
        self.start_time = start_time;
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    pub(crate) fn sum(&self) -> f64 {
        self.sum
    }

    pub(crate) fn min(&self) -> Option<f64> {
        self.has_min_max.then_some(self.min)
    }

    pub(crate) fn max(&self) -> Option<f64> {
        self.has_min_max.then_some(self.max)
    }

    pub(crate) fn bucket_counts(&self) -> &[u64] {
        &self.counts
    }

    pub(crate) fn merge(
        previous: &HistogramAccumulation,
        delta: &HistogramAccumulation,
    ) -> HistogramAccumulation {
        let counts = previous
            .counts
            .iter()
            .zip(delta.counts.iter())
            .map(|(a, b)| a + b)
            .collect();

        // One-sided min/max survives a merge; only a fully empty pair stays
        // undefined.
        let (has_min_max, min, max) = if previous.has_min_max && delta.has_min_max {
            (true, previous.min.min(delta.min), previous.max.max(delta.max))
        } else if previous.has_min_max {
            (true, previous.min, previous.max)
        } else if delta.has_min_max {
            (true, delta.min, delta.max)
        } else {
            (false, f64::INFINITY, f64::NEG_INFINITY)
        };

        HistogramAccumulation {
            start_time: previous.start_time,
            boundaries: previous.boundaries.clone(),
            record_min_max: previous.record_min_max,
            counts,
            count: previous.count + delta.count,
            sum: previous.sum + delta.sum,
            has_min_max,
            min,
            max,
        }
    }

    /// Subtracts the previous cumulative reading from the current one.
    ///
    /// The min/max of the in-between window cannot be reconstructed from two
    /// cumulative snapshots, so the result always leaves them undefined.
    pub(crate) fn diff(
        previous: &HistogramAccumulation,
        current: &HistogramAccumulation,
    ) -> HistogramAccumulation {
        let counts = current
            .counts
            .iter()
            .zip(previous.counts.iter())
            .map(|(c, p)| c.wrapping_sub(*p))
            .collect();

        HistogramAccumulation {
            start_time: current.start_time,
            boundaries: current.boundaries.clone(),
            record_min_max: current.record_min_max,
            counts,
            count: current.count.wrapping_sub(previous.count),
            sum: current.sum - previous.sum,
            has_min_max: false,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}
