use std::mem::replace;
use std::sync::Mutex;
use std::time::SystemTime;

use opentelemetry::KeyValue;

use crate::aggregator::{Accumulation, Aggregator};
use crate::attributes::{canonicalize, overflow_attributes, AttributeMap};

/// Accumulates measurements for one stream between collections.
///
/// Synchronous instruments land in [`record`](Self::record); observable
/// instruments report absolute readings through
/// [`batch_cumulate`](Self::batch_cumulate), which turns them into deltas by
/// diffing against the previously memoized reading per attribute set.
pub(crate) struct DeltaMetricProcessor {
    aggregator: Aggregator,
    cardinality_limit: usize,
    inner: Mutex<DeltaStorage>,
}

#[derive(Default)]
struct DeltaStorage {
    /// Uncollected delta accumulations since the last `collect`.
    active: AttributeMap<Accumulation>,
    /// Last raw cumulative reading per attribute set, async path only.
    cumulative_memo: AttributeMap<Accumulation>,
}

impl DeltaMetricProcessor {
    pub(crate) fn new(aggregator: Aggregator, cardinality_limit: usize) -> Self {
        DeltaMetricProcessor {
            aggregator,
            cardinality_limit,
            inner: Mutex::new(DeltaStorage::default()),
        }
    }

    /// Whether creating one more tracked attribute set would exceed the
    /// limit. The final slot is reserved for the overflow series itself.
    fn at_capacity(&self, tracked: usize) -> bool {
        tracked >= self.cardinality_limit.saturating_sub(1)
    }

    pub(crate) fn record(&self, value: f64, attributes: &[KeyValue], collection_time: SystemTime) {
        let (key, attributes) = canonicalize(attributes);
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };

        if let Some(accumulation) = inner.active.get_mut(&key) {
            accumulation.record(value);
            return;
        }

        if self.at_capacity(inner.active.len()) {
            let overflow = inner.active.get_or_insert_with(&overflow_attributes(), || {
                self.aggregator.create_accumulation(collection_time)
            });
            overflow.record(value);
            return;
        }

        let mut accumulation = self.aggregator.create_accumulation(collection_time);
        accumulation.record(value);
        inner.active.set_canonical(key, attributes, accumulation);
    }

    /// Folds a full cycle of absolute observations into the active deltas.
    ///
    /// Per attribute set: build an accumulation from the raw reading, diff it
    /// against the memoized previous reading if one exists, merge the result
    /// into any not-yet-collected delta for the set, then overwrite both the
    /// memo and the active entry. Attribute sets beyond the cardinality limit
    /// alias into the overflow series.
    pub(crate) fn batch_cumulate(
        &self,
        measurements: AttributeMap<f64>,
        collection_time: SystemTime,
    ) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };

        for (key, attributes, value) in measurements.into_entries() {
            let mut raw = self.aggregator.create_accumulation(collection_time);
            raw.record(value);

            let mut key = key;
            let mut attributes = attributes;
            let mut delta = raw.clone();
            if let Some(previous) = inner.cumulative_memo.get(&key) {
                delta = self.aggregator.diff(previous, &raw);
            } else if self.at_capacity(inner.cumulative_memo.len()) {
                (key, attributes) = canonicalize(&overflow_attributes());
                if let Some(previous) = inner.cumulative_memo.get(&key) {
                    delta = self.aggregator.diff(previous, &raw);
                }
            }

            if let Some(active) = inner.active.get(&key) {
                delta = self.aggregator.merge(active, &delta);
            }

            inner
                .cumulative_memo
                .set_canonical(key.clone(), attributes.clone(), raw);
            inner.active.set_canonical(key, attributes, delta);
        }
    }

    /// Takes the accumulations gathered since the previous call, leaving a
    /// fresh window behind.
    ///
    /// This is the only mutating read; callers serialize it per storage.
    pub(crate) fn collect(&self) -> AttributeMap<Accumulation> {
        self.inner
            .lock()
            .map(|mut inner| replace(&mut inner.active, AttributeMap::new()))
            .unwrap_or_default()
    }
}
