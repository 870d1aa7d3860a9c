use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

use crate::aggregator::{Accumulation, Aggregator};
use crate::attributes::AttributeMap;
use crate::data::{MetricData, Temporality};
use crate::instrument::InstrumentDescriptor;
use crate::reader::{CollectorHandle, MetricCollector};

/// Converts a stream of delta snapshots into the temporality each reader
/// asked for.
///
/// Readers collect at independent cadences, so every delta snapshot handed in
/// is first stashed for all of them; a reader with a long export period must
/// not lose measurements recorded between its own collections just because a
/// faster reader collected in the meantime.
pub(crate) struct TemporalMetricProcessor {
    aggregator: Aggregator,
    inner: Mutex<TemporalState>,
}

#[derive(Default)]
struct TemporalState {
    /// Merged-but-not-yet-reported accumulations, per reader.
    unreported: HashMap<CollectorHandle, Vec<AttributeMap<Accumulation>>>,
    /// What each reader saw at its previous collection.
    report_history: HashMap<CollectorHandle, LastReportedHistory>,
}

struct LastReportedHistory {
    /// The last accumulations handed to the reader.
    accumulations: AttributeMap<Accumulation>,
    /// When the last collection happened.
    collection_time: SystemTime,
    /// The temporality the reader chose at its first collection; fixed for
    /// the reader's lifetime.
    temporality: Temporality,
}

impl TemporalMetricProcessor {
    pub(crate) fn new(aggregator: Aggregator, collectors: &[CollectorHandle]) -> Self {
        let unreported = collectors
            .iter()
            .map(|handle| (*handle, Vec::new()))
            .collect();
        TemporalMetricProcessor {
            aggregator,
            inner: Mutex::new(TemporalState {
                unreported,
                report_history: HashMap::new(),
            }),
        }
    }

    /// Produces this reader's view of the stream for one collection cycle.
    pub(crate) fn build_metrics(
        &self,
        collector: &MetricCollector,
        descriptor: &InstrumentDescriptor,
        current: AttributeMap<Accumulation>,
        collection_time: SystemTime,
    ) -> Option<MetricData> {
        let Ok(mut inner) = self.inner.lock() else {
            return None;
        };

        // Every registered reader gets its own copy of this snapshot.
        for stash in inner.unreported.values_mut() {
            stash.push(current.clone());
        }

        let unreported = inner
            .unreported
            .get_mut(&collector.handle())
            .map(std::mem::take)
            .unwrap_or_default();
        let mut merged = AttributeMap::new();
        for snapshot in unreported {
            merged = merge_maps(merged, snapshot, &self.aggregator);
        }

        let (result, temporality) = match inner.report_history.get(&collector.handle()) {
            Some(last) => {
                let temporality = last.temporality;
                let result = match temporality {
                    Temporality::Cumulative => {
                        // Fold the new delta into the running total.
                        merge_maps(last.accumulations.clone(), merged, &self.aggregator)
                    }
                    Temporality::Delta => {
                        // Pin start times so consecutive windows tile without
                        // gaps; groups absent from the current window simply
                        // do not carry over.
                        calibrate_start_time(&last.accumulations, merged, last.collection_time)
                    }
                };
                (result, temporality)
            }
            None => (
                merged,
                collector.select_aggregation_temporality(descriptor.kind()),
            ),
        };

        inner.report_history.insert(
            collector.handle(),
            LastReportedHistory {
                accumulations: result.clone(),
                collection_time,
                temporality,
            },
        );

        if result.is_empty() {
            return None;
        }
        self.aggregator
            .to_metric_data(descriptor, temporality, &result, collection_time)
    }
}

fn merge_maps(
    mut base: AttributeMap<Accumulation>,
    incoming: AttributeMap<Accumulation>,
    aggregator: &Aggregator,
) -> AttributeMap<Accumulation> {
    for (key, attributes, accumulation) in incoming.into_entries() {
        let merged = match base.get(&key) {
            Some(previous) => aggregator.merge(previous, &accumulation),
            None => accumulation,
        };
        base.set_canonical(key, attributes, merged);
    }
    base
}

fn calibrate_start_time(
    last: &AttributeMap<Accumulation>,
    mut current: AttributeMap<Accumulation>,
    last_collection_time: SystemTime,
) -> AttributeMap<Accumulation> {
    for key in last.keys() {
        if let Some(accumulation) = current.get_mut(key) {
            accumulation.set_start_time(last_collection_time);
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MetricPoints;
    use crate::instrument::{InstrumentKind, ValueType};
    use crate::reader::MetricReader;
    use opentelemetry::time::now;
    use opentelemetry::KeyValue;
    use std::sync::Arc;

    struct FixedReader(Temporality);

    impl MetricReader for FixedReader {
        fn temporality(&self, _kind: InstrumentKind) -> Temporality {
            self.0
        }
    }

    fn collector(index: usize, temporality: Temporality) -> MetricCollector {
        MetricCollector::new(CollectorHandle(index), Arc::new(FixedReader(temporality)))
    }

    fn delta_snapshot(aggregator: &Aggregator, value: f64) -> AttributeMap<Accumulation> {
        let mut snapshot = AttributeMap::new();
        let mut accumulation = aggregator.create_accumulation(now());
        accumulation.record(value);
        snapshot.set(&[KeyValue::new("a", 1)], accumulation);
        snapshot
    }

    fn sum_values(data: &MetricData) -> Vec<f64> {
        match &data.points {
            MetricPoints::Sum { data_points, .. } => data_points.iter().map(|p| p.value).collect(),
            other => panic!("unexpected points: {other:?}"),
        }
    }

    #[test]
    fn cumulative_reader_sees_running_totals() {
        let aggregator = Aggregator::Sum { monotonic: true };
        let descriptor = InstrumentDescriptor::new("c", InstrumentKind::Counter, ValueType::Int);
        let cumulative = collector(0, Temporality::Cumulative);
        let processor = TemporalMetricProcessor::new(aggregator.clone(), &[cumulative.handle()]);

        let first = processor
            .build_metrics(&cumulative, &descriptor, delta_snapshot(&aggregator, 3.0), now())
            .unwrap();
        assert_eq!(sum_values(&first), vec![3.0]);

        let second = processor
            .build_metrics(&cumulative, &descriptor, delta_snapshot(&aggregator, 4.0), now())
            .unwrap();
        assert_eq!(sum_values(&second), vec![7.0]);
    }

    #[test]
    fn delta_reader_sees_window_totals() {
        let aggregator = Aggregator::Sum { monotonic: true };
        let descriptor = InstrumentDescriptor::new("c", InstrumentKind::Counter, ValueType::Int);
        let delta = collector(0, Temporality::Delta);
        let processor = TemporalMetricProcessor::new(aggregator.clone(), &[delta.handle()]);

        let first = processor
            .build_metrics(&delta, &descriptor, delta_snapshot(&aggregator, 3.0), now())
            .unwrap();
        assert_eq!(sum_values(&first), vec![3.0]);

        let second = processor
            .build_metrics(&delta, &descriptor, delta_snapshot(&aggregator, 4.0), now())
            .unwrap();
        assert_eq!(sum_values(&second), vec![4.0]);
    }

    #[test]
    fn delta_windows_tile_without_gaps() {
        let aggregator = Aggregator::Sum { monotonic: true };
        let descriptor = InstrumentDescriptor::new("c", InstrumentKind::Counter, ValueType::Int);
        let delta = collector(0, Temporality::Delta);
        let processor = TemporalMetricProcessor::new(aggregator.clone(), &[delta.handle()]);

        let first_collection_time = now();
        processor
            .build_metrics(
                &delta,
                &descriptor,
                delta_snapshot(&aggregator, 3.0),
                first_collection_time,
            )
            .unwrap();

        let second = processor
            .build_metrics(&delta, &descriptor, delta_snapshot(&aggregator, 4.0), now())
            .unwrap();
        match &second.points {
            MetricPoints::Sum { data_points, .. } => {
                assert_eq!(data_points[0].start_time, first_collection_time);
            }
            other => panic!("unexpected points: {other:?}"),
        }
    }

    #[test]
    fn empty_result_produces_no_metric_data() {
        let aggregator = Aggregator::Sum { monotonic: true };
        let descriptor = InstrumentDescriptor::new("c", InstrumentKind::Counter, ValueType::Int);
        let delta = collector(0, Temporality::Delta);
        let processor = TemporalMetricProcessor::new(aggregator.clone(), &[delta.handle()]);

        processor
            .build_metrics(&delta, &descriptor, delta_snapshot(&aggregator, 3.0), now())
            .unwrap();
        assert!(processor
            .build_metrics(&delta, &descriptor, AttributeMap::new(), now())
            .is_none());
    }

    #[test]
    fn slow_reader_keeps_measurements_from_missed_windows() {
        let aggregator = Aggregator::Sum { monotonic: true };
        let descriptor = InstrumentDescriptor::new("c", InstrumentKind::Counter, ValueType::Int);
        let fast = collector(0, Temporality::Delta);
        let slow = collector(1, Temporality::Delta);
        let processor =
            TemporalMetricProcessor::new(aggregator.clone(), &[fast.handle(), slow.handle()]);

        // The fast reader collects twice before the slow one shows up.
        processor.build_metrics(&fast, &descriptor, delta_snapshot(&aggregator, 3.0), now());
        processor.build_metrics(&fast, &descriptor, delta_snapshot(&aggregator, 4.0), now());

        let slow_view = processor
            .build_metrics(&slow, &descriptor, AttributeMap::new(), now())
            .unwrap();
        assert_eq!(sum_values(&slow_view), vec![7.0]);
    }

    #[test]
    fn readers_with_different_temporalities_stay_independent() {
        let aggregator = Aggregator::Sum { monotonic: true };
        let descriptor = InstrumentDescriptor::new("c", InstrumentKind::Counter, ValueType::Int);
        let delta = collector(0, Temporality::Delta);
        let cumulative = collector(1, Temporality::Cumulative);
        let processor =
            TemporalMetricProcessor::new(aggregator.clone(), &[delta.handle(), cumulative.handle()]);

        for value in [3.0, 4.0] {
            let snapshot = delta_snapshot(&aggregator, value);
            let delta_view = processor
                .build_metrics(&delta, &descriptor, snapshot, now())
                .unwrap();
            assert_eq!(sum_values(&delta_view), vec![value]);

            let cumulative_view = processor
                .build_metrics(&cumulative, &descriptor, AttributeMap::new(), now())
                .unwrap();
            let expected = if value == 3.0 { 3.0 } else { 7.0 };
            assert_eq!(sum_values(&cumulative_view), vec![expected]);
        }
    }
}
