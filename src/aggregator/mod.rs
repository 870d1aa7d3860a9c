//! Aggregation state and arithmetic, one flavor per metric shape.
//!
//! An [`Aggregator`] is a stateless policy object: it creates, merges, diffs
//! and exports [`Accumulation`]s but owns no data itself. The kind set is
//! closed, so dispatch is a plain `match` over the enum rather than a virtual
//! call. Every storage fixes its aggregator at creation time, which is what
//! makes merge/diff between accumulations of the same storage well defined.

mod histogram;
mod last_value;
mod sum;

use std::sync::Arc;
use std::time::SystemTime;

pub(crate) use histogram::HistogramAccumulation;
pub(crate) use last_value::LastValueAccumulation;
pub(crate) use sum::SumAccumulation;

use crate::attributes::AttributeMap;
use crate::data::{
    GaugeDataPoint, HistogramDataPoint, MetricData, MetricPoints, SumDataPoint, Temporality,
};
use crate::instrument::InstrumentDescriptor;

/// Per-(instrument, attribute group) aggregation state.
#[derive(Debug, Clone)]
pub(crate) enum Accumulation {
    /// Retains nothing; used for streams configured to drop their data.
    Drop,
    Sum(SumAccumulation),
    LastValue(LastValueAccumulation),
    Histogram(HistogramAccumulation),
}

impl Accumulation {
    pub(crate) fn record(&mut self, value: f64) {
        match self {
            Accumulation::Drop => {}
            Accumulation::Sum(s) => s.record(value),
            Accumulation::LastValue(l) => l.record(value),
            Accumulation::Histogram(h) => h.record(value),
        }
    }

    pub(crate) fn set_start_time(&mut self, start_time: SystemTime) {
        match self {
            Accumulation::Drop => {}
            Accumulation::Sum(s) => s.set_start_time(start_time),
            Accumulation::LastValue(l) => l.set_start_time(start_time),
            Accumulation::Histogram(h) => h.set_start_time(start_time),
        }
    }
}

/// Stateless aggregation policy for one metric shape.
#[derive(Debug, Clone)]
pub(crate) enum Aggregator {
    Drop,
    Sum {
        monotonic: bool,
    },
    LastValue,
    Histogram {
        boundaries: Arc<[f64]>,
        record_min_max: bool,
    },
}

impl Aggregator {
    /// A fresh, empty accumulation for this policy.
    pub(crate) fn create_accumulation(&self, start_time: SystemTime) -> Accumulation {
        match self {
            Aggregator::Drop => Accumulation::Drop,
            Aggregator::Sum { monotonic } => {
                Accumulation::Sum(SumAccumulation::new(start_time, *monotonic, 0.0, false))
            }
            Aggregator::LastValue => {
                Accumulation::LastValue(LastValueAccumulation::new(start_time, 0.0, start_time))
            }
            Aggregator::Histogram {
                boundaries,
                record_min_max,
            } => Accumulation::Histogram(HistogramAccumulation::new(
                start_time,
                boundaries.clone(),
                *record_min_max,
            )),
        }
    }

    /// Folds a delta accumulation into a previous one.
    pub(crate) fn merge(&self, previous: &Accumulation, delta: &Accumulation) -> Accumulation {
        match (previous, delta) {
            (Accumulation::Sum(p), Accumulation::Sum(d)) => {
                Accumulation::Sum(SumAccumulation::merge(p, d))
            }
            (Accumulation::LastValue(p), Accumulation::LastValue(d)) => {
                Accumulation::LastValue(LastValueAccumulation::merge(p, d))
            }
            (Accumulation::Histogram(p), Accumulation::Histogram(d)) => {
                Accumulation::Histogram(HistogramAccumulation::merge(p, d))
            }
            // The aggregator is fixed per storage, so variants cannot diverge.
            _ => delta.clone(),
        }
    }

    /// Computes the delta between two cumulative accumulations.
    pub(crate) fn diff(&self, previous: &Accumulation, current: &Accumulation) -> Accumulation {
        match (previous, current) {
            (Accumulation::Sum(p), Accumulation::Sum(c)) => {
                Accumulation::Sum(SumAccumulation::diff(p, c))
            }
            (Accumulation::LastValue(p), Accumulation::LastValue(c)) => {
                Accumulation::LastValue(LastValueAccumulation::diff(p, c))
            }
            (Accumulation::Histogram(p), Accumulation::Histogram(c)) => {
                Accumulation::Histogram(HistogramAccumulation::diff(p, c))
            }
            // The aggregator is fixed per storage, so variants cannot diverge.
            _ => current.clone(),
        }
    }

    /// Renders a set of accumulations into exportable metric data.
    ///
    /// Returns `None` for the drop policy, which never produces output.
    pub(crate) fn to_metric_data(
        &self,
        descriptor: &InstrumentDescriptor,
        temporality: Temporality,
        accumulations: &AttributeMap<Accumulation>,
        collection_time: SystemTime,
    ) -> Option<MetricData> {
        let points = match self {
            Aggregator::Drop => return None,
            Aggregator::Sum { monotonic } => MetricPoints::Sum {
                is_monotonic: *monotonic,
                data_points: accumulations
                    .iter()
                    .filter_map(|(attrs, acc)| match acc {
                        Accumulation::Sum(sum) => Some(SumDataPoint {
                            attributes: attrs.clone(),
                            start_time: sum.start_time(),
                            time: collection_time,
                            value: sum.value(),
                        }),
                        _ => None,
                    })
                    .collect(),
            },
            Aggregator::LastValue => MetricPoints::Gauge {
                data_points: accumulations
                    .iter()
                    .filter_map(|(attrs, acc)| match acc {
                        Accumulation::LastValue(last) => Some(GaugeDataPoint {
                            attributes: attrs.clone(),
                            start_time: last.start_time(),
                            time: collection_time,
                            value: last.value(),
                        }),
                        _ => None,
                    })
                    .collect(),
            },
            Aggregator::Histogram {
                boundaries,
                record_min_max,
            } => {
                // A sum over values that may be negative has no monotonic
                // reading, so it is omitted for up/down and gauge kinds.
                let record_sum = descriptor.kind().monotonic();
                MetricPoints::Histogram {
                    data_points: accumulations
                        .iter()
                        .filter_map(|(attrs, acc)| match acc {
                            Accumulation::Histogram(h) => Some(HistogramDataPoint {
                                attributes: attrs.clone(),
                                start_time: h.start_time(),
                                time: collection_time,
                                count: h.count(),
                                sum: record_sum.then(|| h.sum()),
                                min: if *record_min_max { h.min() } else { None },
                                max: if *record_min_max { h.max() } else { None },
                                bounds: boundaries.to_vec(),
                                bucket_counts: h.bucket_counts().to_vec(),
                            }),
                            _ => None,
                        })
                        .collect(),
                }
            }
        };

        Some(MetricData {
            descriptor: descriptor.clone(),
            temporality,
            points,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{InstrumentKind, ValueType};
    use opentelemetry::time::now;
    use opentelemetry::KeyValue;

    #[test]
    fn drop_aggregator_produces_no_data() {
        let aggregator = Aggregator::Drop;
        let mut acc = aggregator.create_accumulation(now());
        acc.record(1.0);

        let mut records = AttributeMap::new();
        records.set(&[KeyValue::new("a", 1)], acc);
        let descriptor =
            InstrumentDescriptor::new("dropped", InstrumentKind::Counter, ValueType::Double);
        assert!(aggregator
            .to_metric_data(&descriptor, Temporality::Delta, &records, now())
            .is_none());
    }

    #[test]
    fn histogram_sum_omitted_for_up_down_kinds() {
        let aggregator = Aggregator::Histogram {
            boundaries: Arc::from(vec![10.0].into_boxed_slice()),
            record_min_max: true,
        };
        let mut acc = aggregator.create_accumulation(now());
        acc.record(5.0);
        let mut records = AttributeMap::new();
        records.set(&[], acc);

        let descriptor = InstrumentDescriptor::new(
            "queue_depth",
            InstrumentKind::UpDownCounter,
            ValueType::Double,
        );
        let data = aggregator
            .to_metric_data(&descriptor, Temporality::Delta, &records, now())
            .unwrap();
        match data.points {
            MetricPoints::Histogram { data_points } => {
                assert_eq!(data_points[0].sum, None);
                assert_eq!(data_points[0].min, Some(5.0));
            }
            other => panic!("unexpected points: {other:?}"),
        }
    }

    #[test]
    fn histogram_sum_recorded_for_monotonic_kinds() {
        let aggregator = Aggregator::Histogram {
            boundaries: Arc::from(vec![10.0].into_boxed_slice()),
            record_min_max: false,
        };
        let mut acc = aggregator.create_accumulation(now());
        acc.record(5.0);
        acc.record(7.0);
        let mut records = AttributeMap::new();
        records.set(&[], acc);

        let descriptor =
            InstrumentDescriptor::new("latency", InstrumentKind::Histogram, ValueType::Double);
        let data = aggregator
            .to_metric_data(&descriptor, Temporality::Delta, &records, now())
            .unwrap();
        match data.points {
            MetricPoints::Histogram { data_points } => {
                assert_eq!(data_points[0].sum, Some(12.0));
                assert_eq!(data_points[0].min, None);
                assert_eq!(data_points[0].max, None);
            }
            other => panic!("unexpected points: {other:?}"),
        }
    }
}
