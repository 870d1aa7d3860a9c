use std::sync::Arc;

use crate::aggregator::Aggregator;
use crate::error::{MetricError, MetricResult};
use crate::instrument::{InstrumentDescriptor, InstrumentKind};

/// Default explicit bucket boundaries, used when neither a view nor the
/// instrument's advice supplies its own.
pub const DEFAULT_HISTOGRAM_BOUNDARIES: [f64; 15] = [
    0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0, 5000.0, 7500.0,
    10000.0,
];

/// The way recorded measurements are summarized into a metric stream.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Aggregation {
    /// The default aggregation for the instrument kind:
    ///
    /// * Counter, UpDownCounter and their observable variants ⇨ [`Aggregation::Sum`]
    /// * Gauge, ObservableGauge ⇨ [`Aggregation::LastValue`]
    /// * Histogram ⇨ [`Aggregation::ExplicitBucketHistogram`]
    Default,

    /// An aggregation that drops all recorded data.
    Drop,

    /// An aggregation that summarizes measurements as an arithmetic sum.
    Sum,

    /// An aggregation that summarizes measurements as the last one recorded.
    LastValue,

    /// An aggregation that summarizes measurements as a histogram with
    /// explicitly defined buckets.
    ExplicitBucketHistogram {
        /// The increasing bucket boundary values.
        ///
        /// Bucket i holds values up to and including `boundaries[i]`; an
        /// implicit final bucket holds everything above the last boundary.
        boundaries: Vec<f64>,
        /// Whether to record min and max values alongside the buckets.
        record_min_max: bool,
    },
}

impl Aggregation {
    /// Validate that this aggregation's configuration is usable.
    pub fn validate(&self) -> MetricResult<()> {
        match self {
            Aggregation::ExplicitBucketHistogram { boundaries, .. } => {
                for boundary in boundaries {
                    if boundary.is_nan() || boundary.is_infinite() {
                        return Err(MetricError::Config(format!(
                            "aggregation: explicit bucket histogram: boundaries must be finite: {boundaries:?}",
                        )));
                    }
                }
                for window in boundaries.windows(2) {
                    if window[0] >= window[1] {
                        return Err(MetricError::Config(format!(
                            "aggregation: explicit bucket histogram: non-monotonic boundaries: {boundaries:?}",
                        )));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Resolves this aggregation into the arithmetic policy used by a storage
    /// for the given stream.
    pub(crate) fn create_aggregator(&self, descriptor: &InstrumentDescriptor) -> Aggregator {
        match self {
            Aggregation::Default => {
                default_aggregation(descriptor).create_aggregator(descriptor)
            }
            Aggregation::Drop => Aggregator::Drop,
            Aggregation::Sum => Aggregator::Sum {
                monotonic: descriptor.kind().monotonic(),
            },
            Aggregation::LastValue => Aggregator::LastValue,
            Aggregation::ExplicitBucketHistogram {
                boundaries,
                record_min_max,
            } => {
                let mut bounds = boundaries.clone();
                bounds.retain(|b| !b.is_nan());
                bounds.sort_by(f64::total_cmp);
                bounds.dedup();
                Aggregator::Histogram {
                    boundaries: Arc::from(bounds.into_boxed_slice()),
                    record_min_max: *record_min_max,
                }
            }
        }
    }
}

/// The default aggregation for an instrument kind, honoring any boundary
/// advice the instrument was created with.
pub(crate) fn default_aggregation(descriptor: &InstrumentDescriptor) -> Aggregation {
    match descriptor.kind() {
        InstrumentKind::Counter
        | InstrumentKind::UpDownCounter
        | InstrumentKind::ObservableCounter
        | InstrumentKind::ObservableUpDownCounter => Aggregation::Sum,
        InstrumentKind::Gauge | InstrumentKind::ObservableGauge => Aggregation::LastValue,
        InstrumentKind::Histogram => Aggregation::ExplicitBucketHistogram {
            boundaries: descriptor
                .advice()
                .explicit_bucket_boundaries
                .clone()
                .unwrap_or_else(|| DEFAULT_HISTOGRAM_BOUNDARIES.to_vec()),
            record_min_max: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{Advice, ValueType};

    #[test]
    fn validate_boundaries() {
        let ok = Aggregation::ExplicitBucketHistogram {
            boundaries: vec![0.0, 5.0, 10.0],
            record_min_max: true,
        };
        assert!(ok.validate().is_ok());

        let unsorted = Aggregation::ExplicitBucketHistogram {
            boundaries: vec![0.0, 10.0, 5.0],
            record_min_max: true,
        };
        assert!(unsorted.validate().is_err());

        let duplicated = Aggregation::ExplicitBucketHistogram {
            boundaries: vec![0.0, 5.0, 5.0],
            record_min_max: true,
        };
        assert!(duplicated.validate().is_err());

        let with_nan = Aggregation::ExplicitBucketHistogram {
            boundaries: vec![0.0, f64::NAN],
            record_min_max: true,
        };
        assert!(with_nan.validate().is_err());

        let with_inf = Aggregation::ExplicitBucketHistogram {
            boundaries: vec![0.0, f64::INFINITY],
            record_min_max: true,
        };
        assert!(with_inf.validate().is_err());
    }

    #[test]
    fn default_aggregation_per_kind() {
        let sum = InstrumentDescriptor::new("c", InstrumentKind::Counter, ValueType::Int);
        assert_eq!(default_aggregation(&sum), Aggregation::Sum);

        let gauge = InstrumentDescriptor::new("g", InstrumentKind::Gauge, ValueType::Double);
        assert_eq!(default_aggregation(&gauge), Aggregation::LastValue);

        let histogram =
            InstrumentDescriptor::new("h", InstrumentKind::Histogram, ValueType::Double);
        match default_aggregation(&histogram) {
            Aggregation::ExplicitBucketHistogram { boundaries, .. } => {
                assert_eq!(boundaries, DEFAULT_HISTOGRAM_BOUNDARIES.to_vec());
            }
            other => panic!("unexpected default: {other:?}"),
        }
    }

    #[test]
    fn advice_boundaries_override_defaults() {
        let histogram = InstrumentDescriptor::new("h", InstrumentKind::Histogram, ValueType::Double)
            .with_advice(Advice {
                explicit_bucket_boundaries: Some(vec![1.0, 2.0]),
            });
        match default_aggregation(&histogram) {
            Aggregation::ExplicitBucketHistogram { boundaries, .. } => {
                assert_eq!(boundaries, vec![1.0, 2.0]);
            }
            other => panic!("unexpected default: {other:?}"),
        }
    }
}
