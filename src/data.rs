//! Types for delivery of pre-aggregated metric time series data.

use std::time::SystemTime;

use opentelemetry::{InstrumentationScope, KeyValue};

use crate::error::MetricError;
use crate::instrument::InstrumentDescriptor;

/// Defines the window that an aggregation was calculated over.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Temporality {
    /// A measurement interval that continues to expand forward in time from a
    /// starting point.
    ///
    /// New measurements are added to all previous measurements since a start
    /// time.
    #[default]
    Cumulative,

    /// A measurement interval that resets each cycle.
    ///
    /// Measurements from one cycle are recorded independently, measurements
    /// from other cycles do not affect them.
    Delta,
}

/// A collection of [ScopeMetrics] produced by one collection cycle for one
/// reader, together with the errors encountered along the way.
#[derive(Debug, Default)]
pub struct CollectionResult {
    /// The collection of metrics with unique [InstrumentationScope]s.
    pub scope_metrics: Vec<ScopeMetrics>,
    /// Callback failures and timeouts observed during this cycle.
    ///
    /// A non-empty list does not invalidate `scope_metrics`; the data is the
    /// best effort the engine could produce.
    pub errors: Vec<MetricError>,
}

/// A collection of metrics produced by a single meter.
#[derive(Debug, Clone)]
pub struct ScopeMetrics {
    /// The [InstrumentationScope] that the meter was created with.
    pub scope: InstrumentationScope,
    /// The list of aggregations created by the meter.
    pub metrics: Vec<MetricData>,
}

/// One aggregated metric stream from an instrument.
#[derive(Debug, Clone)]
pub struct MetricData {
    /// The stream identity this data was produced for.
    pub descriptor: InstrumentDescriptor,
    /// Describes if the points are reported as the change from the last
    /// collection, or the running total since the stream start.
    pub temporality: Temporality,
    /// The aggregated data points.
    pub points: MetricPoints,
}

/// Aggregated data points, by aggregation shape.
#[derive(Debug, Clone)]
pub enum MetricPoints {
    /// Points produced by a sum aggregation.
    Sum {
        /// Whether this aggregation only increases.
        is_monotonic: bool,
        /// Individual aggregated measurements with unique attributes.
        data_points: Vec<SumDataPoint>,
    },
    /// Points produced by a last-value aggregation.
    Gauge {
        /// Individual aggregated measurements with unique attributes.
        data_points: Vec<GaugeDataPoint>,
    },
    /// Points produced by an explicit-bucket histogram aggregation.
    Histogram {
        /// Individual aggregated measurements with unique attributes.
        data_points: Vec<HistogramDataPoint>,
    },
}

impl MetricPoints {
    /// Number of data points carried by this aggregation.
    pub fn len(&self) -> usize {
        match self {
            MetricPoints::Sum { data_points, .. } => data_points.len(),
            MetricPoints::Gauge { data_points } => data_points.len(),
            MetricPoints::Histogram { data_points } => data_points.len(),
        }
    }

    /// Whether this aggregation carries no data points.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single sum value in a time series.
#[derive(Debug, Clone, PartialEq)]
pub struct SumDataPoint {
    /// The set of key value pairs that uniquely identify the time series.
    pub attributes: Vec<KeyValue>,
    /// The time when the time series was started.
    pub start_time: SystemTime,
    /// The time when the time series was recorded.
    pub time: SystemTime,
    /// The value of this data point.
    pub value: f64,
}

/// A single sampled value in a time series.
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeDataPoint {
    /// The set of key value pairs that uniquely identify the time series.
    pub attributes: Vec<KeyValue>,
    /// The time when the time series was started.
    pub start_time: SystemTime,
    /// The time when the time series was recorded.
    pub time: SystemTime,
    /// The value of this data point.
    pub value: f64,
}

/// A single histogram data point in a time series.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramDataPoint {
    /// The set of key value pairs that uniquely identify the time series.
    pub attributes: Vec<KeyValue>,
    /// The time when the time series was started.
    pub start_time: SystemTime,
    /// The time when the time series was recorded.
    pub time: SystemTime,
    /// The number of updates this histogram has been calculated with.
    pub count: u64,
    /// The sum of the values recorded.
    ///
    /// `None` for instrument kinds that accept negative values, where a sum
    /// cannot be interpreted monotonically.
    pub sum: Option<f64>,
    /// The minimum value recorded.
    pub min: Option<f64>,
    /// The maximum value recorded.
    pub max: Option<f64>,
    /// The upper bounds of the buckets of the histogram.
    ///
    /// Because the last boundary is +infinity this one is implied.
    pub bounds: Vec<f64>,
    /// The count of each of the buckets.
    pub bucket_counts: Vec<u64>,
}
