//! Long-lived per-stream storage.
//!
//! One storage exists per (instrument, view) pair, created at instrument
//! registration time and kept for the life of the owning meter. It binds an
//! aggregator and delta processor to one temporal processor per registered
//! reader, and applies the view's attribute filtering on the way in.

mod asynchronous;
mod multi;
mod registry;
mod sync;

pub use multi::MultiMetricStorage;
pub(crate) use registry::{AnyMetricStorage, MetricStorageRegistry};

pub(crate) use asynchronous::AsyncMetricStorage;
pub(crate) use sync::SyncMetricStorage;

use opentelemetry::otel_warn;

use crate::instrument::{InstrumentDescriptor, ValueType};

/// Applies the engine's input coercion policy to one measurement.
///
/// Recording never fails the caller: NaN and wrongly-signed values are
/// dropped, fractional values on integer-typed instruments are truncated,
/// and each case is reported through the diagnostics channel.
pub(crate) fn coerce_measurement(descriptor: &InstrumentDescriptor, value: f64) -> Option<f64> {
    if value.is_nan() {
        otel_warn!(
            name: "MetricStorage.NanMeasurement",
            message = "NaN measurements cannot be aggregated, dropping the measurement",
            instrument = descriptor.name().to_string(),
        );
        return None;
    }
    if descriptor.kind().monotonic() && value < 0.0 {
        otel_warn!(
            name: "MetricStorage.NegativeMeasurement",
            message = "negative measurements are not accepted by this instrument kind, dropping the measurement",
            instrument = descriptor.name().to_string(),
            value = value,
        );
        return None;
    }
    if descriptor.value_type() == ValueType::Int && value.fract() != 0.0 {
        otel_warn!(
            name: "MetricStorage.TruncatedMeasurement",
            message = "integer-typed instrument received a fractional value, ignoring the fractional digits",
            instrument = descriptor.name().to_string(),
            value = value,
        );
        return Some(value.trunc());
    }
    Some(value)
}
