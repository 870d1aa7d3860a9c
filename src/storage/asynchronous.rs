use std::borrow::Cow;
use std::sync::Mutex;
use std::time::SystemTime;

use crate::aggregator::Aggregator;
use crate::attributes::AttributeMap;
use crate::data::MetricData;
use crate::instrument::InstrumentDescriptor;
use crate::processor::delta::DeltaMetricProcessor;
use crate::processor::temporal::TemporalMetricProcessor;
use crate::reader::{CollectorHandle, MetricCollector};
use crate::view::AttributesProcessor;

/// Storage for one observable instrument stream.
///
/// Observable instruments report absolute readings, so a full cycle of
/// observations arrives at once and is converted to deltas before entering
/// the shared temporal path. An instrument that goes quiet simply reports an
/// empty cycle: delta readers then stop seeing its series, while cumulative
/// readers keep re-reporting the last known totals out of their own history.
pub(crate) struct AsyncMetricStorage {
    descriptor: Mutex<InstrumentDescriptor>,
    attributes_processor: AttributesProcessor,
    delta: DeltaMetricProcessor,
    temporal: TemporalMetricProcessor,
}

impl AsyncMetricStorage {
    pub(crate) fn new(
        descriptor: InstrumentDescriptor,
        aggregator: Aggregator,
        attributes_processor: AttributesProcessor,
        collectors: &[CollectorHandle],
        cardinality_limit: usize,
    ) -> Self {
        AsyncMetricStorage {
            descriptor: Mutex::new(descriptor),
            attributes_processor,
            delta: DeltaMetricProcessor::new(aggregator.clone(), cardinality_limit),
            temporal: TemporalMetricProcessor::new(aggregator, collectors),
        }
    }

    /// Folds one observation cycle's readings into the stream.
    pub(crate) fn record(
        &self,
        measurements: AttributeMap<f64>,
        observation_time: SystemTime,
    ) {
        let mut processed = AttributeMap::new();
        for (_, attributes, value) in measurements.into_entries() {
            // Filtering may collapse distinct observations onto the same
            // attribute set; the last one wins, matching the gauge-style
            // semantics of a single observation cycle.
            let attributes = self.attributes_processor.process(&attributes);
            processed.set(&attributes, value);
        }
        self.delta.batch_cumulate(processed, observation_time);
    }

    pub(crate) fn collect(
        &self,
        collector: &MetricCollector,
        collection_time: SystemTime,
    ) -> Option<MetricData> {
        let descriptor = self.descriptor.lock().ok()?.clone();
        let accumulations = self.delta.collect();
        self.temporal
            .build_metrics(collector, &descriptor, accumulations, collection_time)
    }

    pub(crate) fn descriptor(&self) -> InstrumentDescriptor {
        self.descriptor
            .lock()
            .map(|d| d.clone())
            .unwrap_or_else(|err| err.into_inner().clone())
    }

    pub(crate) fn update_description(&self, description: Cow<'static, str>) {
        if let Ok(mut descriptor) = self.descriptor.lock() {
            descriptor.description = description;
        }
    }
}
