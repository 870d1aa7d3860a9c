use std::borrow::Cow;
use std::sync::Mutex;
use std::time::SystemTime;

use opentelemetry::KeyValue;

use crate::aggregator::Aggregator;
use crate::data::MetricData;
use crate::instrument::InstrumentDescriptor;
use crate::processor::delta::DeltaMetricProcessor;
use crate::processor::temporal::TemporalMetricProcessor;
use crate::reader::{CollectorHandle, MetricCollector};
use crate::storage::coerce_measurement;
use crate::view::AttributesProcessor;

/// Storage for one synchronous instrument stream.
pub(crate) struct SyncMetricStorage {
    descriptor: Mutex<InstrumentDescriptor>,
    attributes_processor: AttributesProcessor,
    delta: DeltaMetricProcessor,
    temporal: TemporalMetricProcessor,
}

impl SyncMetricStorage {
    pub(crate) fn new(
        descriptor: InstrumentDescriptor,
        aggregator: Aggregator,
        attributes_processor: AttributesProcessor,
        collectors: &[CollectorHandle],
        cardinality_limit: usize,
    ) -> Self {
        SyncMetricStorage {
            descriptor: Mutex::new(descriptor),
            attributes_processor,
            delta: DeltaMetricProcessor::new(aggregator.clone(), cardinality_limit),
            temporal: TemporalMetricProcessor::new(aggregator, collectors),
        }
    }

    /// Records one measurement. Never fails; invalid input is logged and
    /// dropped or coerced.
    pub(crate) fn record(&self, value: f64, attributes: &[KeyValue], record_time: SystemTime) {
        let descriptor = match self.descriptor.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => return,
        };
        let Some(value) = coerce_measurement(&descriptor, value) else {
            return;
        };
        let attributes = self.attributes_processor.process(attributes);
        self.delta.record(value, &attributes, record_time);
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
