//! Wiring between meters, readers and per-stream storage.
//!
//! [`MeterProviderSharedState`] owns the pieces shared across meters: the
//! registered readers (as [`MetricCollector`]s with stable handles) and the
//! view registry. A [`MeterSharedState`] exists per instrumentation scope and
//! owns that scope's storage registry and observable-callback registry.
//! Instrument registration resolves views into storages here; collection
//! walks every meter, drives its observable callbacks and pulls each storage
//! through the requesting reader's temporal state.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use opentelemetry::time::now;
use opentelemetry::InstrumentationScope;

use crate::aggregation::default_aggregation;
use crate::data::{CollectionResult, ScopeMetrics};
use crate::error::{MetricError, MetricResult};
use crate::instrument::InstrumentDescriptor;
use crate::observable::{
    BatchObservableCallback, ObservableCallback, ObservableInstrument, ObservableRegistry,
};
use crate::reader::{CollectorHandle, MetricCollector, MetricReader, DEFAULT_CARDINALITY_LIMIT};
use crate::storage::{
    AnyMetricStorage, AsyncMetricStorage, MetricStorageRegistry, MultiMetricStorage,
    SyncMetricStorage,
};
use crate::view::{AttributesProcessor, View, ViewRegistry};

/// How long one observation cycle may run before its remaining callbacks are
/// abandoned, unless the caller of [`MeterProviderSharedState::collect`]
/// chooses otherwise.
pub const DEFAULT_OBSERVE_TIMEOUT: Duration = Duration::from_secs(30);

const SYNC_KIND_REQUIRED: &str =
    "observable instrument kinds cannot back a synchronous instrument";
const OBSERVABLE_KIND_REQUIRED: &str =
    "synchronous instrument kinds cannot back an observable instrument";

/// State shared by every meter of one provider.
pub struct MeterProviderSharedState {
    views: Arc<ViewRegistry>,
    collectors: Vec<MetricCollector>,
    meters: Mutex<HashMap<InstrumentationScope, Arc<MeterSharedState>>>,
}

impl MeterProviderSharedState {
    /// Start building provider state from readers and views.
    pub fn builder() -> MeterProviderBuilder {
        MeterProviderBuilder::default()
    }

    /// The handles of the registered readers, in registration order.
    pub fn collector_handles(&self) -> Vec<CollectorHandle> {
        self.collectors.iter().map(|c| c.handle()).collect()
    }

    /// The meter state for the given scope, created on first use.
    ///
    /// Scopes compare by name, version and schema URL; asking again with an
    /// equal scope returns the same meter.
    pub fn meter(&self, scope: InstrumentationScope) -> Arc<MeterSharedState> {
        let Ok(mut meters) = self.meters.lock() else {
            // Lock poisoning only happens after a panic elsewhere; hand out a
            // detached meter rather than propagating it.
            return Arc::new(MeterSharedState::new(
                scope,
                Arc::clone(&self.views),
                self.collectors.clone(),
            ));
        };
        let entry = meters.entry(scope.clone()).or_insert_with(|| {
            Arc::new(MeterSharedState::new(
                scope,
                Arc::clone(&self.views),
                self.collectors.clone(),
            ))
        });
        Arc::clone(entry)
    }

    /// Collects one reader's view of every meter's streams.
    ///
    /// Observable callbacks run under `timeout`; their failures and a
    /// possible timeout end up in the returned error list next to whatever
    /// data the cycle could produce. Callers serialize collection per reader.
    pub async fn collect(
        &self,
        collector: CollectorHandle,
        timeout: Duration,
    ) -> CollectionResult {
        let mut result = CollectionResult::default();
        let Some(collector) = self
            .collectors
            .iter()
            .find(|c| c.handle() == collector)
            .cloned()
        else {
            result.errors.push(MetricError::Other(format!(
                "no reader registered under {collector:?}"
            )));
            return result;
        };

        let meters: Vec<Arc<MeterSharedState>> = match self.meters.lock() {
            Ok(meters) => meters.values().cloned().collect(),
            Err(_) => Vec::new(),
        };

        let collection_time = now();
        for meter in meters {
            let (scope_metrics, errors) = meter.collect(&collector, collection_time, timeout).await;
            if let Some(scope_metrics) = scope_metrics {
                result.scope_metrics.push(scope_metrics);
            }
            result.errors.extend(errors);
        }
        result
    }

    /// Blocking convenience over [`collect`](Self::collect) for callers
    /// without an async context.
    pub fn collect_blocking(
        &self,
        collector: CollectorHandle,
        timeout: Duration,
    ) -> CollectionResult {
        futures_executor::block_on(self.collect(collector, timeout))
    }
}

impl fmt::Debug for MeterProviderSharedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeterProviderSharedState")
            .field("collectors", &self.collectors)
            .finish()
    }
}

/// Builder for [`MeterProviderSharedState`].
#[derive(Default)]
pub struct MeterProviderBuilder {
    readers: Vec<Arc<dyn MetricReader>>,
    views: Vec<View>,
}

impl MeterProviderBuilder {
    /// Register a reader. Its handle is assigned in registration order.
    pub fn with_reader(mut self, reader: impl MetricReader) -> Self {
        self.readers.push(Arc::new(reader));
        self
    }

    /// Register a view shaping the streams of matching instruments.
    pub fn with_view(mut self, view: View) -> Self {
        self.views.push(view);
        self
    }

    /// Build the provider state.
    pub fn build(self) -> MeterProviderSharedState {
        let collectors = self
            .readers
            .into_iter()
            .enumerate()
            .map(|(index, reader)| MetricCollector::new(CollectorHandle(index), reader))
            .collect();
        MeterProviderSharedState {
            views: Arc::new(ViewRegistry::new(self.views)),
            collectors,
            meters: Mutex::new(HashMap::new()),
        }
    }
}

impl fmt::Debug for MeterProviderBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeterProviderBuilder")
            .field("readers", &self.readers.len())
            .field("views", &self.views.len())
            .finish()
    }
}

/// Per-scope engine state: the storages and observable callbacks of one
/// meter.
pub struct MeterSharedState {
    scope: InstrumentationScope,
    views: Arc<ViewRegistry>,
    collectors: Vec<MetricCollector>,
    storage_registry: MetricStorageRegistry,
    observable_registry: ObservableRegistry,
}

impl MeterSharedState {
    fn new(
        scope: InstrumentationScope,
        views: Arc<ViewRegistry>,
        collectors: Vec<MetricCollector>,
    ) -> Self {
        MeterSharedState {
            scope,
            views,
            collectors,
            storage_registry: MetricStorageRegistry::default(),
            observable_registry: ObservableRegistry::default(),
        }
    }

    /// The scope this meter was created with.
    pub fn scope(&self) -> &InstrumentationScope {
        &self.scope
    }

    /// Creates (or reuses) the storages backing one synchronous instrument.
    ///
    /// Matching views each produce their own storage; without any match the
    /// instrument gets a default-configuration storage per reader. The
    /// returned handle fans every recorded measurement out to all of them.
    pub fn register_sync_instrument(
        &self,
        descriptor: InstrumentDescriptor,
    ) -> MetricResult<MultiMetricStorage> {
        if descriptor.kind().is_observable() {
            return Err(MetricError::InvalidInstrumentConfiguration(
                SYNC_KIND_REQUIRED,
            ));
        }

        let mut storages = Vec::new();
        let views: Vec<&View> = self.views.find_views(&descriptor, &self.scope).collect();
        if views.is_empty() {
            for collector in &self.collectors {
                if let Some(AnyMetricStorage::Sync(existing)) = self
                    .storage_registry
                    .find_or_update_compatible_collector_storage(collector.handle(), &descriptor)
                {
                    storages.push(existing);
                    continue;
                }
                let aggregator =
                    default_aggregation(&descriptor).create_aggregator(&descriptor);
                let storage = Arc::new(SyncMetricStorage::new(
                    descriptor.clone(),
                    aggregator,
                    AttributesProcessor::Noop,
                    &[collector.handle()],
                    collector.select_cardinality_limit(descriptor.kind()),
                ));
                self.storage_registry.register_for_collector(
                    collector.handle(),
                    AnyMetricStorage::Sync(Arc::clone(&storage)),
                );
                storages.push(storage);
            }
        } else {
            let handles = self.collector_handles();
            for view in views {
                let stream = view.stream_descriptor(&descriptor);
                if let Some(AnyMetricStorage::Sync(existing)) = self
                    .storage_registry
                    .find_or_update_compatible_storage(&stream)
                {
                    storages.push(existing);
                    continue;
                }
                let aggregator = view.aggregation().create_aggregator(&stream);
                let storage = Arc::new(SyncMetricStorage::new(
                    stream,
                    aggregator,
                    view.attributes_processor(),
                    &handles,
                    view.cardinality_limit().unwrap_or(DEFAULT_CARDINALITY_LIMIT),
                ));
                self.storage_registry
                    .register(AnyMetricStorage::Sync(Arc::clone(&storage)));
                storages.push(storage);
            }
        }
        Ok(MultiMetricStorage::new(storages))
    }

    /// Creates (or reuses) the storages backing one observable instrument.
    ///
    /// The returned instrument is the identity callbacks are registered
    /// against; every observation cycle's readings reach all of its storages.
    pub fn register_observable_instrument(
        &self,
        descriptor: InstrumentDescriptor,
    ) -> MetricResult<Arc<ObservableInstrument>> {
        if !descriptor.kind().is_observable() {
            return Err(MetricError::InvalidInstrumentConfiguration(
                OBSERVABLE_KIND_REQUIRED,
            ));
        }

        let mut storages = Vec::new();
        let views: Vec<&View> = self.views.find_views(&descriptor, &self.scope).collect();
        if views.is_empty() {
            for collector in &self.collectors {
                if let Some(AnyMetricStorage::Async(existing)) = self
                    .storage_registry
                    .find_or_update_compatible_collector_storage(collector.handle(), &descriptor)
                {
                    storages.push(existing);
                    continue;
                }
                let aggregator =
                    default_aggregation(&descriptor).create_aggregator(&descriptor);
                let storage = Arc::new(AsyncMetricStorage::new(
                    descriptor.clone(),
                    aggregator,
                    AttributesProcessor::Noop,
                    &[collector.handle()],
                    collector.select_cardinality_limit(descriptor.kind()),
                ));
                self.storage_registry.register_for_collector(
                    collector.handle(),
                    AnyMetricStorage::Async(Arc::clone(&storage)),
                );
                storages.push(storage);
            }
        } else {
            let handles = self.collector_handles();
            for view in views {
                let stream = view.stream_descriptor(&descriptor);
                if let Some(AnyMetricStorage::Async(existing)) = self
                    .storage_registry
                    .find_or_update_compatible_storage(&stream)
                {
                    storages.push(existing);
                    continue;
                }
                let aggregator = view.aggregation().create_aggregator(&stream);
                let storage = Arc::new(AsyncMetricStorage::new(
                    stream,
                    aggregator,
                    view.attributes_processor(),
                    &handles,
                    view.cardinality_limit().unwrap_or(DEFAULT_CARDINALITY_LIMIT),
                ));
                self.storage_registry
                    .register(AnyMetricStorage::Async(Arc::clone(&storage)));
                storages.push(storage);
            }
        }
        Ok(Arc::new(ObservableInstrument::new(descriptor, storages)))
    }

    /// Attach a callback to one observable instrument.
    pub fn register_callback(
        &self,
        callback: Arc<ObservableCallback>,
        instrument: Arc<ObservableInstrument>,
    ) {
        self.observable_registry
            .register_callback(callback, instrument);
    }

    /// Detach a callback registered through
    /// [`register_callback`](Self::register_callback).
    pub fn unregister_callback(
        &self,
        callback: &Arc<ObservableCallback>,
        instrument: &Arc<ObservableInstrument>,
    ) {
        self.observable_registry
            .unregister_callback(callback, instrument);
    }

    /// Attach a callback observing several instruments at once.
    pub fn register_batch_callback(
        &self,
        callback: Arc<BatchObservableCallback>,
        instruments: Vec<Arc<ObservableInstrument>>,
    ) {
        self.observable_registry
            .register_batch_callback(callback, instruments);
    }

    /// Detach a callback registered through
    /// [`register_batch_callback`](Self::register_batch_callback).
    pub fn unregister_batch_callback(
        &self,
        callback: &Arc<BatchObservableCallback>,
        instruments: &[Arc<ObservableInstrument>],
    ) {
        self.observable_registry
            .unregister_batch_callback(callback, instruments);
    }

    pub(crate) async fn collect(
        &self,
        collector: &MetricCollector,
        collection_time: SystemTime,
        timeout: Duration,
    ) -> (Option<ScopeMetrics>, Vec<MetricError>) {
        let errors = self
            .observable_registry
            .observe(collection_time, timeout)
            .await;

        let mut metrics = Vec::new();
        for storage in self.storage_registry.storages_for(collector.handle()) {
            if let Some(data) = storage.collect(collector, collection_time) {
                metrics.push(data);
            }
        }

        let scope_metrics = (!metrics.is_empty()).then(|| ScopeMetrics {
            scope: self.scope.clone(),
            metrics,
        });
        (scope_metrics, errors)
    }

    fn collector_handles(&self) -> Vec<CollectorHandle> {
        self.collectors.iter().map(|c| c.handle()).collect()
    }
}

impl fmt::Debug for MeterSharedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeterSharedState")
            .field("scope", &self.scope)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::Aggregation;
    use crate::data::{MetricPoints, Temporality};
    use crate::instrument::{InstrumentKind, ValueType};
    use crate::testing::TestReader;
    use futures_util::FutureExt;
    use opentelemetry::{Key, KeyValue};

    fn provider_with(temporalities: &[Temporality]) -> MeterProviderSharedState {
        let mut builder = MeterProviderSharedState::builder();
        for temporality in temporalities {
            builder = builder.with_reader(TestReader::new(*temporality));
        }
        builder.build()
    }

    fn counter(name: &'static str) -> InstrumentDescriptor {
        InstrumentDescriptor::new(name, InstrumentKind::Counter, ValueType::Int)
    }

    fn collect(provider: &MeterProviderSharedState, handle: CollectorHandle) -> CollectionResult {
        provider.collect_blocking(handle, DEFAULT_OBSERVE_TIMEOUT)
    }

    fn sum_values(result: &CollectionResult, name: &str) -> Vec<f64> {
        result
            .scope_metrics
            .iter()
            .flat_map(|scope| scope.metrics.iter())
            .filter(|metric| metric.descriptor.name() == name)
            .flat_map(|metric| match &metric.points {
                MetricPoints::Sum { data_points, .. } => {
                    data_points.iter().map(|p| p.value).collect::<Vec<_>>()
                }
                other => panic!("unexpected points: {other:?}"),
            })
            .collect()
    }

    #[test]
    fn equal_scopes_share_one_meter() {
        let provider = provider_with(&[Temporality::Delta]);
        let a = provider.meter(InstrumentationScope::builder("app").build());
        let b = provider.meter(InstrumentationScope::builder("app").build());
        assert!(Arc::ptr_eq(&a, &b));

        let c = provider.meter(
            InstrumentationScope::builder("app")
                .with_version("2.0")
                .build(),
        );
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn record_and_collect_through_the_default_configuration() {
        let provider = provider_with(&[Temporality::Delta]);
        let meter = provider.meter(InstrumentationScope::builder("app").build());
        let requests = meter.register_sync_instrument(counter("requests")).unwrap();

        requests.record(2.0, &[KeyValue::new("route", "/")], now());
        requests.record(3.0, &[KeyValue::new("route", "/")], now());

        let handle = provider.collector_handles()[0];
        let result = collect(&provider, handle);
        assert!(result.errors.is_empty());
        assert_eq!(sum_values(&result, "requests"), vec![5.0]);
    }

    #[test]
    fn kind_mismatch_is_rejected_at_registration() {
        let provider = provider_with(&[Temporality::Delta]);
        let meter = provider.meter(InstrumentationScope::builder("app").build());

        let observable = InstrumentDescriptor::new(
            "c",
            InstrumentKind::ObservableCounter,
            ValueType::Int,
        );
        assert!(meter.register_sync_instrument(observable).is_err());
        assert!(meter.register_observable_instrument(counter("c")).is_err());
    }

    #[test]
    fn matching_views_fan_one_instrument_into_several_streams() {
        let provider = MeterProviderSharedState::builder()
            .with_reader(TestReader::new(Temporality::Delta))
            .with_view(
                View::builder()
                    .with_instrument_name("latency")
                    .with_name("latency.buckets")
                    .with_aggregation(Aggregation::ExplicitBucketHistogram {
                        boundaries: vec![10.0, 100.0],
                        record_min_max: true,
                    })
                    .build()
                    .unwrap(),
            )
            .with_view(
                View::builder()
                    .with_instrument_name("latency")
                    .with_name("latency.total")
                    .with_aggregation(Aggregation::Sum)
                    .build()
                    .unwrap(),
            )
            .build();

        let meter = provider.meter(InstrumentationScope::builder("app").build());
        let latency = meter
            .register_sync_instrument(InstrumentDescriptor::new(
                "latency",
                InstrumentKind::Histogram,
                ValueType::Double,
            ))
            .unwrap();
        latency.record(7.0, &[], now());
        latency.record(50.0, &[], now());

        let handle = provider.collector_handles()[0];
        let result = collect(&provider, handle);
        let names: Vec<&str> = result.scope_metrics[0]
            .metrics
            .iter()
            .map(|m| m.descriptor.name())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"latency.buckets"));
        assert!(names.contains(&"latency.total"));
        assert_eq!(sum_values(&result, "latency.total"), vec![57.0]);
    }

    #[test]
    fn view_attribute_filter_applies_before_grouping() {
        let provider = MeterProviderSharedState::builder()
            .with_reader(TestReader::new(Temporality::Delta))
            .with_view(
                View::builder()
                    .with_instrument_name("requests")
                    .with_allowed_attribute_keys([Key::new("route")])
                    .build()
                    .unwrap(),
            )
            .build();

        let meter = provider.meter(InstrumentationScope::builder("app").build());
        let requests = meter.register_sync_instrument(counter("requests")).unwrap();
        requests.record(
            1.0,
            &[KeyValue::new("route", "/"), KeyValue::new("user", "u1")],
            now(),
        );
        requests.record(
            1.0,
            &[KeyValue::new("route", "/"), KeyValue::new("user", "u2")],
            now(),
        );

        let handle = provider.collector_handles()[0];
        let result = collect(&provider, handle);
        assert_eq!(sum_values(&result, "requests"), vec![2.0]);
    }

    #[test]
    fn compatible_duplicate_registration_reuses_the_stream() {
        let provider = provider_with(&[Temporality::Cumulative]);
        let meter = provider.meter(InstrumentationScope::builder("app").build());

        let first = meter.register_sync_instrument(counter("requests")).unwrap();
        let second = meter.register_sync_instrument(counter("requests")).unwrap();
        first.record(2.0, &[], now());
        second.record(3.0, &[], now());

        let handle = provider.collector_handles()[0];
        let result = collect(&provider, handle);
        assert_eq!(sum_values(&result, "requests"), vec![5.0]);
    }

    #[test]
    fn incompatible_duplicate_registrations_export_independently() {
        let provider = provider_with(&[Temporality::Cumulative]);
        let meter = provider.meter(InstrumentationScope::builder("app").build());

        let as_counter = meter.register_sync_instrument(counter("requests")).unwrap();
        let as_up_down = meter
            .register_sync_instrument(InstrumentDescriptor::new(
                "requests",
                InstrumentKind::UpDownCounter,
                ValueType::Int,
            ))
            .unwrap();
        as_counter.record(1.0, &[], now());
        as_up_down.record(-1.0, &[], now());

        let handle = provider.collector_handles()[0];
        let result = collect(&provider, handle);
        assert_eq!(result.scope_metrics[0].metrics.len(), 2);
    }

    #[test]
    fn readers_with_different_temporalities_stay_independent() {
        let provider = provider_with(&[Temporality::Delta, Temporality::Cumulative]);
        let meter = provider.meter(InstrumentationScope::builder("app").build());
        let requests = meter.register_sync_instrument(counter("requests")).unwrap();
        let handles = provider.collector_handles();

        requests.record(3.0, &[], now());
        assert_eq!(sum_values(&collect(&provider, handles[0]), "requests"), vec![3.0]);
        assert_eq!(sum_values(&collect(&provider, handles[1]), "requests"), vec![3.0]);

        requests.record(4.0, &[], now());
        assert_eq!(sum_values(&collect(&provider, handles[0]), "requests"), vec![4.0]);
        assert_eq!(sum_values(&collect(&provider, handles[1]), "requests"), vec![7.0]);
    }

    #[test]
    fn unknown_collector_returns_an_error() {
        let provider = provider_with(&[Temporality::Delta]);
        let result = collect(&provider, CollectorHandle(7));
        assert!(result.scope_metrics.is_empty());
        assert_eq!(result.errors.len(), 1);
    }

    #[tokio::test]
    async fn observable_instruments_report_through_callbacks() {
        let provider = provider_with(&[Temporality::Delta]);
        let meter = provider.meter(InstrumentationScope::builder("app").build());
        let connections = meter
            .register_observable_instrument(InstrumentDescriptor::new(
                "connections",
                InstrumentKind::ObservableCounter,
                ValueType::Int,
            ))
            .unwrap();
        meter.register_callback(
            Arc::new(|result| {
                async move {
                    result.observe(10.0, &[]);
                    Ok(())
                }
                .boxed()
            }),
            Arc::clone(&connections),
        );

        let handle = provider.collector_handles()[0];
        let result = provider.collect(handle, DEFAULT_OBSERVE_TIMEOUT).await;
        assert!(result.errors.is_empty());
        assert_eq!(sum_values(&result, "connections"), vec![10.0]);
    }
}
