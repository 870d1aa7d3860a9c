use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use opentelemetry::otel_warn;

use crate::data::MetricData;
use crate::instrument::InstrumentDescriptor;
use crate::reader::{CollectorHandle, MetricCollector};
use crate::storage::{AsyncMetricStorage, SyncMetricStorage};

/// A storage of either flavor, as tracked by the registry.
///
/// Descriptor compatibility implies matching instrument kinds, and the kind
/// fixes the flavor, so a compatible lookup always returns the variant the
/// caller registered.
#[derive(Clone)]
pub(crate) enum AnyMetricStorage {
    Sync(Arc<SyncMetricStorage>),
    Async(Arc<AsyncMetricStorage>),
}

impl AnyMetricStorage {
    pub(crate) fn descriptor(&self) -> InstrumentDescriptor {
        match self {
            AnyMetricStorage::Sync(storage) => storage.descriptor(),
            AnyMetricStorage::Async(storage) => storage.descriptor(),
        }
    }

    fn update_description(&self, description: std::borrow::Cow<'static, str>) {
        match self {
            AnyMetricStorage::Sync(storage) => storage.update_description(description),
            AnyMetricStorage::Async(storage) => storage.update_description(description),
        }
    }

    pub(crate) fn collect(
        &self,
        collector: &MetricCollector,
        collection_time: SystemTime,
    ) -> Option<MetricData> {
        match self {
            AnyMetricStorage::Sync(storage) => storage.collect(collector, collection_time),
            AnyMetricStorage::Async(storage) => storage.collect(collector, collection_time),
        }
    }
}

/// De-duplicates storages by instrument name and surfaces naming conflicts.
///
/// This is a best-effort layer: a compatible registration reuses the existing
/// storage (keeping the longer description); an incompatible one is kept as a
/// separate entry under the same name with a diagnostic describing the
/// conflict and how to resolve it. Nothing here is a hard error, conflicting
/// instruments remain independently exported.
#[derive(Default)]
pub(crate) struct MetricStorageRegistry {
    inner: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    /// View-produced storages, shared by every reader.
    shared: HashMap<String, Vec<AnyMetricStorage>>,
    /// Default-configuration storages, one set per reader.
    per_collector: HashMap<CollectorHandle, HashMap<String, Vec<AnyMetricStorage>>>,
}

impl MetricStorageRegistry {
    pub(crate) fn register(&self, storage: AnyMetricStorage) {
        let name = normalize(storage.descriptor().name());
        if let Ok(mut state) = self.inner.lock() {
            state.shared.entry(name).or_default().push(storage);
        }
    }

    pub(crate) fn register_for_collector(
        &self,
        collector: CollectorHandle,
        storage: AnyMetricStorage,
    ) {
        let name = normalize(storage.descriptor().name());
        if let Ok(mut state) = self.inner.lock() {
            state
                .per_collector
                .entry(collector)
                .or_default()
                .entry(name)
                .or_default()
                .push(storage);
        }
    }

    /// Looks for an already-registered shared storage compatible with the
    /// descriptor, resolving description mismatches on the way.
    pub(crate) fn find_or_update_compatible_storage(
        &self,
        descriptor: &InstrumentDescriptor,
    ) -> Option<AnyMetricStorage> {
        let state = self.inner.lock().ok()?;
        find_or_update(state.shared.get(&normalize(descriptor.name()))?, descriptor)
    }

    /// Per-reader variant of
    /// [`find_or_update_compatible_storage`](Self::find_or_update_compatible_storage).
    pub(crate) fn find_or_update_compatible_collector_storage(
        &self,
        collector: CollectorHandle,
        descriptor: &InstrumentDescriptor,
    ) -> Option<AnyMetricStorage> {
        let state = self.inner.lock().ok()?;
        let storages = state
            .per_collector
            .get(&collector)?
            .get(&normalize(descriptor.name()))?;
        find_or_update(storages, descriptor)
    }

    /// Every storage the given reader collects from: all shared storages plus
    /// its own default-configuration ones.
    pub(crate) fn storages_for(&self, collector: CollectorHandle) -> Vec<AnyMetricStorage> {
        let Ok(state) = self.inner.lock() else {
            return Vec::new();
        };
        let mut storages: Vec<AnyMetricStorage> =
            state.shared.values().flatten().cloned().collect();
        if let Some(own) = state.per_collector.get(&collector) {
            storages.extend(own.values().flatten().cloned());
        }
        storages
    }
}

fn normalize(name: &str) -> String {
    name.to_ascii_lowercase()
}

fn find_or_update(
    storages: &[AnyMetricStorage],
    descriptor: &InstrumentDescriptor,
) -> Option<AnyMetricStorage> {
    let mut compatible = None;
    for storage in storages {
        let existing = storage.descriptor();
        if existing.is_compatible_with(descriptor) {
            if existing.description() != descriptor.description() {
                if descriptor.description().len() > existing.description().len() {
                    storage.update_description(descriptor.description.clone());
                }
                otel_warn!(
                    name: "MetricStorageRegistry.DescriptionMismatch",
                    message = "an instrument with this name was already registered with a different description; the longer description is kept",
                    instrument = existing.name().to_string(),
                    existing_description = existing.description().to_string(),
                    incoming_description = descriptor.description().to_string(),
                );
            }
            compatible = Some(storage.clone());
        } else {
            otel_warn!(
                name: "MetricStorageRegistry.DuplicateInstrumentName",
                message = "an incompatible instrument with this name is already registered; both will be exported independently",
                details = incompatibility_details(&existing, descriptor),
                resolution = conflict_resolution_recipe(&existing, descriptor),
            );
        }
    }
    compatible
}

fn incompatibility_details(
    existing: &InstrumentDescriptor,
    other: &InstrumentDescriptor,
) -> String {
    format!(
        "names: ({} and {}), kinds: ({:?} and {:?}), units: ({:?} and {:?}), value types: ({:?} and {:?})",
        existing.name(),
        other.name(),
        existing.kind(),
        other.kind(),
        existing.unit(),
        other.unit(),
        existing.value_type(),
        other.value_type(),
    )
}

fn conflict_resolution_recipe(
    existing: &InstrumentDescriptor,
    other: &InstrumentDescriptor,
) -> String {
    if existing.kind() != other.kind() {
        return format!(
            "use a different instrument kind, or pick a name other than '{}'",
            other.name()
        );
    }
    if existing.unit() != other.unit() {
        return format!(
            "use unit '{}' on instrument creation, or pick a name other than '{}'",
            existing.unit(),
            other.name()
        );
    }
    if existing.value_type() != other.value_type() {
        return format!(
            "use value type {:?} on instrument creation, or pick a name other than '{}'",
            existing.value_type(),
            other.name()
        );
    }
    String::new()
}
