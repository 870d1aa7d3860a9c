use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use opentelemetry::KeyValue;

use crate::storage::SyncMetricStorage;

/// Fan-out handle for a synchronous instrument shaped by several views.
///
/// Every recorded measurement is forwarded unchanged to each underlying
/// storage; each storage then applies its own view's attribute filtering and
/// aggregation.
#[derive(Clone, Default)]
pub struct MultiMetricStorage {
    storages: Vec<Arc<SyncMetricStorage>>,
}

impl MultiMetricStorage {
    pub(crate) fn new(storages: Vec<Arc<SyncMetricStorage>>) -> Self {
        MultiMetricStorage { storages }
    }

    /// Records one measurement to every underlying storage.
    pub fn record(&self, value: f64, attributes: &[KeyValue], record_time: SystemTime) {
        for storage in &self.storages {
            storage.record(value, attributes, record_time);
        }
    }

    /// Whether this instrument is backed by any storage at all.
    pub fn is_empty(&self) -> bool {
        self.storages.is_empty()
    }
}

impl fmt::Debug for MultiMetricStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiMetricStorage")
            .field("storages", &self.storages.len())
            .finish()
    }
}
