//! Grouping of measurements by attribute set.
//!
//! Attribute sets are canonicalized into a deterministic string key by
//! sorting entries by key and rendering `[key, value]` pairs as JSON. The
//! rendering is faithful, not a digest: two sets share a key exactly when
//! they carry the same entries, so the key can double as the grouping
//! identity without storing a reverse index.

use indexmap::IndexMap;
use opentelemetry::{Array, KeyValue, Value};

/// Key of the series measurements are diverted to once a stream is over its
/// cardinality limit.
pub const OVERFLOW_ATTRIBUTE_KEY: &str = "otel.metric.overflow";

pub(crate) fn overflow_attributes() -> Vec<KeyValue> {
    vec![KeyValue::new(OVERFLOW_ATTRIBUTE_KEY, true)]
}

/// Canonicalizes an attribute set.
///
/// Entries are sorted by key; for duplicate keys the last write wins. Returns
/// the canonical key alongside the normalized attribute vector used for
/// export.
pub(crate) fn canonicalize(attributes: &[KeyValue]) -> (String, Vec<KeyValue>) {
    let mut sorted = attributes.to_vec();
    sorted.sort_by(|a, b| a.key.as_str().cmp(b.key.as_str()));

    let mut deduped: Vec<KeyValue> = Vec::with_capacity(sorted.len());
    for kv in sorted {
        match deduped.last_mut() {
            Some(last) if last.key == kv.key => *last = kv,
            _ => deduped.push(kv),
        }
    }

    let entries = deduped
        .iter()
        .map(|kv| {
            serde_json::Value::Array(vec![
                serde_json::Value::from(kv.key.as_str()),
                value_to_json(&kv.value),
            ])
        })
        .collect();
    (serde_json::Value::Array(entries).to_string(), deduped)
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Bool(b) => serde_json::Value::from(*b),
        Value::I64(i) => serde_json::Value::from(*i),
        Value::F64(f) => serde_json::Value::from(*f),
        Value::String(s) => serde_json::Value::from(s.as_str()),
        Value::Array(array) => match array {
            Array::Bool(items) => serde_json::Value::from(items.clone()),
            Array::I64(items) => serde_json::Value::from(items.clone()),
            Array::F64(items) => serde_json::Value::from(items.clone()),
            Array::String(items) => {
                serde_json::Value::from(items.iter().map(|s| s.as_str()).collect::<Vec<_>>())
            }
            _ => serde_json::Value::from(array.to_string()),
        },
        _ => serde_json::Value::from(value.as_str().into_owned()),
    }
}

/// An insertion-ordered map from canonical attribute-set keys to values,
/// keeping the normalized attribute vector alongside each entry for export.
#[derive(Debug, Clone)]
pub(crate) struct AttributeMap<V> {
    inner: IndexMap<String, (Vec<KeyValue>, V)>,
}

impl<V> Default for AttributeMap<V> {
    fn default() -> Self {
        AttributeMap {
            inner: IndexMap::new(),
        }
    }
}

impl<V> AttributeMap<V> {
    pub(crate) fn new() -> Self {
        Default::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub(crate) fn get(&self, key: &str) -> Option<&V> {
        self.inner.get(key).map(|(_, v)| v)
    }

    pub(crate) fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.inner.get_mut(key).map(|(_, v)| v)
    }

    /// Inserts or replaces the value for the given attribute set.
    pub(crate) fn set(&mut self, attributes: &[KeyValue], value: V) {
        let (key, attributes) = canonicalize(attributes);
        self.set_canonical(key, attributes, value);
    }

    /// Inserts or replaces the value for an already-canonicalized entry.
    pub(crate) fn set_canonical(&mut self, key: String, attributes: Vec<KeyValue>, value: V) {
        self.inner.insert(key, (attributes, value));
    }

    /// Returns the value for the given attribute set, inserting the default
    /// first if the set was not yet tracked.
    pub(crate) fn get_or_insert_with(
        &mut self,
        attributes: &[KeyValue],
        default: impl FnOnce() -> V,
    ) -> &mut V {
        let (key, attributes) = canonicalize(attributes);
        let (_, value) = self
            .inner
            .entry(key)
            .or_insert_with(|| (attributes, default()));
        value
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &String> {
        self.inner.keys()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&Vec<KeyValue>, &V)> {
        self.inner.values().map(|(attrs, v)| (attrs, v))
    }

    pub(crate) fn into_entries(self) -> impl Iterator<Item = (String, Vec<KeyValue>, V)> {
        self.inner.into_iter().map(|(k, (attrs, v))| (k, attrs, v))
    }
}
