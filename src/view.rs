//! Declarative reshaping of instrument streams.
//!
//! A [`View`] pairs a selector (which instruments, from which meters) with a
//! set of stream overrides (rename, aggregation, attribute filtering,
//! cardinality limit). Views are immutable once registered; matching is
//! many-to-many, one instrument may be shaped by several views at once, each
//! producing its own storage.

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::Arc;

use opentelemetry::{InstrumentationScope, Key, KeyValue};

use crate::aggregation::Aggregation;
use crate::error::{MetricError, MetricResult};
use crate::instrument::{
    validate_instrument_name, validate_instrument_unit, InstrumentDescriptor, InstrumentKind,
};

/// Keeps or drops attribute entries before they reach a stream's storage.
#[derive(Clone, Debug, Default)]
pub enum AttributesProcessor {
    /// Pass attributes through untouched.
    #[default]
    Noop,
    /// Keep only entries whose key is in the set.
    Allow(Arc<HashSet<Key>>),
    /// Drop entries whose key is in the set.
    Deny(Arc<HashSet<Key>>),
}

impl AttributesProcessor {
    pub(crate) fn process(&self, attributes: &[KeyValue]) -> Vec<KeyValue> {
        match self {
            AttributesProcessor::Noop => attributes.to_vec(),
            AttributesProcessor::Allow(allowed) => attributes
                .iter()
                .filter(|kv| allowed.contains(&kv.key))
                .cloned()
                .collect(),
            AttributesProcessor::Deny(denied) => attributes
                .iter()
                .filter(|kv| !denied.contains(&kv.key))
                .cloned()
                .collect(),
        }
    }
}

/// Matches `pattern` against `value`, where `*` matches any sequence of
/// characters and `?` matches exactly one.
fn wildcard_match(pattern: &str, value: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let value: Vec<char> = value.chars().collect();

    let (mut p, mut v) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while v < value.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == value[v]) {
            p += 1;
            v += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, v));
            p += 1;
        } else if let Some((star_p, star_v)) = star {
            // Backtrack: let the last '*' swallow one more character.
            p = star_p + 1;
            v = star_v + 1;
            star = Some((star_p, star_v + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

fn is_wildcard_pattern(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

/// A declarative rule remapping an instrument's name, aggregation or
/// attributes for the streams it produces.
#[derive(Clone, Debug)]
pub struct View {
    // selection criteria
    instrument_name: Option<Cow<'static, str>>,
    instrument_kind: Option<InstrumentKind>,
    instrument_unit: Option<Cow<'static, str>>,
    meter_name: Option<Cow<'static, str>>,
    meter_version: Option<Cow<'static, str>>,
    meter_schema_url: Option<Cow<'static, str>>,

    // stream overrides
    name: Option<Cow<'static, str>>,
    description: Option<Cow<'static, str>>,
    aggregation: Aggregation,
    attributes_processor: AttributesProcessor,
    cardinality_limit: Option<usize>,
}

impl View {
    /// Start building a view.
    pub fn builder() -> ViewBuilder {
        ViewBuilder::default()
    }

    /// Whether this view's selector matches the instrument and the meter it
    /// was created by.
    pub(crate) fn matches(
        &self,
        instrument: &InstrumentDescriptor,
        scope: &InstrumentationScope,
    ) -> bool {
        if let Some(kind) = self.instrument_kind {
            if kind != instrument.kind() {
                return false;
            }
        }
        if let Some(unit) = &self.instrument_unit {
            if unit != instrument.unit() {
                return false;
            }
        }
        if let Some(name) = &self.instrument_name {
            if !wildcard_match(name, instrument.name()) {
                return false;
            }
        }
        if let Some(meter_name) = &self.meter_name {
            if meter_name != scope.name() {
                return false;
            }
        }
        if let Some(version) = &self.meter_version {
            if Some(version.as_ref()) != scope.version() {
                return false;
            }
        }
        if let Some(schema_url) = &self.meter_schema_url {
            if Some(schema_url.as_ref()) != scope.schema_url() {
                return false;
            }
        }
        true
    }

    /// The descriptor of the stream this view produces for an instrument.
    pub(crate) fn stream_descriptor(
        &self,
        instrument: &InstrumentDescriptor,
    ) -> InstrumentDescriptor {
        let mut descriptor = instrument.clone();
        if let Some(name) = &self.name {
            descriptor.name = name.clone();
        }
        if let Some(description) = &self.description {
            descriptor.description = description.clone();
        }
        descriptor
    }

    pub(crate) fn aggregation(&self) -> &Aggregation {
        &self.aggregation
    }

    pub(crate) fn attributes_processor(&self) -> AttributesProcessor {
        self.attributes_processor.clone()
    }

    pub(crate) fn cardinality_limit(&self) -> Option<usize> {
        self.cardinality_limit
    }
}

/// Builder for [`View`] instances.
#[derive(Debug, Default)]
pub struct ViewBuilder {
    instrument_name: Option<Cow<'static, str>>,
    instrument_kind: Option<InstrumentKind>,
    instrument_unit: Option<Cow<'static, str>>,
    meter_name: Option<Cow<'static, str>>,
    meter_version: Option<Cow<'static, str>>,
    meter_schema_url: Option<Cow<'static, str>>,
    name: Option<Cow<'static, str>>,
    description: Option<Cow<'static, str>>,
    aggregation: Option<Aggregation>,
    attributes_processor: AttributesProcessor,
    cardinality_limit: Option<usize>,
}

impl ViewBuilder {
    /// Select instruments by name; `*` and `?` wildcards are supported.
    pub fn with_instrument_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.instrument_name = Some(name.into());
        self
    }

    /// Select instruments by kind.
    pub fn with_instrument_kind(mut self, kind: InstrumentKind) -> Self {
        self.instrument_kind = Some(kind);
        self
    }

    /// Select instruments by unit.
    pub fn with_instrument_unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.instrument_unit = Some(unit.into());
        self
    }

    /// Select instruments created by meters with this name.
    pub fn with_meter_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.meter_name = Some(name.into());
        self
    }

    /// Select instruments created by meters with this version.
    pub fn with_meter_version(mut self, version: impl Into<Cow<'static, str>>) -> Self {
        self.meter_version = Some(version.into());
        self
    }

    /// Select instruments created by meters with this schema URL.
    pub fn with_meter_schema_url(mut self, schema_url: impl Into<Cow<'static, str>>) -> Self {
        self.meter_schema_url = Some(schema_url.into());
        self
    }

    /// Rename the streams this view produces.
    ///
    /// Requires an instrument name selector without wildcards, so the view
    /// selects at most one instrument per meter.
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Override the description of the streams this view produces.
    pub fn with_description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Override the aggregation of the streams this view produces.
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    /// Keep only the given attribute keys on the streams this view produces.
    pub fn with_allowed_attribute_keys(
        mut self,
        keys: impl IntoIterator<Item = Key>,
    ) -> Self {
        self.attributes_processor =
            AttributesProcessor::Allow(Arc::new(keys.into_iter().collect()));
        self
    }

    /// Drop the given attribute keys from the streams this view produces.
    pub fn with_denied_attribute_keys(mut self, keys: impl IntoIterator<Item = Key>) -> Self {
        self.attributes_processor = AttributesProcessor::Deny(Arc::new(keys.into_iter().collect()));
        self
    }

    /// Limit the number of attribute sets tracked per stream and collection
    /// window.
    pub fn with_cardinality_limit(mut self, limit: usize) -> Self {
        self.cardinality_limit = Some(limit);
        self
    }

    /// Build the view.
    pub fn build(self) -> MetricResult<View> {
        if self.instrument_name.is_none()
            && self.instrument_kind.is_none()
            && self.instrument_unit.is_none()
            && self.meter_name.is_none()
            && self.meter_version.is_none()
            && self.meter_schema_url.is_none()
        {
            return Err(MetricError::Config(
                "cannot create a view with no selection criteria".into(),
            ));
        }

        if let Some(name) = &self.name {
            validate_instrument_name(name)?;
            match &self.instrument_name {
                Some(selector) if !is_wildcard_pattern(selector) => {}
                _ => {
                    return Err(MetricError::Config(
                        "a view that renames streams must select instruments by exact name".into(),
                    ))
                }
            }
        }

        if let Some(unit) = &self.instrument_unit {
            validate_instrument_unit(unit)?;
        }

        if let Some(limit) = self.cardinality_limit {
            if limit == 0 {
                return Err(MetricError::Config(
                    "cardinality limit must be greater than 0".into(),
                ));
            }
        }

        let aggregation = self.aggregation.unwrap_or(Aggregation::Default);
        aggregation.validate()?;

        Ok(View {
            instrument_name: self.instrument_name,
            instrument_kind: self.instrument_kind,
            instrument_unit: self.instrument_unit,
            meter_name: self.meter_name,
            meter_version: self.meter_version,
            meter_schema_url: self.meter_schema_url,
            name: self.name,
            description: self.description,
            aggregation,
            attributes_processor: self.attributes_processor,
            cardinality_limit: self.cardinality_limit,
        })
    }
}

/// The set of views registered with a provider.
#[derive(Debug, Default)]
pub(crate) struct ViewRegistry {
    views: Vec<View>,
}

impl ViewRegistry {
    pub(crate) fn new(views: Vec<View>) -> Self {
        ViewRegistry { views }
    }

    /// Every registered view whose selector matches the instrument.
    ///
    /// An empty result means the caller applies the default configuration for
    /// the instrument kind instead.
    pub(crate) fn find_views<'a>(
        &'a self,
        instrument: &'a InstrumentDescriptor,
        scope: &'a InstrumentationScope,
    ) -> impl Iterator<Item = &'a View> {
        self.views
            .iter()
            .filter(move |view| view.matches(instrument, scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::ValueType;

    fn scope(name: &'static str) -> InstrumentationScope {
        InstrumentationScope::builder(name).build()
    }

    #[test]
    fn wildcard_matching() {
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("http.*", "http.server.duration"));
        assert!(wildcard_match("http.?erver", "http.server"));
        assert!(wildcard_match("a*c", "abbbc"));
        assert!(wildcard_match("a*c", "ac"));
        assert!(!wildcard_match("http.*", "rpc.server.duration"));
        assert!(!wildcard_match("a?c", "ac"));
        assert!(!wildcard_match("abc", "abcd"));
    }

    #[test]
    fn view_requires_selection_criteria() {
        assert!(View::builder().build().is_err());
        assert!(View::builder().with_instrument_name("latency").build().is_ok());
    }

    #[test]
    fn rename_requires_exact_selector() {
        let err = View::builder()
            .with_instrument_name("http.*")
            .with_name("renamed")
            .build();
        assert!(err.is_err());

        let ok = View::builder()
            .with_instrument_name("http.server.duration")
            .with_name("renamed")
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn selector_matches_name_kind_and_meter() {
        let view = View::builder()
            .with_instrument_name("http.*")
            .with_instrument_kind(InstrumentKind::Histogram)
            .with_meter_name("http-server")
            .build()
            .unwrap();

        let matching = InstrumentDescriptor::new(
            "http.server.duration",
            InstrumentKind::Histogram,
            ValueType::Double,
        );
        assert!(view.matches(&matching, &scope("http-server")));
        assert!(!view.matches(&matching, &scope("grpc-server")));

        let wrong_kind = InstrumentDescriptor::new(
            "http.server.active_requests",
            InstrumentKind::UpDownCounter,
            ValueType::Int,
        );
        assert!(!view.matches(&wrong_kind, &scope("http-server")));
    }

    #[test]
    fn stream_descriptor_applies_overrides() {
        let view = View::builder()
            .with_instrument_name("latency")
            .with_name("http.latency")
            .with_description("request latency")
            .build()
            .unwrap();

        let instrument =
            InstrumentDescriptor::new("latency", InstrumentKind::Histogram, ValueType::Double)
                .with_unit("ms");
        let stream = view.stream_descriptor(&instrument);
        assert_eq!(stream.name(), "http.latency");
        assert_eq!(stream.description(), "request latency");
        assert_eq!(stream.unit(), "ms");
    }

    #[test]
    fn attribute_processors_filter_entries() {
        let attrs = [KeyValue::new("keep", 1), KeyValue::new("drop", 2)];

        let allow =
            AttributesProcessor::Allow(Arc::new([Key::new("keep")].into_iter().collect()));
        assert_eq!(allow.process(&attrs), vec![KeyValue::new("keep", 1)]);

        let deny = AttributesProcessor::Deny(Arc::new([Key::new("drop")].into_iter().collect()));
        assert_eq!(deny.process(&attrs), vec![KeyValue::new("keep", 1)]);

        assert_eq!(AttributesProcessor::Noop.process(&attrs).len(), 2);
    }

    #[test]
    fn registry_returns_all_matching_views() {
        let registry = ViewRegistry::new(vec![
            View::builder().with_instrument_name("a*").build().unwrap(),
            View::builder().with_instrument_name("b*").build().unwrap(),
            View::builder()
                .with_instrument_kind(InstrumentKind::Counter)
                .build()
                .unwrap(),
        ]);

        let instrument =
            InstrumentDescriptor::new("api.calls", InstrumentKind::Counter, ValueType::Int);
        let matches = registry.find_views(&instrument, &scope("m")).count();
        assert_eq!(matches, 2);
    }
}
