//! In-process metrics aggregation engine for the OpenTelemetry metrics
//! collection framework.
//!
//! This crate turns individual measurement events (counter increments,
//! histogram observations, gauge samples) into periodically collected,
//! temporally consistent metric streams. Any number of independent readers
//! may attach to the same engine, each with its own aggregation temporality
//! (delta or cumulative) and cardinality preferences, without interfering
//! with each other's view of the data.
//!
//! # Overview
//!
//! A [`MeterProviderSharedState`] is built from readers (anything
//! implementing [`MetricReader`]) and optional [`View`]s. It hands out one
//! [`MeterSharedState`] per instrumentation scope, where instruments are
//! registered:
//!
//! * synchronous instruments get a [`MultiMetricStorage`] to record through,
//! * observable instruments get an [`ObservableInstrument`] to attach
//!   callbacks to.
//!
//! Collection is driven per reader: [`MeterProviderSharedState::collect`]
//! runs all observable callbacks under a timeout, pulls every storage and
//! returns a [`CollectionResult`] carrying the produced [`ScopeMetrics`]
//! alongside any callback or timeout errors. Nothing in the engine is fatal;
//! invalid measurements are logged and dropped, and collection always
//! returns the best-effort data it could assemble.
//!
//! ```
//! use opentelemetry::{InstrumentationScope, KeyValue};
//! use opentelemetry_sdk_metrics::{
//!     InstrumentDescriptor, InstrumentKind, MeterProviderSharedState, Temporality, ValueType,
//!     DEFAULT_OBSERVE_TIMEOUT,
//! };
//! use opentelemetry_sdk_metrics::testing::TestReader;
//!
//! let provider = MeterProviderSharedState::builder()
//!     .with_reader(TestReader::new(Temporality::Delta))
//!     .build();
//! let meter = provider.meter(InstrumentationScope::builder("app").build());
//!
//! let requests = meter
//!     .register_sync_instrument(InstrumentDescriptor::new(
//!         "http.server.requests",
//!         InstrumentKind::Counter,
//!         ValueType::Int,
//!     ))
//!     .unwrap();
//! requests.record(1.0, &[KeyValue::new("route", "/")], opentelemetry::time::now());
//!
//! let handle = provider.collector_handles()[0];
//! let result = provider.collect_blocking(handle, DEFAULT_OBSERVE_TIMEOUT);
//! assert_eq!(result.scope_metrics.len(), 1);
//! ```
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]
#![doc(
    html_logo_url = "https://raw.githubusercontent.com/open-telemetry/opentelemetry-rust/main/assets/logo.svg"
)]
#![cfg_attr(test, deny(warnings))]

mod aggregation;
mod aggregator;
mod attributes;
mod data;
mod error;
mod instrument;
mod observable;
mod processor;
mod reader;
mod state;
mod storage;
pub mod testing;
mod view;

pub use aggregation::{Aggregation, DEFAULT_HISTOGRAM_BOUNDARIES};
pub use attributes::OVERFLOW_ATTRIBUTE_KEY;
pub use data::{
    CollectionResult, GaugeDataPoint, HistogramDataPoint, MetricData, MetricPoints, ScopeMetrics,
    SumDataPoint, Temporality,
};
pub use error::{MetricError, MetricResult};
pub use instrument::{Advice, InstrumentDescriptor, InstrumentKind, ValueType};
pub use observable::{
    BatchObservableCallback, BatchObservableResult, ObservableCallback, ObservableInstrument,
    ObservableResult,
};
pub use reader::{CollectorHandle, MetricReader, DEFAULT_CARDINALITY_LIMIT};
pub use state::{
    MeterProviderBuilder, MeterProviderSharedState, MeterSharedState, DEFAULT_OBSERVE_TIMEOUT,
};
pub use storage::MultiMetricStorage;
pub use view::{AttributesProcessor, View, ViewBuilder};
