//! Driving of observable instruments.
//!
//! Observable instruments do not record on the application's hot path;
//! instead user callbacks are invoked once per collection cycle and report a
//! full set of absolute readings through a result sink. The registry runs all
//! callbacks concurrently and races the whole cycle against a deadline: a
//! callback that fails contributes an error without disturbing the others,
//! and one that never finishes is abandoned once the deadline passes.
//!
//! Each callback observes into its own buffer and a finished callback flushes
//! that buffer to its instrument's storages within its own task. Abandoning a
//! late callback therefore drops its buffer whole; it can never mutate state
//! the collection cycle has already read.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use futures_timer::Delay;
use futures_util::future::{self, BoxFuture, Either};
use futures_util::pin_mut;
use futures_util::stream::{FuturesUnordered, StreamExt};
use opentelemetry::{otel_warn, KeyValue};

use crate::attributes::AttributeMap;
use crate::error::{MetricError, MetricResult};
use crate::instrument::InstrumentDescriptor;
use crate::storage::{coerce_measurement, AsyncMetricStorage};

/// A callback attached to a single observable instrument.
///
/// Invoked once per collection cycle with a sink for that instrument's
/// readings. The returned future may report a failure; it is surfaced in the
/// collection's error list without affecting other callbacks.
pub type ObservableCallback =
    dyn Fn(ObservableResult) -> BoxFuture<'static, MetricResult<()>> + Send + Sync;

/// A callback observing several instruments in one invocation.
///
/// Receives a shared sink that routes each reading to the instrument it was
/// observed for.
pub type BatchObservableCallback =
    dyn Fn(BatchObservableResult) -> BoxFuture<'static, MetricResult<()>> + Send + Sync;

/// One registered observable instrument stream.
///
/// Holds the storages created for the instrument at registration time; each
/// observation cycle's readings are fanned out to all of them.
pub struct ObservableInstrument {
    descriptor: InstrumentDescriptor,
    storages: Vec<Arc<AsyncMetricStorage>>,
}

impl ObservableInstrument {
    pub(crate) fn new(
        descriptor: InstrumentDescriptor,
        storages: Vec<Arc<AsyncMetricStorage>>,
    ) -> Self {
        ObservableInstrument {
            descriptor,
            storages,
        }
    }

    /// The identity of this instrument stream.
    pub fn descriptor(&self) -> &InstrumentDescriptor {
        &self.descriptor
    }

    fn record_cycle(&self, measurements: AttributeMap<f64>, observation_time: SystemTime) {
        if measurements.is_empty() {
            return;
        }
        for storage in &self.storages {
            storage.record(measurements.clone(), observation_time);
        }
    }
}

impl fmt::Debug for ObservableInstrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableInstrument")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// The sink a single-instrument callback reports its readings through.
///
/// One reading per attribute set and cycle; observing the same attribute set
/// twice keeps the later value.
#[derive(Clone)]
pub struct ObservableResult {
    instrument: Arc<ObservableInstrument>,
    buffer: Arc<Mutex<AttributeMap<f64>>>,
}

impl ObservableResult {
    fn new(instrument: Arc<ObservableInstrument>) -> Self {
        ObservableResult {
            instrument,
            buffer: Arc::new(Mutex::new(AttributeMap::new())),
        }
    }

    /// Reports the current absolute value for one attribute set.
    pub fn observe(&self, value: f64, attributes: &[KeyValue]) {
        let Some(value) = coerce_measurement(self.instrument.descriptor(), value) else {
            return;
        };
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.set(attributes, value);
        }
    }

    fn take_buffer(&self) -> AttributeMap<f64> {
        self.buffer
            .lock()
            .map(|mut buffer| std::mem::take(&mut *buffer))
            .unwrap_or_default()
    }
}

impl fmt::Debug for ObservableResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableResult")
            .field("instrument", &self.instrument)
            .finish()
    }
}

/// The shared sink a batch callback reports through, routing each reading to
/// the instrument it belongs to.
#[derive(Clone)]
pub struct BatchObservableResult {
    instruments: Vec<Arc<ObservableInstrument>>,
    buffers: Arc<Mutex<HashMap<usize, AttributeMap<f64>>>>,
}

impl BatchObservableResult {
    fn new(instruments: Vec<Arc<ObservableInstrument>>) -> Self {
        BatchObservableResult {
            instruments,
            buffers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Reports the current absolute value of one instrument for one attribute
    /// set.
    ///
    /// The instrument must be one of those the callback was registered with;
    /// readings for any other instrument are logged and dropped.
    pub fn observe(
        &self,
        instrument: &Arc<ObservableInstrument>,
        value: f64,
        attributes: &[KeyValue],
    ) {
        let Some(index) = self
            .instruments
            .iter()
            .position(|registered| Arc::ptr_eq(registered, instrument))
        else {
            otel_warn!(
                name: "BatchObservableResult.UnregisteredInstrument",
                message = "the observed instrument was not registered with this batch callback, dropping the measurement",
                instrument = instrument.descriptor().name().to_string(),
            );
            return;
        };
        let Some(value) = coerce_measurement(instrument.descriptor(), value) else {
            return;
        };
        if let Ok(mut buffers) = self.buffers.lock() {
            buffers.entry(index).or_default().set(attributes, value);
        }
    }

    fn take_buffers(&self) -> Vec<(Arc<ObservableInstrument>, AttributeMap<f64>)> {
        let Ok(mut buffers) = self.buffers.lock() else {
            return Vec::new();
        };
        buffers
            .drain()
            .map(|(index, buffer)| (Arc::clone(&self.instruments[index]), buffer))
            .collect()
    }
}

impl fmt::Debug for BatchObservableResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchObservableResult")
            .field("instruments", &self.instruments)
            .finish()
    }
}

/// The set of observable callbacks registered with one meter.
///
/// Callbacks are deduplicated by pointer identity on registration and removed
/// by the same key.
#[derive(Default)]
pub(crate) struct ObservableRegistry {
    inner: Mutex<RegisteredCallbacks>,
}

#[derive(Default)]
struct RegisteredCallbacks {
    single: Vec<(Arc<ObservableCallback>, Arc<ObservableInstrument>)>,
    batch: Vec<(Arc<BatchObservableCallback>, Vec<Arc<ObservableInstrument>>)>,
}

impl ObservableRegistry {
    pub(crate) fn register_callback(
        &self,
        callback: Arc<ObservableCallback>,
        instrument: Arc<ObservableInstrument>,
    ) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let registered = inner.single.iter().any(|(cb, inst)| {
            Arc::ptr_eq(cb, &callback) && Arc::ptr_eq(inst, &instrument)
        });
        if !registered {
            inner.single.push((callback, instrument));
        }
    }

    pub(crate) fn unregister_callback(
        &self,
        callback: &Arc<ObservableCallback>,
        instrument: &Arc<ObservableInstrument>,
    ) {
        if let Ok(mut inner) = self.inner.lock() {
            inner
                .single
                .retain(|(cb, inst)| !(Arc::ptr_eq(cb, callback) && Arc::ptr_eq(inst, instrument)));
        }
    }

    pub(crate) fn register_batch_callback(
        &self,
        callback: Arc<BatchObservableCallback>,
        instruments: Vec<Arc<ObservableInstrument>>,
    ) {
        if instruments.is_empty() {
            otel_warn!(
                name: "ObservableRegistry.EmptyBatchCallback",
                message = "a batch callback with no instruments will never be invoked, ignoring the registration",
            );
            return;
        }
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let registered = inner
            .batch
            .iter()
            .any(|(cb, insts)| Arc::ptr_eq(cb, &callback) && same_instruments(insts, &instruments));
        if !registered {
            inner.batch.push((callback, instruments));
        }
    }

    pub(crate) fn unregister_batch_callback(
        &self,
        callback: &Arc<BatchObservableCallback>,
        instruments: &[Arc<ObservableInstrument>],
    ) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.batch.retain(|(cb, insts)| {
                !(Arc::ptr_eq(cb, callback) && same_instruments(insts, instruments))
            });
        }
    }

    /// Runs one observation cycle: every registered callback, concurrently,
    /// raced against the deadline.
    ///
    /// Returns the errors gathered along the way. A finished callback's
    /// readings reach its instrument's storages even when other callbacks fail
    /// or time out; once the deadline passes a [`MetricError::Timeout`] is
    /// recorded and the callbacks still in flight are dropped along with
    /// whatever they had observed so far.
    pub(crate) async fn observe(
        &self,
        collection_time: SystemTime,
        timeout: Duration,
    ) -> Vec<MetricError> {
        let (single, batch) = {
            let Ok(inner) = self.inner.lock() else {
                return Vec::new();
            };
            (inner.single.clone(), inner.batch.clone())
        };
        if single.is_empty() && batch.is_empty() {
            return Vec::new();
        }

        let errors: Arc<Mutex<Vec<MetricError>>> = Arc::default();
        let mut tasks: FuturesUnordered<BoxFuture<'static, ()>> = FuturesUnordered::new();
        for (callback, instrument) in single {
            let errors = Arc::clone(&errors);
            tasks.push(Box::pin(async move {
                let result = ObservableResult::new(Arc::clone(&instrument));
                let outcome = callback(result.clone()).await;
                instrument.record_cycle(result.take_buffer(), collection_time);
                if let Err(err) = outcome {
                    if let Ok(mut errors) = errors.lock() {
                        errors.push(MetricError::Callback(err.to_string()));
                    }
                }
            }));
        }
        for (callback, instruments) in batch {
            let errors = Arc::clone(&errors);
            tasks.push(Box::pin(async move {
                let result = BatchObservableResult::new(instruments);
                let outcome = callback(result.clone()).await;
                for (instrument, buffer) in result.take_buffers() {
                    instrument.record_cycle(buffer, collection_time);
                }
                if let Err(err) = outcome {
                    if let Ok(mut errors) = errors.lock() {
                        errors.push(MetricError::Callback(err.to_string()));
                    }
                }
            }));
        }

        let drain = async move { while tasks.next().await.is_some() {} };
        pin_mut!(drain);
        let deadline = Delay::new(timeout);
        pin_mut!(deadline);
        if let Either::Right(_) = future::select(drain, deadline).await {
            if let Ok(mut errors) = errors.lock() {
                errors.push(MetricError::Timeout(timeout));
            }
        }

        errors
            .lock()
            .map(|mut errors| std::mem::take(&mut *errors))
            .unwrap_or_default()
    }
}

fn same_instruments(a: &[Arc<ObservableInstrument>], b: &[Arc<ObservableInstrument>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| Arc::ptr_eq(x, y))
}
