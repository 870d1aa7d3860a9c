use std::fmt;
use std::sync::Arc;

use crate::data::Temporality;
use crate::instrument::InstrumentKind;

/// Default number of distinct attribute sets tracked per stream and
/// collection window before measurements spill into the overflow series.
pub const DEFAULT_CARDINALITY_LIMIT: usize = 2000;

/// The consumer-side interface of the aggregation engine.
///
/// A reader registers with the provider at construction time and from then
/// on drives collection at its own cadence. Its answers here are fixed per
/// instrument kind: the temporality choice is made once per instrument and
/// memoized for the reader's lifetime, it must not flip mid-stream.
pub trait MetricReader: Send + Sync + 'static {
    /// The aggregation temporality this reader wants for the instrument kind.
    fn temporality(&self, kind: InstrumentKind) -> Temporality;

    /// The maximum number of attribute sets this reader wants tracked per
    /// stream of the instrument kind.
    fn cardinality_limit(&self, kind: InstrumentKind) -> usize {
        let _ = kind;
        DEFAULT_CARDINALITY_LIMIT
    }
}

/// Opaque identity of one registered reader.
///
/// Handles are assigned in registration order and stay valid for the life of
/// the provider; they key all per-reader aggregation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollectorHandle(pub(crate) usize);

/// One registered reader together with its stable identity, as seen from
/// inside the engine.
#[derive(Clone)]
pub(crate) struct MetricCollector {
    handle: CollectorHandle,
    reader: Arc<dyn MetricReader>,
}

impl MetricCollector {
    pub(crate) fn new(handle: CollectorHandle, reader: Arc<dyn MetricReader>) -> Self {
        MetricCollector { handle, reader }
    }

    pub(crate) fn handle(&self) -> CollectorHandle {
        self.handle
    }

    pub(crate) fn select_aggregation_temporality(&self, kind: InstrumentKind) -> Temporality {
        self.reader.temporality(kind)
    }

    pub(crate) fn select_cardinality_limit(&self, kind: InstrumentKind) -> usize {
        self.reader.cardinality_limit(kind)
    }
}

impl fmt::Debug for MetricCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricCollector")
            .field("handle", &self.handle)
            .finish()
    }
}
