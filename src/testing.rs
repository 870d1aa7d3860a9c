//! In-memory reader for exercising the engine in tests.

use crate::data::Temporality;
use crate::instrument::InstrumentKind;
use crate::reader::{MetricReader, DEFAULT_CARDINALITY_LIMIT};

/// A [`MetricReader`] with a fixed temporality and cardinality limit.
///
/// Register it through
/// [`MeterProviderBuilder::with_reader`](crate::MeterProviderBuilder::with_reader)
/// and drive collection manually with
/// [`MeterProviderSharedState::collect`](crate::MeterProviderSharedState::collect).
#[derive(Debug, Clone)]
pub struct TestReader {
    temporality: Temporality,
    cardinality_limit: usize,
}

impl TestReader {
    /// A reader requesting the given temporality for every instrument kind.
    pub fn new(temporality: Temporality) -> Self {
        TestReader {
            temporality,
            cardinality_limit: DEFAULT_CARDINALITY_LIMIT,
        }
    }

    /// Override the cardinality limit the reader requests.
    pub fn with_cardinality_limit(mut self, limit: usize) -> Self {
        self.cardinality_limit = limit;
        self
    }
}

impl MetricReader for TestReader {
    fn temporality(&self, _kind: InstrumentKind) -> Temporality {
        self.temporality
    }

    fn cardinality_limit(&self, _kind: InstrumentKind) -> usize {
        self.cardinality_limit
    }
}
