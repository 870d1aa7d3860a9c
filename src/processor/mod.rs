//! The two halves of the aggregation pipeline.
//!
//! [`delta::DeltaMetricProcessor`] owns the uncollected accumulations of one
//! stream and bounds their cardinality; [`temporal::TemporalMetricProcessor`]
//! converts the stream of collected delta snapshots into whatever temporality
//! each registered reader asked for.

pub(crate) mod delta;
pub(crate) mod temporal;
