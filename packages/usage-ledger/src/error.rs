//! Error taxonomy for conflict resolution.
//!
//! Resolution either produces a complete, consistent record set for the batch
//! or fails the whole call. Nothing here is recovered inside the engine:
//!
//! - [`LedgerError::MalformedEvent`] and [`LedgerError::MissingMetricId`] mean an
//!   event reached the resolver without passing through normalization. Fatal.
//! - [`LedgerError::MissingMeasurement`] means a stored event contradicts the
//!   ledger invariants. Fatal, and needs an operator to look at the data.
//! - [`LedgerError::Store`] wraps a failure of the backing store. When the store
//!   reports it as transient the caller may retry the whole batch: the read and
//!   the computation are both deterministic.

use thiserror::Error;

use crate::conflict::UsageConflictKey;
use crate::storage::StoreError;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// An event did not carry exactly one product tag and one measurement.
    #[error(
        "event must carry exactly one product tag and one measurement \
         (found {tags} tags, {measurements} measurements)"
    )]
    MalformedEvent { tags: usize, measurements: usize },

    /// The single measurement of an event has no metric id.
    #[error("event measurement has no metric_id")]
    MissingMetricId,

    /// A conflicting event has no measurement for the metric in conflict.
    #[error("conflicting event for {key} has no measurement for metric {metric_id}")]
    MissingMeasurement {
        key: UsageConflictKey,
        metric_id: String,
    },

    /// The event store failed to read or write.
    #[error("event store failure: {source}")]
    Store {
        #[source]
        source: anyhow::Error,
        transient: bool,
    },
}

impl LedgerError {
    /// Wrap a store error, keeping the store's view of whether it is transient.
    pub fn store<E: StoreError>(err: E) -> Self {
        LedgerError::Store {
            transient: err.is_transient(),
            source: anyhow::Error::new(err),
        }
    }

    /// Whether re-driving the whole batch can succeed.
    ///
    /// Only transient store failures qualify. Everything else is a property of
    /// the data and will fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Store { transient: true, .. })
    }
}
