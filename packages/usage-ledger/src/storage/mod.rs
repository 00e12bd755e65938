use std::collections::HashSet;

use async_trait::async_trait;

use crate::model::{EventKey, EventRecord};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;

// ============================================================================
// STORAGE: the durable ledger (read once, written once per batch)
// ============================================================================

/// A store failure that knows whether re-driving the batch can help.
pub trait StoreError: std::error::Error + Send + Sync + 'static {
    /// Connection drops and timeouts are transient. Constraint violations and
    /// corrupt rows fail the same way on every attempt.
    fn is_transient(&self) -> bool;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    type Error: StoreError;

    /// Every stored record whose [`EventKey`] is in `keys`, deductions
    /// included. No ordering is guaranteed.
    async fn find_conflicting_events(
        &self,
        keys: &HashSet<EventKey>,
    ) -> Result<Vec<EventRecord>, Self::Error>;

    /// Persist all records atomically, assigning each a `record_date`.
    ///
    /// Record dates are strictly increasing in input order. Returns the saved
    /// records in input order.
    async fn save_all(&self, records: Vec<EventRecord>) -> Result<Vec<EventRecord>, Self::Error>;
}
