//! # Usage Ledger
//!
//! Merges raw usage events from many sources into one replayable ledger of
//! effective usage per (organization, instant, instance, product, metric).
//!
//! ## Core Concepts
//!
//! The ledger is append-only. A corrected value never overwrites the old one:
//! - an **event** reports usage for one stream
//! - a **deduction** cancels the value of the event it supersedes
//!
//! Summing every record of a stream therefore always yields its current
//! value, whatever the history.
//!
//! ## Data Flow
//!
//! ```text
//! raw events (multi-tag, multi-metric, legacy fields)
//!     │
//!     ▼ EventNormalizer::prepare()
//! one event per (tag, metric)
//!     │
//!     ▼ EventConflictResolver::resolve_incoming_events()
//!     │      ├─► EventStore::find_conflicting_events()   (one read)
//!     │      └─► UsageConflictTracker per EventKey
//! [deduction?, event] per incoming event
//!     │
//!     ▼ EventStore::save_all()                            (one write)
//! ledger
//! ```
//!
//! ## Key Invariants
//!
//! 1. **One tag, one measurement** - the resolver rejects anything else
//! 2. **Deductions are never effective** - they only cancel
//! 3. **Deduction precedes replacement** - always emitted right before the
//!    event that caused it
//! 4. **Whole batch or nothing** - any error fails the call before a write
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use usage_ledger::{EventLedger, InMemoryEventStore, LedgerConfig};
//!
//! let ledger = EventLedger::new(Arc::new(InMemoryEventStore::new()), &LedgerConfig::from_env()?);
//! let saved = ledger.process_batch(events).await?;
//! ```

pub mod config;
pub mod conflict;
pub mod error;
pub mod id;
pub mod ledger;
pub mod model;
pub mod normalizer;
pub mod resolver;
pub mod storage;

pub use config::{ConflictPolicy, LedgerConfig};
pub use conflict::{
    compare_effective_order, EventConflictType, UsageConflictKey, UsageConflictTracker,
    UsageDescriptor,
};
pub use error::LedgerError;
pub use id::{EventRecordId, Id};
pub use ledger::{effective_value, EventLedger};
pub use model::{
    AmendmentType, BillingProvider, Event, EventKey, EventRecord, HardwareType, Measurement, Sla,
    Usage,
};
pub use normalizer::EventNormalizer;
pub use resolver::EventConflictResolver;
pub use storage::{EventStore, InMemoryEventStore, PostgresEventStore, StoreError};
