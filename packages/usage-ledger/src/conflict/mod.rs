//! Conflict detection primitives: stream identity, descriptor context, the
//! conflict taxonomy, and the per-pass tracker.

pub mod key;
pub mod kind;
pub mod tracker;

pub use key::{UsageConflictKey, UsageDescriptor};
pub use kind::EventConflictType;
pub use tracker::{compare_effective_order, UsageConflictTracker};
