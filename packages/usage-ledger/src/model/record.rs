//! Grouping keys and the persisted ledger row.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Event;
use crate::id::EventRecordId;

/// Identity shared by every event that could conflict with another:
/// same organization, same usage instant, same instance.
///
/// The store batch-loads prior state by these keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub org_id: String,
    pub timestamp: DateTime<Utc>,
    pub instance_id: Option<String>,
}

impl EventKey {
    pub fn from_event(event: &Event) -> Self {
        Self {
            org_id: event.org_id.clone(),
            timestamp: event.timestamp,
            instance_id: event.instance_id.clone(),
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.org_id,
            self.timestamp.to_rfc3339(),
            self.instance_id.as_deref().unwrap_or("-")
        )
    }
}

/// A ledger row: an event plus its storage identity.
///
/// `record_date` is `None` until the store saves the row, at which point the
/// store assigns it and mirrors it into the embedded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventRecordId,
    pub org_id: String,
    pub timestamp: DateTime<Utc>,
    pub instance_id: Option<String>,
    pub record_date: Option<DateTime<Utc>>,
    pub event: Event,
}

impl EventRecord {
    /// Wrap an event for persistence under a fresh row id.
    ///
    /// The upstream `event_id` is not a row identity: flattening copies it into
    /// every (tag, metric) event and redelivery repeats it. The new id replaces
    /// it in the embedded event.
    pub fn new(mut event: Event) -> Self {
        let id = EventRecordId::new();
        event.event_id = Some(id.into_uuid());

        Self {
            id,
            org_id: event.org_id.clone(),
            timestamp: event.timestamp,
            instance_id: event.instance_id.clone(),
            record_date: event.record_date,
            event,
        }
    }

    pub fn key(&self) -> EventKey {
        EventKey {
            org_id: self.org_id.clone(),
            timestamp: self.timestamp,
            instance_id: self.instance_id.clone(),
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.record_date.is_some()
    }

    /// Stamp the row as saved at `at`.
    pub fn mark_persisted(&mut self, at: DateTime<Utc>) {
        self.record_date = Some(at);
        self.event.record_date = Some(at);
    }

    pub fn into_event(self) -> Event {
        self.event
    }
}
