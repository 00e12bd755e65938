//! In-memory event store for tests and local runs.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use thiserror::Error;

use super::{EventStore, StoreError};
use crate::model::{EventKey, EventRecord};

#[derive(Debug, Error)]
pub enum InMemoryStoreError {
    #[error("mutex poisoned: {0}")]
    Poisoned(String),
    #[error("record {0} already exists")]
    Duplicate(String),
}

impl StoreError for InMemoryStoreError {
    fn is_transient(&self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
struct Ledger {
    records: Vec<EventRecord>,
    last_record_date: Option<DateTime<Utc>>,
}

impl Ledger {
    /// Next record date at microsecond precision, strictly after the last.
    fn next_record_date(&mut self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        let next = match self.last_record_date {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_record_date = Some(next);
        next
    }
}

/// Ledger held in a `Vec` behind a mutex.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    ledger: Mutex<Ledger>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record saved so far, in save order.
    pub fn records(&self) -> Result<Vec<EventRecord>, InMemoryStoreError> {
        let ledger = self
            .ledger
            .lock()
            .map_err(|e| InMemoryStoreError::Poisoned(e.to_string()))?;
        Ok(ledger.records.clone())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    type Error = InMemoryStoreError;

    async fn find_conflicting_events(
        &self,
        keys: &HashSet<EventKey>,
    ) -> Result<Vec<EventRecord>, Self::Error> {
        let ledger = self
            .ledger
            .lock()
            .map_err(|e| InMemoryStoreError::Poisoned(e.to_string()))?;

        Ok(ledger
            .records
            .iter()
            .filter(|record| keys.contains(&record.key()))
            .cloned()
            .collect())
    }

    async fn save_all(&self, records: Vec<EventRecord>) -> Result<Vec<EventRecord>, Self::Error> {
        let mut ledger = self
            .ledger
            .lock()
            .map_err(|e| InMemoryStoreError::Poisoned(e.to_string()))?;

        // All or nothing: check every id before writing any.
        let existing: HashSet<_> = ledger.records.iter().map(|r| r.id).collect();
        let mut incoming = HashSet::with_capacity(records.len());
        if let Some(duplicate) = records
            .iter()
            .find(|r| existing.contains(&r.id) || !incoming.insert(r.id))
        {
            return Err(InMemoryStoreError::Duplicate(duplicate.id.to_string()));
        }

        let mut saved = Vec::with_capacity(records.len());
        for mut record in records {
            let at = ledger.next_record_date();
            record.mark_persisted(at);
            saved.push(record);
        }
        ledger.records.extend(saved.iter().cloned());
        Ok(saved)
    }
}
