//! Batch entry point: normalize, resolve, persist.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::LedgerConfig;
use crate::conflict::UsageConflictKey;
use crate::error::LedgerError;
use crate::model::{Event, EventKey, EventRecord};
use crate::normalizer::EventNormalizer;
use crate::resolver::EventConflictResolver;
use crate::storage::EventStore;

/// The ledger as seen by the ingestion service.
///
/// One call to [`EventLedger::process_batch`] is one read and one write
/// against the store. Callers must not run two batches sharing an
/// [`EventKey`] concurrently.
pub struct EventLedger<S> {
    store: Arc<S>,
    normalizer: EventNormalizer,
    resolver: EventConflictResolver<S>,
}

impl<S: EventStore> EventLedger<S> {
    pub fn new(store: Arc<S>, config: &LedgerConfig) -> Self {
        Self {
            normalizer: EventNormalizer::new(config.service_type_renames.clone()),
            resolver: EventConflictResolver::from_config(store.clone(), config),
            store,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Normalize and flatten raw events, resolve conflicts, save the result.
    ///
    /// Returns the saved records, deductions included, in save order. On
    /// error nothing has been written.
    pub async fn process_batch(&self, raw: Vec<Event>) -> Result<Vec<EventRecord>, LedgerError> {
        let raw_count = raw.len();
        let events: Vec<Event> = raw
            .into_iter()
            .flat_map(|event| self.normalizer.prepare(event))
            .collect();

        if events.is_empty() {
            info!(raw = raw_count, "batch has no usage to record");
            return Ok(Vec::new());
        }

        let resolved = self.resolver.resolve_incoming_events(events).await?;
        if resolved.is_empty() {
            return Ok(resolved);
        }

        let saved = self.store.save_all(resolved).await.map_err(|e| {
            warn!(error = %e, "failed to save resolved events");
            LedgerError::store(e)
        })?;

        info!(
            raw = raw_count,
            saved = saved.len(),
            deductions = saved.iter().filter(|r| r.event.is_deduction()).count(),
            "processed event batch"
        );
        Ok(saved)
    }
}

/// Current value of one usage stream: the sum of every ledger record for it.
///
/// Records for other event keys or other streams are ignored, as are the
/// other tags of multi-tag legacy rows.
pub fn effective_value<'a, I>(records: I, event_key: &EventKey, conflict_key: &UsageConflictKey) -> f64
where
    I: IntoIterator<Item = &'a EventRecord>,
{
    records
        .into_iter()
        .filter(|record| &record.key() == event_key)
        .map(|record| &record.event)
        .filter(|event| event.product_tag.contains(&conflict_key.product_tag))
        .filter_map(|event| event.measurement_for(&conflict_key.metric_id))
        .map(|measurement| measurement.value)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConflictPolicy;
    use crate::model::Measurement;
    use crate::storage::InMemoryEventStore;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeSet;

    fn raw(tags: &[&str], measurements: Vec<Measurement>) -> Event {
        Event::builder()
            .org_id("org1")
            .instance_id("i-1")
            .timestamp(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
            .product_tag(tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>())
            .measurements(measurements)
            .build()
    }

    fn ledger(policy: ConflictPolicy) -> EventLedger<InMemoryEventStore> {
        EventLedger::new(
            Arc::new(InMemoryEventStore::new()),
            &LedgerConfig::default().with_conflict_policy(policy),
        )
    }

    #[tokio::test]
    async fn test_process_batch_flattens_and_saves() {
        let ledger = ledger(ConflictPolicy::Literal);
        let saved = ledger
            .process_batch(vec![raw(
                &["T1", "T2"],
                vec![Measurement::legacy("cores", 4.0)],
            )])
            .await
            .unwrap();

        assert_eq!(saved.len(), 2);
        assert!(saved.iter().all(|r| r.is_persisted()));
        assert_eq!(ledger.store().records().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_batch_writes_nothing() {
        let ledger = ledger(ConflictPolicy::Literal);
        assert!(ledger.process_batch(vec![]).await.unwrap().is_empty());
        assert!(ledger
            .process_batch(vec![raw(&[], vec![Measurement::new("cores", 1.0)])])
            .await
            .unwrap()
            .is_empty());
        assert!(ledger.store().records().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_classified_identical_batch_writes_nothing() {
        let ledger = ledger(ConflictPolicy::Classified);
        let event = raw(&["T1"], vec![Measurement::new("cores", 4.0)]);
        ledger.process_batch(vec![event.clone()]).await.unwrap();

        let saved = ledger.process_batch(vec![event]).await.unwrap();
        assert!(saved.is_empty());
        assert_eq!(ledger.store().records().unwrap().len(), 1);
    }

    #[test]
    fn test_effective_value_sums_matching_stream_only() {
        let base = raw(&["T1"], vec![Measurement::new("cores", 20.0)]);
        let key = EventKey::from_event(&base);

        let mut deduction = raw(&["T1"], vec![Measurement::new("cores", -20.0)]);
        deduction.amendment_type = Some(crate::model::AmendmentType::Deduction);
        let records = vec![
            EventRecord::new(base),
            EventRecord::new(deduction),
            EventRecord::new(raw(&["T1"], vec![Measurement::new("cores", 30.0)])),
            EventRecord::new(raw(&["T2"], vec![Measurement::new("cores", 7.0)])),
            EventRecord::new(raw(&["T1"], vec![Measurement::new("sockets", 2.0)])),
        ];

        assert_eq!(
            effective_value(&records, &key, &UsageConflictKey::new("T1", "cores")),
            30.0
        );
        assert_eq!(
            effective_value(&records, &key, &UsageConflictKey::new("T2", "cores")),
            7.0
        );
        assert_eq!(
            effective_value(&records, &key, &UsageConflictKey::new("T3", "cores")),
            0.0
        );
    }
}
