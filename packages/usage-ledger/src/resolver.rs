//! Conflict resolution for one batch of incoming events.
//!
//! Every incoming event is compared against the effective event for its
//! usage stream. When one exists, a DEDUCTION cancelling its value is emitted
//! immediately before the incoming event, so a plain sum over the ledger
//! always yields the current value.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{ConflictPolicy, LedgerConfig};
use crate::conflict::{
    compare_effective_order, EventConflictType, UsageConflictKey, UsageConflictTracker,
    UsageDescriptor,
};
use crate::error::LedgerError;
use crate::model::{AmendmentType, Event, EventKey, EventRecord, Measurement};
use crate::normalizer::EventNormalizer;
use crate::storage::EventStore;

/// Incoming events grouped by [`EventKey`], in first-seen order.
#[derive(Debug, Default)]
struct EventGroups {
    groups: Vec<(EventKey, Vec<Event>)>,
    index: HashMap<EventKey, usize>,
}

impl EventGroups {
    fn push(&mut self, event: Event) {
        let key = EventKey::from_event(&event);
        match self.index.get(&key) {
            Some(&position) => self.groups[position].1.push(event),
            None => {
                self.index.insert(key.clone(), self.groups.len());
                self.groups.push((key, vec![event]));
            }
        }
    }
}

impl FromIterator<Event> for EventGroups {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        let mut groups = Self::default();
        for event in iter {
            groups.push(event);
        }
        groups
    }
}

pub struct EventConflictResolver<S> {
    store: Arc<S>,
    normalizer: EventNormalizer,
    policy: ConflictPolicy,
}

impl<S: EventStore> EventConflictResolver<S> {
    pub fn new(store: Arc<S>, normalizer: EventNormalizer, policy: ConflictPolicy) -> Self {
        Self {
            store,
            normalizer,
            policy,
        }
    }

    pub fn from_config(store: Arc<S>, config: &LedgerConfig) -> Self {
        Self::new(
            store,
            EventNormalizer::new(config.service_type_renames.clone()),
            config.conflict_policy,
        )
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Resolve a batch of normalized events into the records to persist.
    ///
    /// Reads prior state for every [`EventKey`] in the batch with a single
    /// store call. Nothing is written: saving the returned records (in order,
    /// in one transaction) is up to the caller.
    pub async fn resolve_incoming_events(
        &self,
        events: Vec<Event>,
    ) -> Result<Vec<EventRecord>, LedgerError> {
        let incoming_count = events.len();
        info!(
            incoming = incoming_count,
            policy = %self.policy,
            "resolving incoming event batch"
        );

        let keys: HashSet<EventKey> = events.iter().map(EventKey::from_event).collect();
        let prior = self
            .store
            .find_conflicting_events(&keys)
            .await
            .map_err(|e| {
                warn!(error = %e, keys = keys.len(), "failed to load conflicting events");
                LedgerError::store(e)
            })?
            .into_iter()
            .map(EventRecord::into_event)
            .collect();

        let resolved = self.resolve_against(prior, events)?;
        info!(
            incoming = incoming_count,
            resolved = resolved.len(),
            "finished resolving incoming event batch"
        );
        Ok(resolved)
    }

    /// Resolve `incoming` against already persisted events.
    ///
    /// `prior` may contain rows for keys outside the batch and rows that were
    /// stored before normalization existed; both are handled. Incoming events
    /// must each carry exactly one product tag and one measurement, otherwise
    /// the whole call fails.
    pub fn resolve_against(
        &self,
        prior: Vec<Event>,
        incoming: Vec<Event>,
    ) -> Result<Vec<EventRecord>, LedgerError> {
        let batch: EventGroups = incoming.into_iter().collect();

        let mut prior_by_key: HashMap<EventKey, Vec<Event>> = HashMap::new();
        for event in prior.into_iter().flat_map(|e| self.normalizer.prepare(e)) {
            let key = EventKey::from_event(&event);
            if batch.index.contains_key(&key) {
                prior_by_key.entry(key).or_default().push(event);
            }
        }

        let mut resolved = Vec::new();
        for (key, events) in batch.groups {
            let mut prior = prior_by_key.remove(&key).unwrap_or_default();
            prior.sort_by(compare_effective_order);

            let mut tracker = UsageConflictTracker::new(&prior)?;
            let events = match self.policy {
                ConflictPolicy::Literal => events,
                ConflictPolicy::Classified => dedup_exact(&key, events)?,
            };

            for event in events {
                self.resolve_event(&mut tracker, event, &mut resolved)?;
            }
        }
        Ok(resolved)
    }

    fn resolve_event(
        &self,
        tracker: &mut UsageConflictTracker,
        event: Event,
        resolved: &mut Vec<EventRecord>,
    ) -> Result<(), LedgerError> {
        let conflict_key = UsageConflictTracker::conflict_key_for(&event)?;
        let conflict_type = match self.policy {
            ConflictPolicy::Literal if tracker.contains(&conflict_key) => {
                EventConflictType::Corrective
            }
            ConflictPolicy::Literal => EventConflictType::Original,
            ConflictPolicy::Classified => classify(tracker, &conflict_key, &event)?,
        };
        debug!(
            conflict_key = %conflict_key,
            conflict_type = %conflict_type,
            "processing incoming event"
        );

        if conflict_type.requires_deduction() {
            if let Some(conflicting) = tracker.latest(&conflict_key) {
                let deduction = deduction_for(conflicting, &conflict_key)?;
                debug!(
                    conflict_key = %conflict_key,
                    value = deduction.measurements[0].value,
                    "emitting deduction"
                );
                resolved.push(EventRecord::new(deduction));
            }
        }

        if conflict_type.saves_incoming_event() {
            tracker.accept(&event)?;
            resolved.push(EventRecord::new(event));
        }
        Ok(())
    }
}

/// Drop exact duplicates within one [`EventKey`] group: same stream, same
/// descriptor, same value. The first occurrence is kept.
fn dedup_exact(key: &EventKey, events: Vec<Event>) -> Result<Vec<Event>, LedgerError> {
    let before = events.len();
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(before);

    for event in events {
        let conflict_key = UsageConflictTracker::conflict_key_for(&event)?;
        let value = value_bits(event.measurements[0].value);
        if seen.insert((conflict_key, UsageDescriptor::from_event(&event), value)) {
            unique.push(event);
        }
    }

    if unique.len() != before {
        debug!(
            event_key = %key,
            before,
            after = unique.len(),
            "dropped exact duplicates from batch"
        );
    }
    Ok(unique)
}

/// Hashable form of a measurement value that agrees with `==` on zeros.
fn value_bits(value: f64) -> u64 {
    if value == 0.0 {
        0.0_f64.to_bits()
    } else {
        value.to_bits()
    }
}

/// Classify `event` against the effective event for its stream.
fn classify(
    tracker: &UsageConflictTracker,
    conflict_key: &UsageConflictKey,
    event: &Event,
) -> Result<EventConflictType, LedgerError> {
    let Some(existing) = tracker.latest(conflict_key) else {
        return Ok(EventConflictType::Original);
    };

    let existing_value = previous_value(existing, conflict_key)?;
    let incoming_value = previous_value(event, conflict_key)?;

    Ok(EventConflictType::classify(
        existing_value == incoming_value,
        UsageDescriptor::from_event(existing) == UsageDescriptor::from_event(event),
    ))
}

fn previous_value(event: &Event, conflict_key: &UsageConflictKey) -> Result<f64, LedgerError> {
    event
        .measurement_for(&conflict_key.metric_id)
        .map(|m| m.value)
        .ok_or_else(|| LedgerError::MissingMeasurement {
            key: conflict_key.clone(),
            metric_id: conflict_key.metric_id.clone(),
        })
}

/// A DEDUCTION cancelling `conflicting`'s value for one stream.
///
/// Carries the conflicting event's context, not the incoming one's, so the
/// deduction lands in the same tally buckets as the value it cancels.
fn deduction_for(
    conflicting: &Event,
    conflict_key: &UsageConflictKey,
) -> Result<Event, LedgerError> {
    let previous = previous_value(conflicting, conflict_key)?;

    let mut deduction = conflicting.clone();
    deduction.event_id = None;
    deduction.record_date = None;
    deduction.product_tag = BTreeSet::from([conflict_key.product_tag.clone()]);
    deduction.amendment_type = Some(AmendmentType::Deduction);
    deduction.measurements = vec![Measurement::new(conflict_key.metric_id.clone(), -previous)];
    Ok(deduction)
}
