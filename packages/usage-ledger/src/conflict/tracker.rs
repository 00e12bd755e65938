//! Per-pass index of the effective event for each usage stream.

use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::SubsecRound;

use super::UsageConflictKey;
use crate::error::LedgerError;
use crate::model::Event;

/// Record dates are stored with microsecond precision, so anything finer is
/// noise that would otherwise reorder events read back from the database.
const RECORD_DATE_PRECISION: u16 = 6;

/// Effective order of two events for the same stream.
///
/// Orders by `timestamp`, then by `record_date` truncated to microseconds. An
/// event that has not been persisted (`record_date == None`) sorts before any
/// persisted event with the same timestamp.
pub fn compare_effective_order(a: &Event, b: &Event) -> Ordering {
    a.timestamp.cmp(&b.timestamp).then_with(|| {
        let a_recorded = a.record_date.map(|d| d.trunc_subsecs(RECORD_DATE_PRECISION));
        let b_recorded = b.record_date.map(|d| d.trunc_subsecs(RECORD_DATE_PRECISION));
        a_recorded.cmp(&b_recorded)
    })
}

/// Tracks the latest effective event per [`UsageConflictKey`].
///
/// Lives for one `EventKey` group of one resolution pass. Deductions are
/// never tracked: they cancel usage, they do not report it.
#[derive(Debug, Default)]
pub struct UsageConflictTracker {
    latest: HashMap<UsageConflictKey, Event>,
}

impl UsageConflictTracker {
    /// Seed a tracker with prior events, in the given order.
    pub fn new(events: &[Event]) -> Result<Self, LedgerError> {
        let mut tracker = Self::default();
        for event in events {
            tracker.track(event)?;
        }
        Ok(tracker)
    }

    /// The usage stream an event reports on.
    ///
    /// Fails unless the event carries exactly one product tag and one
    /// measurement with a metric id. The instance id is left unset: the
    /// tracker is already scoped to a single instance through its `EventKey`.
    pub fn conflict_key_for(event: &Event) -> Result<UsageConflictKey, LedgerError> {
        let single = event.product_tag.len() == 1 && event.measurements.len() == 1;
        let (tag, measurement) = match (event.product_tag.first(), event.measurements.first()) {
            (Some(tag), Some(measurement)) if single => (tag, measurement),
            _ => {
                return Err(LedgerError::MalformedEvent {
                    tags: event.product_tag.len(),
                    measurements: event.measurements.len(),
                })
            }
        };
        let metric_id = measurement.metric().ok_or(LedgerError::MissingMetricId)?;

        Ok(UsageConflictKey::new(tag.as_str(), metric_id))
    }

    /// Track a prior event.
    ///
    /// Replaces the current latest unless the new event is strictly earlier in
    /// effective order, so on a tie the last tracked event wins.
    pub fn track(&mut self, event: &Event) -> Result<(), LedgerError> {
        let key = Self::conflict_key_for(event)?;
        if event.is_deduction() {
            return Ok(());
        }

        match self.latest.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(event.clone());
            }
            Entry::Occupied(mut slot) => {
                if compare_effective_order(event, slot.get()) != Ordering::Less {
                    slot.insert(event.clone());
                }
            }
        }
        Ok(())
    }

    /// Accept an incoming event from the batch being resolved.
    ///
    /// Incoming events supersede everything already tracked for their stream,
    /// in batch order, even though they have no record date yet.
    pub fn accept(&mut self, event: &Event) -> Result<(), LedgerError> {
        let key = Self::conflict_key_for(event)?;
        if event.is_deduction() {
            return Ok(());
        }

        self.latest.insert(key, event.clone());
        Ok(())
    }

    pub fn contains(&self, key: &UsageConflictKey) -> bool {
        self.latest.contains_key(key)
    }

    /// The event currently effective for `key`.
    pub fn latest(&self, key: &UsageConflictKey) -> Option<&Event> {
        self.latest.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AmendmentType, Measurement};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::collections::BTreeSet;

    const TAG: &str = "Tag1";
    const METRIC: &str = "M1";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 21, 18, 0, 0).unwrap()
    }

    fn event(value: f64) -> Event {
        Event::builder()
            .org_id("org1")
            .event_type("test_event_type")
            .event_source("test_source")
            .service_type("test_service_type")
            .instance_id("instance1")
            .timestamp(now())
            .product_tag(BTreeSet::from([TAG.to_string()]))
            .measurements(vec![Measurement::new(METRIC, value)])
            .build()
    }

    fn recorded(value: f64, record_date: &str) -> Event {
        let mut e = event(value);
        e.record_date = Some(record_date.parse().unwrap());
        e
    }

    fn key() -> UsageConflictKey {
        UsageConflictKey::new(TAG, METRIC)
    }

    // =========================================================================
    // Comparator
    // =========================================================================

    #[test]
    fn test_comparator_orders_by_timestamp_first() {
        let early = recorded(1.0, "2025-01-21T20:00:00Z");
        let mut late = event(2.0);
        late.timestamp = now() + Duration::hours(1);
        assert_eq!(compare_effective_order(&early, &late), Ordering::Less);
        assert_eq!(compare_effective_order(&late, &early), Ordering::Greater);
    }

    #[test]
    fn test_comparator_breaks_ties_on_record_date() {
        let older = recorded(1.0, "2025-01-21T18:30:00Z");
        let newer = recorded(2.0, "2025-01-21T18:31:00Z");
        assert_eq!(compare_effective_order(&older, &newer), Ordering::Less);
    }

    #[test]
    fn test_comparator_sorts_unpersisted_first() {
        let unpersisted = event(1.0);
        let persisted = recorded(2.0, "2025-01-21T18:30:00Z");
        assert_eq!(
            compare_effective_order(&unpersisted, &persisted),
            Ordering::Less
        );
        assert_eq!(
            compare_effective_order(&unpersisted, &event(3.0)),
            Ordering::Equal
        );
    }

    #[test]
    fn test_comparator_ignores_sub_microsecond_precision() {
        let a = recorded(1.0, "2025-01-21T18:30:02.545245510Z");
        let b = recorded(2.0, "2025-01-21T18:30:02.545245900Z");
        assert_eq!(compare_effective_order(&a, &b), Ordering::Equal);

        let c = recorded(1.0, "2025-01-21T18:30:02.545245999Z");
        let d = recorded(2.0, "2025-01-21T18:30:02.545246001Z");
        assert_eq!(compare_effective_order(&c, &d), Ordering::Less);
    }

    // =========================================================================
    // Tracking
    // =========================================================================

    #[test]
    fn test_contains() {
        let tracker = UsageConflictTracker::new(&[event(20.0)]).unwrap();
        assert!(tracker.contains(&key()));
        assert!(!tracker.contains(&UsageConflictKey::new("T2", "M2")));
    }

    #[test]
    fn test_latest_prefers_later_record_date() {
        let oldest = recorded(10.0, "2025-01-21T16:00:00Z");
        let latest = recorded(20.0, "2025-01-21T18:00:00Z");

        let tracker = UsageConflictTracker::new(&[latest.clone(), oldest]).unwrap();
        assert_eq!(tracker.latest(&key()), Some(&latest));
    }

    #[test]
    fn test_persisted_event_beats_unpersisted_on_timestamp_tie() {
        let unpersisted = event(10.0);
        let persisted = recorded(20.0, "2025-01-21T18:00:00Z");

        let tracker =
            UsageConflictTracker::new(&[persisted.clone(), unpersisted.clone()]).unwrap();
        assert_eq!(tracker.latest(&key()), Some(&persisted));

        let tracker = UsageConflictTracker::new(&[unpersisted, persisted.clone()]).unwrap();
        assert_eq!(tracker.latest(&key()), Some(&persisted));
    }

    #[test]
    fn test_last_tracked_wins_when_order_is_equal() {
        let first = event(20.0);
        let last = event(30.0);

        let mut tracker = UsageConflictTracker::default();
        tracker.track(&first).unwrap();
        tracker.track(&last).unwrap();
        assert_eq!(tracker.latest(&key()), Some(&last));

        let a = recorded(10.0, "2025-01-21T18:30:02.545245100Z");
        let b = recorded(20.0, "2025-01-21T18:30:02.545245200Z");
        let c = recorded(30.0, "2025-01-21T18:30:02.545245999Z");
        let tracker = UsageConflictTracker::new(&[a, b, c.clone()]).unwrap();
        assert_eq!(tracker.latest(&key()), Some(&c));
    }

    #[test]
    fn test_deductions_are_never_latest() {
        let effective = recorded(20.0, "2025-01-21T18:00:00Z");
        let mut deduction = recorded(-20.0, "2025-01-21T19:00:00Z");
        deduction.amendment_type = Some(AmendmentType::Deduction);

        let mut tracker =
            UsageConflictTracker::new(&[effective.clone(), deduction.clone()]).unwrap();
        assert_eq!(tracker.latest(&key()), Some(&effective));

        tracker.accept(&deduction).unwrap();
        assert_eq!(tracker.latest(&key()), Some(&effective));

        let only_deductions = UsageConflictTracker::new(&[deduction]).unwrap();
        assert!(!only_deductions.contains(&key()));
        assert!(only_deductions.latest(&key()).is_none());
    }

    #[test]
    fn test_accept_supersedes_persisted_events() {
        let persisted = recorded(20.0, "2025-01-21T18:00:00Z");
        let incoming = event(30.0);

        let mut tracker = UsageConflictTracker::new(&[persisted]).unwrap();
        tracker.accept(&incoming).unwrap();
        assert_eq!(tracker.latest(&key()), Some(&incoming));
    }

    // =========================================================================
    // Preconditions
    // =========================================================================

    #[test]
    fn test_rejects_event_with_multiple_tags() {
        let mut e = event(20.0);
        e.product_tag.insert("T2".to_string());

        let mut tracker = UsageConflictTracker::default();
        assert!(matches!(
            tracker.track(&e),
            Err(LedgerError::MalformedEvent {
                tags: 2,
                measurements: 1
            })
        ));
    }

    #[test]
    fn test_rejects_event_with_multiple_measurements() {
        let mut e = event(20.0);
        e.measurements.push(Measurement::new("M2", 10.0));

        let mut tracker = UsageConflictTracker::default();
        assert!(matches!(
            tracker.accept(&e),
            Err(LedgerError::MalformedEvent {
                tags: 1,
                measurements: 2
            })
        ));
    }

    #[test]
    fn test_rejects_event_without_tags_or_measurements() {
        let mut e = event(20.0);
        e.product_tag.clear();
        e.measurements.clear();
        assert!(matches!(
            UsageConflictTracker::conflict_key_for(&e),
            Err(LedgerError::MalformedEvent {
                tags: 0,
                measurements: 0
            })
        ));
    }

    #[test]
    fn test_rejects_measurement_without_metric_id() {
        let mut e = event(20.0);
        e.measurements = vec![Measurement::legacy("Cores", 1.0)];
        assert!(matches!(
            UsageConflictTracker::conflict_key_for(&e),
            Err(LedgerError::MissingMetricId)
        ));
    }

    #[test]
    fn test_conflict_key_leaves_instance_unset() {
        let derived = UsageConflictTracker::conflict_key_for(&event(1.0)).unwrap();
        assert_eq!(derived, key());
        assert!(derived.instance_id.is_none());
    }
}
