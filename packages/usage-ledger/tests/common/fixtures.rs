//! Test fixtures for building usage events.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, TimeZone, Utc};
use usage_ledger::{Event, EventKey, EventRecord, Measurement, UsageConflictKey};

pub const INSTANCE: &str = "instance1";
pub const CORES: &str = "cores";
pub const INSTANCE_HOURS: &str = "instance-hours";

/// Install a subscriber that respects RUST_LOG.
/// Run tests with: RUST_LOG=debug cargo test -- --nocapture
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The usage instant every fixture reports on unless moved.
pub fn usage_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

/// A normalized event: one tag, one measurement.
pub fn usage_event(org_id: &str, tag: &str, metric: &str, value: f64) -> Event {
    raw_event(org_id, &[tag], vec![Measurement::new(metric, value)])
}

/// An upstream event with any number of tags and measurements.
pub fn raw_event(org_id: &str, tags: &[&str], measurements: Vec<Measurement>) -> Event {
    Event::builder()
        .org_id(org_id)
        .event_type("snapshot")
        .event_source("prometheus")
        .service_type("RHEL System")
        .instance_id(INSTANCE)
        .timestamp(usage_instant())
        .product_tag(tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>())
        .measurements(measurements)
        .build()
}

pub fn hours_later(mut event: Event, hours: i64) -> Event {
    event.timestamp += Duration::hours(hours);
    event
}

pub fn stream(tag: &str, metric: &str) -> UsageConflictKey {
    UsageConflictKey::new(tag, metric)
}

pub fn key_of(event: &Event) -> EventKey {
    EventKey::from_event(event)
}

/// (tag, metric, value, is_deduction) per record, for compact assertions.
pub fn summarize(records: &[EventRecord]) -> Vec<(String, String, f64, bool)> {
    records
        .iter()
        .map(|r| {
            let measurement = &r.event.measurements[0];
            (
                r.event.product_tag.iter().next().cloned().unwrap_or_default(),
                measurement.metric_id.clone().unwrap_or_default(),
                measurement.value,
                r.event.is_deduction(),
            )
        })
        .collect()
}

pub fn row(tag: &str, metric: &str, value: f64, deduction: bool) -> (String, String, f64, bool) {
    (tag.to_string(), metric.to_string(), value, deduction)
}
