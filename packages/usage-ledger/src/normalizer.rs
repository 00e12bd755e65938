//! Normalization of raw upstream events.
//!
//! Runs before conflict resolution so the resolver only ever sees events with
//! one product tag, one measurement, and current field names. Nothing here
//! validates: malformed input passes through and is rejected downstream.

use std::collections::{BTreeSet, HashMap};

use crate::model::Event;

/// Service type names that were renamed upstream, mapped to their successor.
pub const DEFAULT_SERVICE_TYPE_RENAMES: &[(&str, &str)] = &[("RHEL Server", "RHEL System")];

#[derive(Debug, Clone)]
pub struct EventNormalizer {
    service_type_renames: HashMap<String, String>,
}

impl Default for EventNormalizer {
    fn default() -> Self {
        Self::new(
            DEFAULT_SERVICE_TYPE_RENAMES
                .iter()
                .map(|(old, new)| (old.to_string(), new.to_string()))
                .collect(),
        )
    }
}

impl EventNormalizer {
    pub fn new(service_type_renames: HashMap<String, String>) -> Self {
        Self {
            service_type_renames,
        }
    }

    /// Split an event into one event per (measurement, tag) pair.
    ///
    /// Every other field is copied as is. An event without tags or without
    /// measurements flattens to nothing.
    pub fn flatten_event_usage(&self, event: &Event) -> Vec<Event> {
        let mut flattened =
            Vec::with_capacity(event.measurements.len() * event.product_tag.len());

        for measurement in &event.measurements {
            for tag in &event.product_tag {
                let mut single = event.clone();
                single.product_tag = BTreeSet::from([tag.clone()]);
                single.measurements = vec![measurement.clone()];
                flattened.push(single);
            }
        }
        flattened
    }

    /// Rewrite legacy field values.
    ///
    /// - a deprecated `service_type` becomes its successor
    /// - a measurement without a `metric_id` takes its `uom`; `uom` is cleared
    ///   either way, so nothing downstream has to look at it
    pub fn normalize_event(&self, mut event: Event) -> Event {
        if let Some(renamed) = event
            .service_type
            .as_ref()
            .and_then(|service_type| self.service_type_renames.get(service_type))
        {
            event.service_type = Some(renamed.clone());
        }

        for measurement in &mut event.measurements {
            let uom = measurement.uom.take();
            if measurement.metric().is_none() {
                measurement.metric_id = uom;
            }
        }
        event
    }

    /// Normalize, then flatten.
    pub fn prepare(&self, event: Event) -> Vec<Event> {
        self.flatten_event_usage(&self.normalize_event(event))
    }
}
