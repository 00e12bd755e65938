//! Usage events as they arrive from upstream sources.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

// ============================================================================
// ENUMS (descriptor context)
// ============================================================================

/// Marks a synthetic record that cancels a superseded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmendmentType {
    Deduction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareType {
    Physical,
    Virtual,
    Cloud,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sla {
    Premium,
    Standard,
    SelfSupport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Usage {
    Production,
    DevelopmentTest,
    DisasterRecovery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingProvider {
    RedHat,
    Aws,
    Gcp,
    Azure,
    Oracle,
}

// ============================================================================
// MEASUREMENT
// ============================================================================

/// One measured value of one metric.
///
/// `uom` is the legacy name of the metric. Normalization moves it into
/// `metric_id`, so nothing past the normalizer should read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uom: Option<String>,
    pub value: f64,
}

impl Measurement {
    pub fn new(metric_id: impl Into<String>, value: f64) -> Self {
        Self {
            metric_id: Some(metric_id.into()),
            uom: None,
            value,
        }
    }

    /// A measurement reported by an older source that only knows `uom`.
    pub fn legacy(uom: impl Into<String>, value: f64) -> Self {
        Self {
            metric_id: None,
            uom: Some(uom.into()),
            value,
        }
    }

    /// The metric id, treating an empty string as absent.
    pub fn metric(&self) -> Option<&str> {
        self.metric_id.as_deref().filter(|m| !m.is_empty())
    }
}

// ============================================================================
// EVENT
// ============================================================================

/// A usage event.
///
/// Upstream events may carry any number of product tags and measurements. Once
/// normalized, every event that reaches the resolver carries exactly one of
/// each. `record_date` stays `None` until the store persists the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct Event {
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,

    #[builder(setter(into))]
    pub org_id: String,

    #[builder(default, setter(into))]
    #[serde(default)]
    pub event_type: String,

    #[builder(default, setter(into))]
    #[serde(default)]
    pub event_source: String,

    #[builder(default, setter(into, strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,

    #[builder(default, setter(into, strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    pub timestamp: DateTime<Utc>,

    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_date: Option<DateTime<Utc>>,

    #[builder(default)]
    #[serde(default)]
    pub product_tag: BTreeSet<String>,

    #[builder(default)]
    #[serde(default)]
    pub measurements: Vec<Measurement>,

    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amendment_type: Option<AmendmentType>,

    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_type: Option<HardwareType>,

    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla: Option<Sla>,

    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_provider: Option<BillingProvider>,

    #[builder(default, setter(into, strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_account_id: Option<String>,
}

impl Event {
    pub fn is_deduction(&self) -> bool {
        self.amendment_type == Some(AmendmentType::Deduction)
    }

    /// Value of the first measurement for `metric_id`, if any.
    pub fn measurement_for(&self, metric_id: &str) -> Option<&Measurement> {
        self.measurements
            .iter()
            .find(|m| m.metric() == Some(metric_id))
    }

    /// Parse an event from its JSON wire form.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
