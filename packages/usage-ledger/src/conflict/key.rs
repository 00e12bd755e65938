use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{BillingProvider, Event, HardwareType, Sla, Usage};

/// Identity of one usage stream: events with equal keys (within one
/// [`crate::EventKey`]) supersede each other.
///
/// `instance_id` is optional for callers that scope conflicts per instance
/// some other way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UsageConflictKey {
    pub product_tag: String,
    pub metric_id: String,
    pub instance_id: Option<String>,
}

impl UsageConflictKey {
    pub fn new(product_tag: impl Into<String>, metric_id: impl Into<String>) -> Self {
        Self {
            product_tag: product_tag.into(),
            metric_id: metric_id.into(),
            instance_id: None,
        }
    }

    pub fn with_instance(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }
}

impl fmt::Display for UsageConflictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.product_tag, self.metric_id)?;
        if let Some(instance_id) = &self.instance_id {
            write!(f, "@{}", instance_id)?;
        }
        Ok(())
    }
}

/// Why usage is being reported, independent of how much.
///
/// Two events for the same stream with different descriptors describe the
/// same usage under a different context (e.g. a corrected SLA).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsageDescriptor {
    pub hardware_type: Option<HardwareType>,
    pub sla: Option<Sla>,
    pub usage: Option<Usage>,
    pub billing_provider: Option<BillingProvider>,
    pub billing_account_id: Option<String>,
}

impl UsageDescriptor {
    pub fn from_event(event: &Event) -> Self {
        Self {
            hardware_type: event.hardware_type,
            sla: event.sla,
            usage: event.usage,
            billing_provider: event.billing_provider,
            billing_account_id: event.billing_account_id.clone(),
        }
    }
}
