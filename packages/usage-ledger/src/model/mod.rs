pub mod event;
pub mod record;

pub use event::{
    AmendmentType, BillingProvider, Event, HardwareType, Measurement, Sla, Usage,
};
pub use record::{EventKey, EventRecord};
