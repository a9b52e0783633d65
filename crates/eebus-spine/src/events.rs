//! Device/entity/data change events published to core subscribers.

use eebus_runtime::EventHub;
use eebus_wire::spine::{CmdClassifier, EntityAddress, FeatureAddress, FunctionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    DeviceChange,
    EntityChange,
    DataChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementChange {
    Add,
    Remove,
    Update,
}

/// One published change event.
#[derive(Debug, Clone)]
pub struct EventPayload {
    /// SKI of the peer the change concerns; empty for purely local changes.
    pub ski: String,
    pub event: EventType,
    pub change: ElementChange,
    pub device_address: Option<String>,
    pub entity_address: Option<EntityAddress>,
    /// Remote feature the data originated from, on data changes.
    pub feature_address: Option<FeatureAddress>,
    /// Local feature that processed the data, on data changes.
    pub local_feature: Option<FeatureAddress>,
    pub function: Option<FunctionType>,
    pub classifier: Option<CmdClassifier>,
}

impl EventPayload {
    pub fn new(ski: impl Into<String>, event: EventType, change: ElementChange) -> Self {
        EventPayload {
            ski: ski.into(),
            event,
            change,
            device_address: None,
            entity_address: None,
            feature_address: None,
            local_feature: None,
            function: None,
            classifier: None,
        }
    }
}

/// The per-device event hub; passed by reference, never global.
pub type DeviceEventHub = EventHub<EventPayload>;
