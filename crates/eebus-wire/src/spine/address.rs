//! SPINE addressing: (device, entity path, feature id) triples.
//!
//! Comparison is structural and order-sensitive on the entity path. The
//! device string is opaque to the protocol.

use std::fmt;

use serde_json::{Value, json};

use crate::EebusError;
use crate::value::{SeqBuilder, SeqReader, as_str, as_u32};

/// The reserved entity id path of the device-information entity.
pub const DEVICE_INFORMATION_ENTITY_ID: u32 = 0;

/// The feature id of node management within entity `[0]`.
pub const NODE_MANAGEMENT_FEATURE_ID: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceAddress {
    pub device: String,
}

impl DeviceAddress {
    pub fn new(device: impl Into<String>) -> Self {
        DeviceAddress {
            device: device.into(),
        }
    }

    pub fn to_value(&self) -> Value {
        SeqBuilder::new().field("device", json!(self.device)).build()
    }

    pub fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(DeviceAddress {
            device: as_str(seq.require("device")?, "device")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityAddress {
    pub device: Option<String>,
    pub entity: Vec<u32>,
}

impl EntityAddress {
    pub fn new(device: Option<String>, entity: Vec<u32>) -> Self {
        EntityAddress { device, entity }
    }

    /// Entity `[0]` of the given device.
    pub fn device_information(device: Option<String>) -> Self {
        EntityAddress {
            device,
            entity: vec![DEVICE_INFORMATION_ENTITY_ID],
        }
    }

    /// Address of a feature within this entity.
    pub fn feature(&self, feature: u32) -> FeatureAddress {
        FeatureAddress {
            device: self.device.clone(),
            entity: self.entity.clone(),
            feature,
        }
    }

    pub fn to_value(&self) -> Value {
        SeqBuilder::new()
            .opt("device", self.device.as_ref().map(|d| json!(d)))
            .field("entity", json!(self.entity))
            .build()
    }

    pub fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(EntityAddress {
            device: seq.get("device").map(|v| as_str(v, "device")).transpose()?,
            entity: parse_entity_ids(seq.require("entity")?)?,
        })
    }
}

impl fmt::Display for EntityAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{:?}",
            self.device.as_deref().unwrap_or("<local>"),
            self.entity
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeatureAddress {
    pub device: Option<String>,
    pub entity: Vec<u32>,
    pub feature: u32,
}

impl FeatureAddress {
    pub fn new(device: Option<String>, entity: Vec<u32>, feature: u32) -> Self {
        FeatureAddress {
            device,
            entity,
            feature,
        }
    }

    /// Node management of the given device: entity `[0]`, feature 0.
    pub fn node_management(device: Option<String>) -> Self {
        FeatureAddress {
            device,
            entity: vec![DEVICE_INFORMATION_ENTITY_ID],
            feature: NODE_MANAGEMENT_FEATURE_ID,
        }
    }

    pub fn entity_address(&self) -> EntityAddress {
        EntityAddress {
            device: self.device.clone(),
            entity: self.entity.clone(),
        }
    }

    /// Same entity path and feature id, ignoring the device string.
    ///
    /// Used when a peer omits its own device address in a source field.
    pub fn matches_local(&self, other: &FeatureAddress) -> bool {
        self.entity == other.entity && self.feature == other.feature
    }

    /// The address with the device field filled in when missing.
    pub fn with_device(&self, device: &str) -> FeatureAddress {
        FeatureAddress {
            device: Some(
                self.device
                    .clone()
                    .unwrap_or_else(|| device.to_owned()),
            ),
            entity: self.entity.clone(),
            feature: self.feature,
        }
    }

    pub fn to_value(&self) -> Value {
        SeqBuilder::new()
            .opt("device", self.device.as_ref().map(|d| json!(d)))
            .field("entity", json!(self.entity))
            .field("feature", json!(self.feature))
            .build()
    }

    pub fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(FeatureAddress {
            device: seq.get("device").map(|v| as_str(v, "device")).transpose()?,
            entity: parse_entity_ids(seq.require("entity")?)?,
            feature: as_u32(seq.require("feature")?, "feature")?,
        })
    }
}

impl fmt::Display for FeatureAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{:?}/{}",
            self.device.as_deref().unwrap_or("<local>"),
            self.entity,
            self.feature
        )
    }
}

fn parse_entity_ids(value: &Value) -> Result<Vec<u32>, EebusError> {
    let array = value
        .as_array()
        .ok_or_else(|| EebusError::Parse("entity: expected an array".into()))?;
    array.iter().map(|v| as_u32(v, "entity id")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_address_round_trip() {
        let addr = FeatureAddress::new(Some("d:_n:vendor_model-1".into()), vec![1, 1], 4);
        assert_eq!(FeatureAddress::from_value(&addr.to_value()).unwrap(), addr);
    }

    #[test]
    fn device_field_is_optional() {
        let addr = FeatureAddress::new(None, vec![0], 0);
        let value = addr.to_value();
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"[{"entity":[0]},{"feature":0}]"#
        );
        assert_eq!(FeatureAddress::from_value(&value).unwrap(), addr);
    }

    #[test]
    fn entity_path_comparison_is_order_sensitive() {
        let a = EntityAddress::new(None, vec![1, 2]);
        let b = EntityAddress::new(None, vec![2, 1]);
        assert_ne!(a, b);
    }

    #[test]
    fn node_management_address_is_entity_zero_feature_zero() {
        let addr = FeatureAddress::node_management(Some("d:x".into()));
        assert_eq!(addr.entity, vec![0]);
        assert_eq!(addr.feature, 0);
    }
}
