//! Node-management payload types: detailed discovery, use cases,
//! subscription/binding management, destinations.

use serde_json::{Value, json};

use crate::EebusError;
use crate::value::{SeqBuilder, SeqReader, as_bool, as_str, as_u32, as_u64};

use super::address::{DeviceAddress, EntityAddress, FeatureAddress};
use super::datagram::SPECIFICATION_VERSION;
use super::function::FunctionType;

// ---------------------------------------------------------------------------
// Roles and feature sets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
    Special,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
            Role::Special => "special",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EebusError> {
        match s {
            "client" => Ok(Role::Client),
            "server" => Ok(Role::Server),
            "special" => Ok(Role::Special),
            other => Err(EebusError::InputArgumentOutOfRange(format!(
                "unknown role `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSet {
    Gateway,
    Router,
    Smart,
    Simple,
}

impl FeatureSet {
    pub fn as_str(self) -> &'static str {
        match self {
            FeatureSet::Gateway => "gateway",
            FeatureSet::Router => "router",
            FeatureSet::Smart => "smart",
            FeatureSet::Simple => "simple",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EebusError> {
        match s {
            "gateway" => Ok(FeatureSet::Gateway),
            "router" => Ok(FeatureSet::Router),
            "smart" => Ok(FeatureSet::Smart),
            "simple" => Ok(FeatureSet::Simple),
            other => Err(EebusError::InputArgumentOutOfRange(format!(
                "unknown feature set `{other}`"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Operations advertisement
// ---------------------------------------------------------------------------

/// Which of read / read-partial / write / write-partial the owner supports
/// on one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PossibleOperations {
    pub read: bool,
    pub read_partial: bool,
    pub write: bool,
    pub write_partial: bool,
}

impl PossibleOperations {
    fn to_value(&self) -> Value {
        let mut builder = SeqBuilder::new();
        if self.read {
            let read = SeqBuilder::new().tag_if("partial", self.read_partial).build();
            builder = builder.field("read", read);
        }
        if self.write {
            let write = SeqBuilder::new()
                .tag_if("partial", self.write_partial)
                .build();
            builder = builder.field("write", write);
        }
        builder.build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        let mut ops = PossibleOperations::default();
        if let Some(read) = seq.get("read") {
            ops.read = true;
            ops.read_partial = SeqReader::new(read)?.get("partial").is_some();
        }
        if let Some(write) = seq.get("write") {
            ops.write = true;
            ops.write_partial = SeqReader::new(write)?.get("partial").is_some();
        }
        Ok(ops)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionProperty {
    pub function: FunctionType,
    pub possible_operations: PossibleOperations,
}

impl FunctionProperty {
    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .field("function", json!(self.function.as_str()))
            .field("possibleOperations", self.possible_operations.to_value())
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(FunctionProperty {
            function: FunctionType::parse(&as_str(seq.require("function")?, "function")?)?,
            possible_operations: PossibleOperations::from_value(
                seq.require("possibleOperations")?,
            )?,
        })
    }
}

// ---------------------------------------------------------------------------
// Descriptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceDescription {
    pub device_address: Option<DeviceAddress>,
    pub device_type: Option<String>,
    pub network_feature_set: Option<FeatureSet>,
}

impl DeviceDescription {
    pub fn to_value(&self) -> Value {
        SeqBuilder::new()
            .opt(
                "deviceAddress",
                self.device_address.as_ref().map(DeviceAddress::to_value),
            )
            .opt("deviceType", self.device_type.as_ref().map(|t| json!(t)))
            .opt(
                "networkFeatureSet",
                self.network_feature_set.map(|f| json!(f.as_str())),
            )
            .build()
    }

    pub fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(DeviceDescription {
            device_address: seq
                .get("deviceAddress")
                .map(DeviceAddress::from_value)
                .transpose()?,
            device_type: seq
                .get("deviceType")
                .map(|v| as_str(v, "deviceType"))
                .transpose()?,
            network_feature_set: seq
                .get("networkFeatureSet")
                .map(|v| as_str(v, "networkFeatureSet").and_then(|s| FeatureSet::parse(&s)))
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceInformation {
    pub description: DeviceDescription,
}

impl DeviceInformation {
    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .field("description", self.description.to_value())
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(DeviceInformation {
            description: DeviceDescription::from_value(seq.require("description")?)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescription {
    pub entity_address: EntityAddress,
    pub entity_type: Option<String>,
    /// `added` / `removed` / `modified`, set on entity change notifies.
    pub last_state_change: Option<String>,
    pub description: Option<String>,
}

impl EntityDescription {
    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .field("entityAddress", self.entity_address.to_value())
            .opt("entityType", self.entity_type.as_ref().map(|t| json!(t)))
            .opt(
                "lastStateChange",
                self.last_state_change.as_ref().map(|s| json!(s)),
            )
            .opt("description", self.description.as_ref().map(|d| json!(d)))
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        let field = |key: &str| seq.get(key).map(|v| as_str(v, key)).transpose();
        Ok(EntityDescription {
            entity_address: EntityAddress::from_value(seq.require("entityAddress")?)?,
            entity_type: field("entityType")?,
            last_state_change: field("lastStateChange")?,
            description: field("description")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityInformation {
    pub description: EntityDescription,
}

impl EntityInformation {
    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .field("description", self.description.to_value())
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(EntityInformation {
            description: EntityDescription::from_value(seq.require("description")?)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureDescription {
    pub feature_address: FeatureAddress,
    pub feature_type: Option<String>,
    pub role: Option<Role>,
    pub supported_function: Vec<FunctionProperty>,
    pub description: Option<String>,
    pub max_response_delay: Option<u64>,
}

impl FeatureDescription {
    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .field("featureAddress", self.feature_address.to_value())
            .opt("featureType", self.feature_type.as_ref().map(|t| json!(t)))
            .opt("role", self.role.map(|r| json!(r.as_str())))
            .opt(
                "supportedFunction",
                if self.supported_function.is_empty() {
                    None
                } else {
                    Some(Value::Array(
                        self.supported_function
                            .iter()
                            .map(FunctionProperty::to_value)
                            .collect(),
                    ))
                },
            )
            .opt("description", self.description.as_ref().map(|d| json!(d)))
            .opt(
                "maxResponseDelay",
                self.max_response_delay.map(|d| json!(d)),
            )
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        let supported_function = match seq.get("supportedFunction") {
            None => Vec::new(),
            Some(list) => list
                .as_array()
                .ok_or_else(|| EebusError::Parse("supportedFunction: expected an array".into()))?
                .iter()
                .map(FunctionProperty::from_value)
                .collect::<Result<Vec<_>, _>>()?,
        };

        Ok(FeatureDescription {
            feature_address: FeatureAddress::from_value(seq.require("featureAddress")?)?,
            feature_type: seq
                .get("featureType")
                .map(|v| as_str(v, "featureType"))
                .transpose()?,
            role: seq
                .get("role")
                .map(|v| as_str(v, "role").and_then(|s| Role::parse(&s)))
                .transpose()?,
            supported_function,
            description: seq
                .get("description")
                .map(|v| as_str(v, "description"))
                .transpose()?,
            max_response_delay: seq
                .get("maxResponseDelay")
                .map(|v| as_u64(v, "maxResponseDelay"))
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureInformation {
    pub description: FeatureDescription,
}

impl FeatureInformation {
    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .field("description", self.description.to_value())
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(FeatureInformation {
            description: FeatureDescription::from_value(seq.require("description")?)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Detailed discovery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeManagementDetailedDiscoveryData {
    pub specification_versions: Vec<String>,
    pub device_information: Option<DeviceInformation>,
    pub entity_information: Vec<EntityInformation>,
    pub feature_information: Vec<FeatureInformation>,
}

impl Default for NodeManagementDetailedDiscoveryData {
    fn default() -> Self {
        NodeManagementDetailedDiscoveryData {
            specification_versions: vec![SPECIFICATION_VERSION.to_owned()],
            device_information: None,
            entity_information: Vec::new(),
            feature_information: Vec::new(),
        }
    }
}

impl NodeManagementDetailedDiscoveryData {
    pub fn to_value(&self) -> Value {
        SeqBuilder::new()
            .opt(
                "specificationVersionList",
                if self.specification_versions.is_empty() {
                    None
                } else {
                    Some(
                        SeqBuilder::new()
                            .field("specificationVersion", json!(self.specification_versions))
                            .build(),
                    )
                },
            )
            .opt(
                "deviceInformation",
                self.device_information.as_ref().map(DeviceInformation::to_value),
            )
            .opt(
                "entityInformation",
                if self.entity_information.is_empty() {
                    None
                } else {
                    Some(Value::Array(
                        self.entity_information
                            .iter()
                            .map(EntityInformation::to_value)
                            .collect(),
                    ))
                },
            )
            .opt(
                "featureInformation",
                if self.feature_information.is_empty() {
                    None
                } else {
                    Some(Value::Array(
                        self.feature_information
                            .iter()
                            .map(FeatureInformation::to_value)
                            .collect(),
                    ))
                },
            )
            .build()
    }

    pub fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;

        let specification_versions = match seq.get("specificationVersionList") {
            None => Vec::new(),
            Some(list) => {
                let list_seq = SeqReader::new(list)?;
                match list_seq.get("specificationVersion") {
                    None => Vec::new(),
                    Some(versions) => versions
                        .as_array()
                        .ok_or_else(|| {
                            EebusError::Parse("specificationVersion: expected an array".into())
                        })?
                        .iter()
                        .map(|v| as_str(v, "specificationVersion"))
                        .collect::<Result<Vec<_>, _>>()?,
                }
            }
        };

        Ok(NodeManagementDetailedDiscoveryData {
            specification_versions,
            device_information: seq
                .get("deviceInformation")
                .map(DeviceInformation::from_value)
                .transpose()?,
            entity_information: parse_list(&seq, "entityInformation", EntityInformation::from_value)?,
            feature_information: parse_list(
                &seq,
                "featureInformation",
                FeatureInformation::from_value,
            )?,
        })
    }
}

// ---------------------------------------------------------------------------
// Use cases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UseCaseSupport {
    pub use_case_name: String,
    pub use_case_version: Option<String>,
    pub use_case_available: Option<bool>,
    pub scenario_support: Vec<u32>,
}

impl UseCaseSupport {
    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .field("useCaseName", json!(self.use_case_name))
            .opt(
                "useCaseVersion",
                self.use_case_version.as_ref().map(|v| json!(v)),
            )
            .opt(
                "useCaseAvailable",
                self.use_case_available.map(|a| json!(a)),
            )
            .opt(
                "scenarioSupport",
                if self.scenario_support.is_empty() {
                    None
                } else {
                    Some(json!(self.scenario_support))
                },
            )
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        let scenario_support = match seq.get("scenarioSupport") {
            None => Vec::new(),
            Some(list) => list
                .as_array()
                .ok_or_else(|| EebusError::Parse("scenarioSupport: expected an array".into()))?
                .iter()
                .map(|v| as_u32(v, "scenario"))
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(UseCaseSupport {
            use_case_name: as_str(seq.require("useCaseName")?, "useCaseName")?,
            use_case_version: seq
                .get("useCaseVersion")
                .map(|v| as_str(v, "useCaseVersion"))
                .transpose()?,
            use_case_available: seq
                .get("useCaseAvailable")
                .map(|v| as_bool(v, "useCaseAvailable"))
                .transpose()?,
            scenario_support,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UseCaseInformation {
    pub address: Option<EntityAddress>,
    /// E.g. `CS`, `EG`, `MA`, `MU`.
    pub actor: String,
    pub use_case_support: Vec<UseCaseSupport>,
}

impl UseCaseInformation {
    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .opt("address", self.address.as_ref().map(EntityAddress::to_value))
            .field("actor", json!(self.actor))
            .field(
                "useCaseSupport",
                Value::Array(
                    self.use_case_support
                        .iter()
                        .map(UseCaseSupport::to_value)
                        .collect(),
                ),
            )
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        let support = seq
            .require("useCaseSupport")?
            .as_array()
            .ok_or_else(|| EebusError::Parse("useCaseSupport: expected an array".into()))?
            .iter()
            .map(UseCaseSupport::from_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(UseCaseInformation {
            address: seq
                .get("address")
                .map(EntityAddress::from_value)
                .transpose()?,
            actor: as_str(seq.require("actor")?, "actor")?,
            use_case_support: support,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeManagementUseCaseData {
    pub use_case_information: Vec<UseCaseInformation>,
}

impl NodeManagementUseCaseData {
    pub fn to_value(&self) -> Value {
        SeqBuilder::new()
            .opt(
                "useCaseInformation",
                if self.use_case_information.is_empty() {
                    None
                } else {
                    Some(Value::Array(
                        self.use_case_information
                            .iter()
                            .map(UseCaseInformation::to_value)
                            .collect(),
                    ))
                },
            )
            .build()
    }

    pub fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(NodeManagementUseCaseData {
            use_case_information: parse_list(
                &seq,
                "useCaseInformation",
                UseCaseInformation::from_value,
            )?,
        })
    }
}

// ---------------------------------------------------------------------------
// Subscription management
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionManagementEntry {
    pub subscription_id: Option<u32>,
    pub client_address: FeatureAddress,
    pub server_address: FeatureAddress,
}

impl SubscriptionManagementEntry {
    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .opt("subscriptionId", self.subscription_id.map(|id| json!(id)))
            .field("clientAddress", self.client_address.to_value())
            .field("serverAddress", self.server_address.to_value())
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(SubscriptionManagementEntry {
            subscription_id: seq
                .get("subscriptionId")
                .map(|v| as_u32(v, "subscriptionId"))
                .transpose()?,
            client_address: FeatureAddress::from_value(seq.require("clientAddress")?)?,
            server_address: FeatureAddress::from_value(seq.require("serverAddress")?)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeManagementSubscriptionData {
    pub subscription_entry: Vec<SubscriptionManagementEntry>,
}

impl NodeManagementSubscriptionData {
    pub fn to_value(&self) -> Value {
        entries_value("subscriptionEntry", &self.subscription_entry, |e| {
            e.to_value()
        })
    }

    pub fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(NodeManagementSubscriptionData {
            subscription_entry: parse_list(
                &seq,
                "subscriptionEntry",
                SubscriptionManagementEntry::from_value,
            )?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionManagementRequest {
    pub client_address: FeatureAddress,
    pub server_address: FeatureAddress,
    pub server_feature_type: Option<String>,
}

impl SubscriptionManagementRequest {
    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .field("clientAddress", self.client_address.to_value())
            .field("serverAddress", self.server_address.to_value())
            .opt(
                "serverFeatureType",
                self.server_feature_type.as_ref().map(|t| json!(t)),
            )
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(SubscriptionManagementRequest {
            client_address: FeatureAddress::from_value(seq.require("clientAddress")?)?,
            server_address: FeatureAddress::from_value(seq.require("serverAddress")?)?,
            server_feature_type: seq
                .get("serverFeatureType")
                .map(|v| as_str(v, "serverFeatureType"))
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeManagementSubscriptionRequestCall {
    pub subscription_request: Option<SubscriptionManagementRequest>,
}

impl NodeManagementSubscriptionRequestCall {
    pub fn new(request: SubscriptionManagementRequest) -> Self {
        NodeManagementSubscriptionRequestCall {
            subscription_request: Some(request),
        }
    }

    pub fn to_value(&self) -> Value {
        SeqBuilder::new()
            .opt(
                "subscriptionRequest",
                self.subscription_request
                    .as_ref()
                    .map(SubscriptionManagementRequest::to_value),
            )
            .build()
    }

    pub fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(NodeManagementSubscriptionRequestCall {
            subscription_request: seq
                .get("subscriptionRequest")
                .map(SubscriptionManagementRequest::from_value)
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubscriptionManagementDelete {
    pub subscription_id: Option<u32>,
    pub client_address: Option<FeatureAddress>,
    pub server_address: Option<FeatureAddress>,
}

impl SubscriptionManagementDelete {
    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .opt("subscriptionId", self.subscription_id.map(|id| json!(id)))
            .opt(
                "clientAddress",
                self.client_address.as_ref().map(FeatureAddress::to_value),
            )
            .opt(
                "serverAddress",
                self.server_address.as_ref().map(FeatureAddress::to_value),
            )
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(SubscriptionManagementDelete {
            subscription_id: seq
                .get("subscriptionId")
                .map(|v| as_u32(v, "subscriptionId"))
                .transpose()?,
            client_address: seq
                .get("clientAddress")
                .map(FeatureAddress::from_value)
                .transpose()?,
            server_address: seq
                .get("serverAddress")
                .map(FeatureAddress::from_value)
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeManagementSubscriptionDeleteCall {
    pub subscription_delete: Option<SubscriptionManagementDelete>,
}

impl NodeManagementSubscriptionDeleteCall {
    pub fn new(delete: SubscriptionManagementDelete) -> Self {
        NodeManagementSubscriptionDeleteCall {
            subscription_delete: Some(delete),
        }
    }

    pub fn to_value(&self) -> Value {
        SeqBuilder::new()
            .opt(
                "subscriptionDelete",
                self.subscription_delete
                    .as_ref()
                    .map(SubscriptionManagementDelete::to_value),
            )
            .build()
    }

    pub fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(NodeManagementSubscriptionDeleteCall {
            subscription_delete: seq
                .get("subscriptionDelete")
                .map(SubscriptionManagementDelete::from_value)
                .transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Binding management (symmetric to subscriptions)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingManagementEntry {
    pub binding_id: Option<u32>,
    pub client_address: FeatureAddress,
    pub server_address: FeatureAddress,
}

impl BindingManagementEntry {
    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .opt("bindingId", self.binding_id.map(|id| json!(id)))
            .field("clientAddress", self.client_address.to_value())
            .field("serverAddress", self.server_address.to_value())
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(BindingManagementEntry {
            binding_id: seq
                .get("bindingId")
                .map(|v| as_u32(v, "bindingId"))
                .transpose()?,
            client_address: FeatureAddress::from_value(seq.require("clientAddress")?)?,
            server_address: FeatureAddress::from_value(seq.require("serverAddress")?)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeManagementBindingData {
    pub binding_entry: Vec<BindingManagementEntry>,
}

impl NodeManagementBindingData {
    pub fn to_value(&self) -> Value {
        entries_value("bindingEntry", &self.binding_entry, |e| e.to_value())
    }

    pub fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(NodeManagementBindingData {
            binding_entry: parse_list(&seq, "bindingEntry", BindingManagementEntry::from_value)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingManagementRequest {
    pub client_address: FeatureAddress,
    pub server_address: FeatureAddress,
    pub server_feature_type: Option<String>,
}

impl BindingManagementRequest {
    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .field("clientAddress", self.client_address.to_value())
            .field("serverAddress", self.server_address.to_value())
            .opt(
                "serverFeatureType",
                self.server_feature_type.as_ref().map(|t| json!(t)),
            )
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(BindingManagementRequest {
            client_address: FeatureAddress::from_value(seq.require("clientAddress")?)?,
            server_address: FeatureAddress::from_value(seq.require("serverAddress")?)?,
            server_feature_type: seq
                .get("serverFeatureType")
                .map(|v| as_str(v, "serverFeatureType"))
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeManagementBindingRequestCall {
    pub binding_request: Option<BindingManagementRequest>,
}

impl NodeManagementBindingRequestCall {
    pub fn new(request: BindingManagementRequest) -> Self {
        NodeManagementBindingRequestCall {
            binding_request: Some(request),
        }
    }

    pub fn to_value(&self) -> Value {
        SeqBuilder::new()
            .opt(
                "bindingRequest",
                self.binding_request
                    .as_ref()
                    .map(BindingManagementRequest::to_value),
            )
            .build()
    }

    pub fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(NodeManagementBindingRequestCall {
            binding_request: seq
                .get("bindingRequest")
                .map(BindingManagementRequest::from_value)
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BindingManagementDelete {
    pub binding_id: Option<u32>,
    pub client_address: Option<FeatureAddress>,
    pub server_address: Option<FeatureAddress>,
}

impl BindingManagementDelete {
    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .opt("bindingId", self.binding_id.map(|id| json!(id)))
            .opt(
                "clientAddress",
                self.client_address.as_ref().map(FeatureAddress::to_value),
            )
            .opt(
                "serverAddress",
                self.server_address.as_ref().map(FeatureAddress::to_value),
            )
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(BindingManagementDelete {
            binding_id: seq
                .get("bindingId")
                .map(|v| as_u32(v, "bindingId"))
                .transpose()?,
            client_address: seq
                .get("clientAddress")
                .map(FeatureAddress::from_value)
                .transpose()?,
            server_address: seq
                .get("serverAddress")
                .map(FeatureAddress::from_value)
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeManagementBindingDeleteCall {
    pub binding_delete: Option<BindingManagementDelete>,
}

impl NodeManagementBindingDeleteCall {
    pub fn new(delete: BindingManagementDelete) -> Self {
        NodeManagementBindingDeleteCall {
            binding_delete: Some(delete),
        }
    }

    pub fn to_value(&self) -> Value {
        SeqBuilder::new()
            .opt(
                "bindingDelete",
                self.binding_delete
                    .as_ref()
                    .map(BindingManagementDelete::to_value),
            )
            .build()
    }

    pub fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(NodeManagementBindingDeleteCall {
            binding_delete: seq
                .get("bindingDelete")
                .map(BindingManagementDelete::from_value)
                .transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Destinations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeManagementDestinationListData {
    pub destination_data: Vec<DeviceDescription>,
}

impl NodeManagementDestinationListData {
    pub fn to_value(&self) -> Value {
        entries_value("destinationData", &self.destination_data, |d| d.to_value())
    }

    pub fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(NodeManagementDestinationListData {
            destination_data: parse_list(&seq, "destinationData", DeviceDescription::from_value)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn entries_value<T>(key: &str, entries: &[T], to_value: impl Fn(&T) -> Value) -> Value {
    SeqBuilder::new()
        .opt(
            key,
            if entries.is_empty() {
                None
            } else {
                Some(Value::Array(entries.iter().map(to_value).collect()))
            },
        )
        .build()
}

fn parse_list<T>(
    seq: &SeqReader<'_>,
    key: &str,
    parse: impl Fn(&Value) -> Result<T, EebusError>,
) -> Result<Vec<T>, EebusError> {
    match seq.get(key) {
        None => Ok(Vec::new()),
        Some(list) => list
            .as_array()
            .ok_or_else(|| EebusError::Parse(format!("{key}: expected an array")))?
            .iter()
            .map(parse)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detailed_discovery_round_trip() {
        let data = NodeManagementDetailedDiscoveryData {
            specification_versions: vec![SPECIFICATION_VERSION.to_owned()],
            device_information: Some(DeviceInformation {
                description: DeviceDescription {
                    device_address: Some(DeviceAddress::new("d:_n:vendor_model-1")),
                    device_type: Some("EnergyManagementSystem".into()),
                    network_feature_set: Some(FeatureSet::Smart),
                },
            }),
            entity_information: vec![EntityInformation {
                description: EntityDescription {
                    entity_address: EntityAddress::new(None, vec![0]),
                    entity_type: Some("DeviceInformation".into()),
                    last_state_change: None,
                    description: None,
                },
            }],
            feature_information: vec![FeatureInformation {
                description: FeatureDescription {
                    feature_address: FeatureAddress::new(None, vec![0], 0),
                    feature_type: Some("NodeManagement".into()),
                    role: Some(Role::Special),
                    supported_function: vec![FunctionProperty {
                        function: FunctionType::NodeManagementDetailedDiscoveryData,
                        possible_operations: PossibleOperations {
                            read: true,
                            ..Default::default()
                        },
                    }],
                    description: None,
                    max_response_delay: None,
                },
            }],
        };

        let round = NodeManagementDetailedDiscoveryData::from_value(&data.to_value()).unwrap();
        assert_eq!(round, data);
    }

    #[test]
    fn possible_operations_round_trip() {
        let ops = PossibleOperations {
            read: true,
            read_partial: false,
            write: true,
            write_partial: true,
        };
        assert_eq!(PossibleOperations::from_value(&ops.to_value()).unwrap(), ops);
    }

    #[test]
    fn subscription_request_call_round_trip() {
        let call = NodeManagementSubscriptionRequestCall::new(SubscriptionManagementRequest {
            client_address: FeatureAddress::new(Some("d:a".into()), vec![0], 0),
            server_address: FeatureAddress::new(Some("d:b".into()), vec![1], 2),
            server_feature_type: Some("LoadControl".into()),
        });
        let round = NodeManagementSubscriptionRequestCall::from_value(&call.to_value()).unwrap();
        assert_eq!(round, call);
    }

    #[test]
    fn use_case_data_round_trip() {
        let data = NodeManagementUseCaseData {
            use_case_information: vec![UseCaseInformation {
                address: Some(EntityAddress::new(Some("d:a".into()), vec![1])),
                actor: "CS".into(),
                use_case_support: vec![UseCaseSupport {
                    use_case_name: "controllableSystemLPC".into(),
                    use_case_version: Some("1.0.0".into()),
                    use_case_available: Some(true),
                    scenario_support: vec![1, 2, 3],
                }],
            }],
        };
        assert_eq!(
            NodeManagementUseCaseData::from_value(&data.to_value()).unwrap(),
            data
        );
    }
}
