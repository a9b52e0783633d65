//! Typed function payloads and partial-update semantics.
//!
//! Each function type has a statically-known data schema. List payloads
//! are keyed by an element id and support partial writes (merge by id)
//! and partial deletes (remove by id, or clear without selectors).

use serde_json::{Value, json};

use crate::EebusError;
use crate::value::{SeqBuilder, SeqReader, as_bool, as_i64, as_str, as_u32, as_u64};

use super::datagram::Filter;
use super::node_management::{
    NodeManagementBindingData, NodeManagementBindingDeleteCall, NodeManagementBindingRequestCall,
    NodeManagementDestinationListData, NodeManagementDetailedDiscoveryData,
    NodeManagementSubscriptionData, NodeManagementSubscriptionDeleteCall,
    NodeManagementSubscriptionRequestCall, NodeManagementUseCaseData,
};

// ---------------------------------------------------------------------------
// Function type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FunctionType {
    NodeManagementDetailedDiscoveryData,
    NodeManagementUseCaseData,
    NodeManagementSubscriptionData,
    NodeManagementSubscriptionRequestCall,
    NodeManagementSubscriptionDeleteCall,
    NodeManagementBindingData,
    NodeManagementBindingRequestCall,
    NodeManagementBindingDeleteCall,
    NodeManagementDestinationListData,
    ResultData,
    DeviceClassificationManufacturerData,
    DeviceDiagnosisHeartbeatData,
    LoadControlLimitListData,
    LoadControlLimitDescriptionListData,
    MeasurementListData,
    MeasurementDescriptionListData,
    DeviceConfigurationKeyValueListData,
    DeviceConfigurationKeyValueDescriptionListData,
}

impl FunctionType {
    pub fn as_str(self) -> &'static str {
        match self {
            FunctionType::NodeManagementDetailedDiscoveryData => {
                "nodeManagementDetailedDiscoveryData"
            }
            FunctionType::NodeManagementUseCaseData => "nodeManagementUseCaseData",
            FunctionType::NodeManagementSubscriptionData => "nodeManagementSubscriptionData",
            FunctionType::NodeManagementSubscriptionRequestCall => {
                "nodeManagementSubscriptionRequestCall"
            }
            FunctionType::NodeManagementSubscriptionDeleteCall => {
                "nodeManagementSubscriptionDeleteCall"
            }
            FunctionType::NodeManagementBindingData => "nodeManagementBindingData",
            FunctionType::NodeManagementBindingRequestCall => "nodeManagementBindingRequestCall",
            FunctionType::NodeManagementBindingDeleteCall => "nodeManagementBindingDeleteCall",
            FunctionType::NodeManagementDestinationListData => "nodeManagementDestinationListData",
            FunctionType::ResultData => "resultData",
            FunctionType::DeviceClassificationManufacturerData => {
                "deviceClassificationManufacturerData"
            }
            FunctionType::DeviceDiagnosisHeartbeatData => "deviceDiagnosisHeartbeatData",
            FunctionType::LoadControlLimitListData => "loadControlLimitListData",
            FunctionType::LoadControlLimitDescriptionListData => {
                "loadControlLimitDescriptionListData"
            }
            FunctionType::MeasurementListData => "measurementListData",
            FunctionType::MeasurementDescriptionListData => "measurementDescriptionListData",
            FunctionType::DeviceConfigurationKeyValueListData => {
                "deviceConfigurationKeyValueListData"
            }
            FunctionType::DeviceConfigurationKeyValueDescriptionListData => {
                "deviceConfigurationKeyValueDescriptionListData"
            }
        }
    }

    pub fn parse(s: &str) -> Result<Self, EebusError> {
        use FunctionType::*;
        Ok(match s {
            "nodeManagementDetailedDiscoveryData" => NodeManagementDetailedDiscoveryData,
            "nodeManagementUseCaseData" => NodeManagementUseCaseData,
            "nodeManagementSubscriptionData" => NodeManagementSubscriptionData,
            "nodeManagementSubscriptionRequestCall" => NodeManagementSubscriptionRequestCall,
            "nodeManagementSubscriptionDeleteCall" => NodeManagementSubscriptionDeleteCall,
            "nodeManagementBindingData" => NodeManagementBindingData,
            "nodeManagementBindingRequestCall" => NodeManagementBindingRequestCall,
            "nodeManagementBindingDeleteCall" => NodeManagementBindingDeleteCall,
            "nodeManagementDestinationListData" => NodeManagementDestinationListData,
            "resultData" => ResultData,
            "deviceClassificationManufacturerData" => DeviceClassificationManufacturerData,
            "deviceDiagnosisHeartbeatData" => DeviceDiagnosisHeartbeatData,
            "loadControlLimitListData" => LoadControlLimitListData,
            "loadControlLimitDescriptionListData" => LoadControlLimitDescriptionListData,
            "measurementListData" => MeasurementListData,
            "measurementDescriptionListData" => MeasurementDescriptionListData,
            "deviceConfigurationKeyValueListData" => DeviceConfigurationKeyValueListData,
            "deviceConfigurationKeyValueDescriptionListData" => {
                DeviceConfigurationKeyValueDescriptionListData
            }
            other => {
                return Err(EebusError::InputArgumentOutOfRange(format!(
                    "unknown function type `{other}`"
                )));
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Scalar building blocks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScaledNumber {
    pub number: i64,
    pub scale: Option<i64>,
}

impl ScaledNumber {
    pub fn new(number: i64) -> Self {
        ScaledNumber {
            number,
            scale: None,
        }
    }

    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .field("number", json!(self.number))
            .opt("scale", self.scale.map(|s| json!(s)))
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(ScaledNumber {
            number: as_i64(seq.require("number")?, "number")?,
            scale: seq.get("scale").map(|v| as_i64(v, "scale")).transpose()?,
        })
    }
}

/// `resultData` error numbers.
pub mod result_error {
    pub const NO_ERROR: u32 = 0;
    pub const GENERAL_ERROR: u32 = 1;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultData {
    pub error_number: u32,
    pub description: Option<String>,
}

impl ResultData {
    pub fn success() -> Self {
        ResultData {
            error_number: result_error::NO_ERROR,
            description: None,
        }
    }

    pub fn error(error_number: u32, description: Option<&str>) -> Self {
        ResultData {
            error_number,
            description: description.map(str::to_owned),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_number == result_error::NO_ERROR
    }

    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .field("errorNumber", json!(self.error_number))
            .opt("description", self.description.as_ref().map(|d| json!(d)))
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(ResultData {
            error_number: as_u32(seq.require("errorNumber")?, "errorNumber")?,
            description: seq
                .get("description")
                .map(|v| as_str(v, "description"))
                .transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Device classification / diagnosis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceClassificationManufacturerData {
    pub device_name: Option<String>,
    pub device_code: Option<String>,
    pub serial_number: Option<String>,
    pub brand_name: Option<String>,
    pub vendor_name: Option<String>,
}

impl DeviceClassificationManufacturerData {
    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .opt("deviceName", self.device_name.as_ref().map(|v| json!(v)))
            .opt("deviceCode", self.device_code.as_ref().map(|v| json!(v)))
            .opt("serialNumber", self.serial_number.as_ref().map(|v| json!(v)))
            .opt("brandName", self.brand_name.as_ref().map(|v| json!(v)))
            .opt("vendorName", self.vendor_name.as_ref().map(|v| json!(v)))
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        let field = |key: &str| seq.get(key).map(|v| as_str(v, key)).transpose();
        Ok(DeviceClassificationManufacturerData {
            device_name: field("deviceName")?,
            device_code: field("deviceCode")?,
            serial_number: field("serialNumber")?,
            brand_name: field("brandName")?,
            vendor_name: field("vendorName")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceDiagnosisHeartbeatData {
    /// Heartbeat period hint in milliseconds.
    pub timeout: Option<u64>,
    pub heartbeat_counter: Option<u64>,
}

impl DeviceDiagnosisHeartbeatData {
    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .opt("timeout", self.timeout.map(|t| json!(t)))
            .opt(
                "heartbeatCounter",
                self.heartbeat_counter.map(|c| json!(c)),
            )
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(DeviceDiagnosisHeartbeatData {
            timeout: seq
                .get("timeout")
                .map(|v| as_u64(v, "timeout"))
                .transpose()?,
            heartbeat_counter: seq
                .get("heartbeatCounter")
                .map(|v| as_u64(v, "heartbeatCounter"))
                .transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Load control
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoadControlLimit {
    pub limit_id: u32,
    pub is_limit_changeable: Option<bool>,
    pub is_limit_active: Option<bool>,
    pub value: Option<ScaledNumber>,
}

impl LoadControlLimit {
    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .field("limitId", json!(self.limit_id))
            .opt(
                "isLimitChangeable",
                self.is_limit_changeable.map(|v| json!(v)),
            )
            .opt("isLimitActive", self.is_limit_active.map(|v| json!(v)))
            .opt("value", self.value.as_ref().map(ScaledNumber::to_value))
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(LoadControlLimit {
            limit_id: as_u32(seq.require("limitId")?, "limitId")?,
            is_limit_changeable: seq
                .get("isLimitChangeable")
                .map(|v| as_bool(v, "isLimitChangeable"))
                .transpose()?,
            is_limit_active: seq
                .get("isLimitActive")
                .map(|v| as_bool(v, "isLimitActive"))
                .transpose()?,
            value: seq
                .get("value")
                .map(ScaledNumber::from_value)
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoadControlLimitListData {
    pub limits: Vec<LoadControlLimit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoadControlLimitDescription {
    pub limit_id: u32,
    pub limit_type: Option<String>,
    pub limit_category: Option<String>,
    pub limit_direction: Option<String>,
    pub measurement_id: Option<u32>,
    pub unit: Option<String>,
    pub scope_type: Option<String>,
}

impl LoadControlLimitDescription {
    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .field("limitId", json!(self.limit_id))
            .opt("limitType", self.limit_type.as_ref().map(|v| json!(v)))
            .opt(
                "limitCategory",
                self.limit_category.as_ref().map(|v| json!(v)),
            )
            .opt(
                "limitDirection",
                self.limit_direction.as_ref().map(|v| json!(v)),
            )
            .opt("measurementId", self.measurement_id.map(|v| json!(v)))
            .opt("unit", self.unit.as_ref().map(|v| json!(v)))
            .opt("scopeType", self.scope_type.as_ref().map(|v| json!(v)))
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        let field = |key: &str| seq.get(key).map(|v| as_str(v, key)).transpose();
        Ok(LoadControlLimitDescription {
            limit_id: as_u32(seq.require("limitId")?, "limitId")?,
            limit_type: field("limitType")?,
            limit_category: field("limitCategory")?,
            limit_direction: field("limitDirection")?,
            measurement_id: seq
                .get("measurementId")
                .map(|v| as_u32(v, "measurementId"))
                .transpose()?,
            unit: field("unit")?,
            scope_type: field("scopeType")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoadControlLimitDescriptionListData {
    pub descriptions: Vec<LoadControlLimitDescription>,
}

// ---------------------------------------------------------------------------
// Measurement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Measurement {
    pub measurement_id: u32,
    pub value_type: Option<String>,
    pub timestamp: Option<String>,
    pub value: Option<ScaledNumber>,
    pub value_state: Option<String>,
}

impl Measurement {
    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .field("measurementId", json!(self.measurement_id))
            .opt("valueType", self.value_type.as_ref().map(|v| json!(v)))
            .opt("timestamp", self.timestamp.as_ref().map(|v| json!(v)))
            .opt("value", self.value.as_ref().map(ScaledNumber::to_value))
            .opt("valueState", self.value_state.as_ref().map(|v| json!(v)))
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        let field = |key: &str| seq.get(key).map(|v| as_str(v, key)).transpose();
        Ok(Measurement {
            measurement_id: as_u32(seq.require("measurementId")?, "measurementId")?,
            value_type: field("valueType")?,
            timestamp: field("timestamp")?,
            value: seq
                .get("value")
                .map(ScaledNumber::from_value)
                .transpose()?,
            value_state: field("valueState")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MeasurementListData {
    pub measurements: Vec<Measurement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MeasurementDescription {
    pub measurement_id: u32,
    pub measurement_type: Option<String>,
    pub commodity_type: Option<String>,
    pub unit: Option<String>,
    pub scope_type: Option<String>,
}

impl MeasurementDescription {
    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .field("measurementId", json!(self.measurement_id))
            .opt(
                "measurementType",
                self.measurement_type.as_ref().map(|v| json!(v)),
            )
            .opt(
                "commodityType",
                self.commodity_type.as_ref().map(|v| json!(v)),
            )
            .opt("unit", self.unit.as_ref().map(|v| json!(v)))
            .opt("scopeType", self.scope_type.as_ref().map(|v| json!(v)))
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        let field = |key: &str| seq.get(key).map(|v| as_str(v, key)).transpose();
        Ok(MeasurementDescription {
            measurement_id: as_u32(seq.require("measurementId")?, "measurementId")?,
            measurement_type: field("measurementType")?,
            commodity_type: field("commodityType")?,
            unit: field("unit")?,
            scope_type: field("scopeType")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MeasurementDescriptionListData {
    pub descriptions: Vec<MeasurementDescription>,
}

// ---------------------------------------------------------------------------
// Device configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyValue {
    Boolean(bool),
    ScaledNumber(ScaledNumber),
    Text(String),
}

impl KeyValue {
    fn to_value(&self) -> Value {
        match self {
            KeyValue::Boolean(b) => json!({ "boolean": b }),
            KeyValue::ScaledNumber(n) => json!({ "scaledNumber": n.to_value() }),
            KeyValue::Text(s) => json!({ "string": s }),
        }
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let (key, inner) = crate::value::choice_of(value)?;
        match key {
            "boolean" => Ok(KeyValue::Boolean(as_bool(inner, "boolean")?)),
            "scaledNumber" => Ok(KeyValue::ScaledNumber(ScaledNumber::from_value(inner)?)),
            "string" => Ok(KeyValue::Text(as_str(inner, "string")?)),
            other => Err(EebusError::Parse(format!(
                "unknown key value choice `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfigurationKeyValue {
    pub key_id: u32,
    pub value: Option<KeyValue>,
    pub is_value_changeable: Option<bool>,
}

impl DeviceConfigurationKeyValue {
    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .field("keyId", json!(self.key_id))
            .opt("value", self.value.as_ref().map(KeyValue::to_value))
            .opt(
                "isValueChangeable",
                self.is_value_changeable.map(|v| json!(v)),
            )
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        Ok(DeviceConfigurationKeyValue {
            key_id: as_u32(seq.require("keyId")?, "keyId")?,
            value: seq.get("value").map(KeyValue::from_value).transpose()?,
            is_value_changeable: seq
                .get("isValueChangeable")
                .map(|v| as_bool(v, "isValueChangeable"))
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceConfigurationKeyValueListData {
    pub key_values: Vec<DeviceConfigurationKeyValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceConfigurationKeyValueDescription {
    pub key_id: u32,
    pub key_name: Option<String>,
    pub value_type: Option<String>,
    pub unit: Option<String>,
}

impl DeviceConfigurationKeyValueDescription {
    fn to_value(&self) -> Value {
        SeqBuilder::new()
            .field("keyId", json!(self.key_id))
            .opt("keyName", self.key_name.as_ref().map(|v| json!(v)))
            .opt("valueType", self.value_type.as_ref().map(|v| json!(v)))
            .opt("unit", self.unit.as_ref().map(|v| json!(v)))
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, EebusError> {
        let seq = SeqReader::new(value)?;
        let field = |key: &str| seq.get(key).map(|v| as_str(v, key)).transpose();
        Ok(DeviceConfigurationKeyValueDescription {
            key_id: as_u32(seq.require("keyId")?, "keyId")?,
            key_name: field("keyName")?,
            value_type: field("valueType")?,
            unit: field("unit")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceConfigurationKeyValueDescriptionListData {
    pub descriptions: Vec<DeviceConfigurationKeyValueDescription>,
}

// ---------------------------------------------------------------------------
// FunctionData choice
// ---------------------------------------------------------------------------

/// One function's typed data, the choice carried in a command.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionData {
    NodeManagementDetailedDiscoveryData(NodeManagementDetailedDiscoveryData),
    NodeManagementUseCaseData(NodeManagementUseCaseData),
    NodeManagementSubscriptionData(NodeManagementSubscriptionData),
    NodeManagementSubscriptionRequestCall(NodeManagementSubscriptionRequestCall),
    NodeManagementSubscriptionDeleteCall(NodeManagementSubscriptionDeleteCall),
    NodeManagementBindingData(NodeManagementBindingData),
    NodeManagementBindingRequestCall(NodeManagementBindingRequestCall),
    NodeManagementBindingDeleteCall(NodeManagementBindingDeleteCall),
    NodeManagementDestinationListData(NodeManagementDestinationListData),
    ResultData(ResultData),
    DeviceClassificationManufacturerData(DeviceClassificationManufacturerData),
    DeviceDiagnosisHeartbeatData(DeviceDiagnosisHeartbeatData),
    LoadControlLimitListData(LoadControlLimitListData),
    LoadControlLimitDescriptionListData(LoadControlLimitDescriptionListData),
    MeasurementListData(MeasurementListData),
    MeasurementDescriptionListData(MeasurementDescriptionListData),
    DeviceConfigurationKeyValueListData(DeviceConfigurationKeyValueListData),
    DeviceConfigurationKeyValueDescriptionListData(DeviceConfigurationKeyValueDescriptionListData),
}

impl FunctionData {
    pub fn function_type(&self) -> FunctionType {
        match self {
            FunctionData::NodeManagementDetailedDiscoveryData(_) => {
                FunctionType::NodeManagementDetailedDiscoveryData
            }
            FunctionData::NodeManagementUseCaseData(_) => FunctionType::NodeManagementUseCaseData,
            FunctionData::NodeManagementSubscriptionData(_) => {
                FunctionType::NodeManagementSubscriptionData
            }
            FunctionData::NodeManagementSubscriptionRequestCall(_) => {
                FunctionType::NodeManagementSubscriptionRequestCall
            }
            FunctionData::NodeManagementSubscriptionDeleteCall(_) => {
                FunctionType::NodeManagementSubscriptionDeleteCall
            }
            FunctionData::NodeManagementBindingData(_) => FunctionType::NodeManagementBindingData,
            FunctionData::NodeManagementBindingRequestCall(_) => {
                FunctionType::NodeManagementBindingRequestCall
            }
            FunctionData::NodeManagementBindingDeleteCall(_) => {
                FunctionType::NodeManagementBindingDeleteCall
            }
            FunctionData::NodeManagementDestinationListData(_) => {
                FunctionType::NodeManagementDestinationListData
            }
            FunctionData::ResultData(_) => FunctionType::ResultData,
            FunctionData::DeviceClassificationManufacturerData(_) => {
                FunctionType::DeviceClassificationManufacturerData
            }
            FunctionData::DeviceDiagnosisHeartbeatData(_) => {
                FunctionType::DeviceDiagnosisHeartbeatData
            }
            FunctionData::LoadControlLimitListData(_) => FunctionType::LoadControlLimitListData,
            FunctionData::LoadControlLimitDescriptionListData(_) => {
                FunctionType::LoadControlLimitDescriptionListData
            }
            FunctionData::MeasurementListData(_) => FunctionType::MeasurementListData,
            FunctionData::MeasurementDescriptionListData(_) => {
                FunctionType::MeasurementDescriptionListData
            }
            FunctionData::DeviceConfigurationKeyValueListData(_) => {
                FunctionType::DeviceConfigurationKeyValueListData
            }
            FunctionData::DeviceConfigurationKeyValueDescriptionListData(_) => {
                FunctionType::DeviceConfigurationKeyValueDescriptionListData
            }
        }
    }

    /// An empty value of the given type, as sent in read requests.
    pub fn empty(function_type: FunctionType) -> FunctionData {
        use FunctionData as D;
        use FunctionType as T;
        match function_type {
            T::NodeManagementDetailedDiscoveryData => {
                D::NodeManagementDetailedDiscoveryData(Default::default())
            }
            T::NodeManagementUseCaseData => D::NodeManagementUseCaseData(Default::default()),
            T::NodeManagementSubscriptionData => {
                D::NodeManagementSubscriptionData(Default::default())
            }
            T::NodeManagementSubscriptionRequestCall => {
                D::NodeManagementSubscriptionRequestCall(Default::default())
            }
            T::NodeManagementSubscriptionDeleteCall => {
                D::NodeManagementSubscriptionDeleteCall(Default::default())
            }
            T::NodeManagementBindingData => D::NodeManagementBindingData(Default::default()),
            T::NodeManagementBindingRequestCall => {
                D::NodeManagementBindingRequestCall(Default::default())
            }
            T::NodeManagementBindingDeleteCall => {
                D::NodeManagementBindingDeleteCall(Default::default())
            }
            T::NodeManagementDestinationListData => {
                D::NodeManagementDestinationListData(Default::default())
            }
            T::ResultData => D::ResultData(Default::default()),
            T::DeviceClassificationManufacturerData => {
                D::DeviceClassificationManufacturerData(Default::default())
            }
            T::DeviceDiagnosisHeartbeatData => D::DeviceDiagnosisHeartbeatData(Default::default()),
            T::LoadControlLimitListData => D::LoadControlLimitListData(Default::default()),
            T::LoadControlLimitDescriptionListData => {
                D::LoadControlLimitDescriptionListData(Default::default())
            }
            T::MeasurementListData => D::MeasurementListData(Default::default()),
            T::MeasurementDescriptionListData => {
                D::MeasurementDescriptionListData(Default::default())
            }
            T::DeviceConfigurationKeyValueListData => {
                D::DeviceConfigurationKeyValueListData(Default::default())
            }
            T::DeviceConfigurationKeyValueDescriptionListData => {
                D::DeviceConfigurationKeyValueDescriptionListData(Default::default())
            }
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            FunctionData::NodeManagementDetailedDiscoveryData(d) => d.to_value(),
            FunctionData::NodeManagementUseCaseData(d) => d.to_value(),
            FunctionData::NodeManagementSubscriptionData(d) => d.to_value(),
            FunctionData::NodeManagementSubscriptionRequestCall(d) => d.to_value(),
            FunctionData::NodeManagementSubscriptionDeleteCall(d) => d.to_value(),
            FunctionData::NodeManagementBindingData(d) => d.to_value(),
            FunctionData::NodeManagementBindingRequestCall(d) => d.to_value(),
            FunctionData::NodeManagementBindingDeleteCall(d) => d.to_value(),
            FunctionData::NodeManagementDestinationListData(d) => d.to_value(),
            FunctionData::ResultData(d) => d.to_value(),
            FunctionData::DeviceClassificationManufacturerData(d) => d.to_value(),
            FunctionData::DeviceDiagnosisHeartbeatData(d) => d.to_value(),
            FunctionData::LoadControlLimitListData(d) => SeqBuilder::new()
                .field(
                    "loadControlLimitData",
                    Value::Array(d.limits.iter().map(LoadControlLimit::to_value).collect()),
                )
                .build(),
            FunctionData::LoadControlLimitDescriptionListData(d) => SeqBuilder::new()
                .field(
                    "loadControlLimitDescriptionData",
                    Value::Array(
                        d.descriptions
                            .iter()
                            .map(LoadControlLimitDescription::to_value)
                            .collect(),
                    ),
                )
                .build(),
            FunctionData::MeasurementListData(d) => SeqBuilder::new()
                .field(
                    "measurementData",
                    Value::Array(d.measurements.iter().map(Measurement::to_value).collect()),
                )
                .build(),
            FunctionData::MeasurementDescriptionListData(d) => SeqBuilder::new()
                .field(
                    "measurementDescriptionData",
                    Value::Array(
                        d.descriptions
                            .iter()
                            .map(MeasurementDescription::to_value)
                            .collect(),
                    ),
                )
                .build(),
            FunctionData::DeviceConfigurationKeyValueListData(d) => SeqBuilder::new()
                .field(
                    "deviceConfigurationKeyValueData",
                    Value::Array(
                        d.key_values
                            .iter()
                            .map(DeviceConfigurationKeyValue::to_value)
                            .collect(),
                    ),
                )
                .build(),
            FunctionData::DeviceConfigurationKeyValueDescriptionListData(d) => SeqBuilder::new()
                .field(
                    "deviceConfigurationKeyValueDescriptionData",
                    Value::Array(
                        d.descriptions
                            .iter()
                            .map(DeviceConfigurationKeyValueDescription::to_value)
                            .collect(),
                    ),
                )
                .build(),
        }
    }

    /// Decode a data choice given its wire key.
    pub fn from_keyed_value(key: &str, value: &Value) -> Result<Self, EebusError> {
        let function_type = FunctionType::parse(key)?;
        Self::from_typed_value(function_type, value)
    }

    pub fn from_typed_value(
        function_type: FunctionType,
        value: &Value,
    ) -> Result<Self, EebusError> {
        use FunctionData as D;
        use FunctionType as T;
        Ok(match function_type {
            T::NodeManagementDetailedDiscoveryData => D::NodeManagementDetailedDiscoveryData(
                NodeManagementDetailedDiscoveryData::from_value(value)?,
            ),
            T::NodeManagementUseCaseData => {
                D::NodeManagementUseCaseData(NodeManagementUseCaseData::from_value(value)?)
            }
            T::NodeManagementSubscriptionData => D::NodeManagementSubscriptionData(
                NodeManagementSubscriptionData::from_value(value)?,
            ),
            T::NodeManagementSubscriptionRequestCall => D::NodeManagementSubscriptionRequestCall(
                NodeManagementSubscriptionRequestCall::from_value(value)?,
            ),
            T::NodeManagementSubscriptionDeleteCall => D::NodeManagementSubscriptionDeleteCall(
                NodeManagementSubscriptionDeleteCall::from_value(value)?,
            ),
            T::NodeManagementBindingData => {
                D::NodeManagementBindingData(NodeManagementBindingData::from_value(value)?)
            }
            T::NodeManagementBindingRequestCall => D::NodeManagementBindingRequestCall(
                NodeManagementBindingRequestCall::from_value(value)?,
            ),
            T::NodeManagementBindingDeleteCall => D::NodeManagementBindingDeleteCall(
                NodeManagementBindingDeleteCall::from_value(value)?,
            ),
            T::NodeManagementDestinationListData => D::NodeManagementDestinationListData(
                NodeManagementDestinationListData::from_value(value)?,
            ),
            T::ResultData => D::ResultData(ResultData::from_value(value)?),
            T::DeviceClassificationManufacturerData => D::DeviceClassificationManufacturerData(
                DeviceClassificationManufacturerData::from_value(value)?,
            ),
            T::DeviceDiagnosisHeartbeatData => {
                D::DeviceDiagnosisHeartbeatData(DeviceDiagnosisHeartbeatData::from_value(value)?)
            }
            T::LoadControlLimitListData => D::LoadControlLimitListData(LoadControlLimitListData {
                limits: rows(value, "loadControlLimitData", LoadControlLimit::from_value)?,
            }),
            T::LoadControlLimitDescriptionListData => {
                D::LoadControlLimitDescriptionListData(LoadControlLimitDescriptionListData {
                    descriptions: rows(
                        value,
                        "loadControlLimitDescriptionData",
                        LoadControlLimitDescription::from_value,
                    )?,
                })
            }
            T::MeasurementListData => D::MeasurementListData(MeasurementListData {
                measurements: rows(value, "measurementData", Measurement::from_value)?,
            }),
            T::MeasurementDescriptionListData => {
                D::MeasurementDescriptionListData(MeasurementDescriptionListData {
                    descriptions: rows(
                        value,
                        "measurementDescriptionData",
                        MeasurementDescription::from_value,
                    )?,
                })
            }
            T::DeviceConfigurationKeyValueListData => {
                D::DeviceConfigurationKeyValueListData(DeviceConfigurationKeyValueListData {
                    key_values: rows(
                        value,
                        "deviceConfigurationKeyValueData",
                        DeviceConfigurationKeyValue::from_value,
                    )?,
                })
            }
            T::DeviceConfigurationKeyValueDescriptionListData => {
                D::DeviceConfigurationKeyValueDescriptionListData(
                    DeviceConfigurationKeyValueDescriptionListData {
                        descriptions: rows(
                            value,
                            "deviceConfigurationKeyValueDescriptionData",
                            DeviceConfigurationKeyValueDescription::from_value,
                        )?,
                    },
                )
            }
        })
    }

    /// Apply a partial write: merge list rows by id, replace scalars.
    ///
    /// Without selectors the incoming rows are merged into the stored list;
    /// with selectors only rows whose id is selected are touched.
    pub fn update_partial(
        &mut self,
        incoming: &FunctionData,
        filter: Option<&Filter>,
    ) -> Result<(), EebusError> {
        if self.function_type() != incoming.function_type() {
            return Err(EebusError::InputArgument(
                "partial update with mismatched function type".into(),
            ));
        }

        match (self, incoming) {
            (
                FunctionData::LoadControlLimitListData(stored),
                FunctionData::LoadControlLimitListData(new),
            ) => {
                let selected = filter.and_then(|f| f.selected_ids("limitId"));
                merge_rows(
                    &mut stored.limits,
                    new.limits.clone(),
                    |row| row.limit_id,
                    selected.as_deref(),
                );
            }
            (
                FunctionData::LoadControlLimitDescriptionListData(stored),
                FunctionData::LoadControlLimitDescriptionListData(new),
            ) => {
                let selected = filter.and_then(|f| f.selected_ids("limitId"));
                merge_rows(
                    &mut stored.descriptions,
                    new.descriptions.clone(),
                    |row| row.limit_id,
                    selected.as_deref(),
                );
            }
            (FunctionData::MeasurementListData(stored), FunctionData::MeasurementListData(new)) => {
                let selected = filter.and_then(|f| f.selected_ids("measurementId"));
                merge_rows(
                    &mut stored.measurements,
                    new.measurements.clone(),
                    |row| row.measurement_id,
                    selected.as_deref(),
                );
            }
            (
                FunctionData::MeasurementDescriptionListData(stored),
                FunctionData::MeasurementDescriptionListData(new),
            ) => {
                let selected = filter.and_then(|f| f.selected_ids("measurementId"));
                merge_rows(
                    &mut stored.descriptions,
                    new.descriptions.clone(),
                    |row| row.measurement_id,
                    selected.as_deref(),
                );
            }
            (
                FunctionData::DeviceConfigurationKeyValueListData(stored),
                FunctionData::DeviceConfigurationKeyValueListData(new),
            ) => {
                let selected = filter.and_then(|f| f.selected_ids("keyId"));
                merge_rows(
                    &mut stored.key_values,
                    new.key_values.clone(),
                    |row| row.key_id,
                    selected.as_deref(),
                );
            }
            (
                FunctionData::DeviceConfigurationKeyValueDescriptionListData(stored),
                FunctionData::DeviceConfigurationKeyValueDescriptionListData(new),
            ) => {
                let selected = filter.and_then(|f| f.selected_ids("keyId"));
                merge_rows(
                    &mut stored.descriptions,
                    new.descriptions.clone(),
                    |row| row.key_id,
                    selected.as_deref(),
                );
            }
            // Scalar payloads: a partial write replaces the stored value.
            (stored, new) => *stored = new.clone(),
        }

        Ok(())
    }

    /// Apply a partial delete: remove selected rows, or clear the list when
    /// the filter names no selectors.
    pub fn delete_partial(&mut self, filter: Option<&Filter>) -> Result<(), EebusError> {
        match self {
            FunctionData::LoadControlLimitListData(d) => {
                let selected = filter.and_then(|f| f.selected_ids("limitId"));
                delete_rows(&mut d.limits, |row| row.limit_id, selected.as_deref());
            }
            FunctionData::LoadControlLimitDescriptionListData(d) => {
                let selected = filter.and_then(|f| f.selected_ids("limitId"));
                delete_rows(&mut d.descriptions, |row| row.limit_id, selected.as_deref());
            }
            FunctionData::MeasurementListData(d) => {
                let selected = filter.and_then(|f| f.selected_ids("measurementId"));
                delete_rows(
                    &mut d.measurements,
                    |row| row.measurement_id,
                    selected.as_deref(),
                );
            }
            FunctionData::MeasurementDescriptionListData(d) => {
                let selected = filter.and_then(|f| f.selected_ids("measurementId"));
                delete_rows(
                    &mut d.descriptions,
                    |row| row.measurement_id,
                    selected.as_deref(),
                );
            }
            FunctionData::DeviceConfigurationKeyValueListData(d) => {
                let selected = filter.and_then(|f| f.selected_ids("keyId"));
                delete_rows(&mut d.key_values, |row| row.key_id, selected.as_deref());
            }
            FunctionData::DeviceConfigurationKeyValueDescriptionListData(d) => {
                let selected = filter.and_then(|f| f.selected_ids("keyId"));
                delete_rows(&mut d.descriptions, |row| row.key_id, selected.as_deref());
            }
            _ => {
                return Err(EebusError::NotImplemented(
                    "partial delete on a non-list payload".into(),
                ));
            }
        }
        Ok(())
    }
}

fn rows<R>(
    value: &Value,
    key: &str,
    parse: impl Fn(&Value) -> Result<R, EebusError>,
) -> Result<Vec<R>, EebusError> {
    let seq = SeqReader::new(value)?;
    let Some(list) = seq.get(key) else {
        return Ok(Vec::new());
    };
    let list = list
        .as_array()
        .ok_or_else(|| EebusError::Parse(format!("{key}: expected an array")))?;
    list.iter().map(parse).collect()
}

fn merge_rows<R>(
    existing: &mut Vec<R>,
    incoming: Vec<R>,
    id_of: impl Fn(&R) -> u32,
    selected: Option<&[u32]>,
) {
    for row in incoming {
        let id = id_of(&row);
        if let Some(selected) = selected {
            if !selected.contains(&id) {
                continue;
            }
        }
        match existing.iter_mut().find(|r| id_of(r) == id) {
            Some(slot) => *slot = row,
            None => existing.push(row),
        }
    }
}

fn delete_rows<R>(existing: &mut Vec<R>, id_of: impl Fn(&R) -> u32, selected: Option<&[u32]>) {
    match selected {
        Some(selected) => existing.retain(|row| !selected.contains(&id_of(row))),
        None => existing.clear(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(id: u32, number: i64) -> LoadControlLimit {
        LoadControlLimit {
            limit_id: id,
            is_limit_changeable: Some(true),
            is_limit_active: Some(true),
            value: Some(ScaledNumber::new(number)),
        }
    }

    #[test]
    fn load_control_list_round_trip() {
        let data = FunctionData::LoadControlLimitListData(LoadControlLimitListData {
            limits: vec![limit(1, 4200), limit(2, 6300)],
        });
        let value = data.to_value();
        let round =
            FunctionData::from_typed_value(FunctionType::LoadControlLimitListData, &value).unwrap();
        assert_eq!(round, data);
    }

    #[test]
    fn partial_update_merges_by_id() {
        let mut stored = FunctionData::LoadControlLimitListData(LoadControlLimitListData {
            limits: vec![limit(1, 100), limit(2, 200)],
        });
        let incoming = FunctionData::LoadControlLimitListData(LoadControlLimitListData {
            limits: vec![limit(2, 999), limit(3, 300)],
        });

        stored.update_partial(&incoming, None).unwrap();
        match stored {
            FunctionData::LoadControlLimitListData(d) => {
                assert_eq!(d.limits.len(), 3);
                assert_eq!(d.limits[1].value.unwrap().number, 999);
                assert_eq!(d.limits[2].limit_id, 3);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn partial_update_honors_selectors() {
        let mut stored = FunctionData::LoadControlLimitListData(LoadControlLimitListData {
            limits: vec![limit(1, 100), limit(2, 200)],
        });
        let incoming = FunctionData::LoadControlLimitListData(LoadControlLimitListData {
            limits: vec![limit(1, 111), limit(2, 222)],
        });
        let filter = Filter {
            filter_id: None,
            selectors: Some((
                "loadControlLimitListDataSelectors".into(),
                json!([{ "limitId": 2 }]),
            )),
            elements: None,
        };

        stored.update_partial(&incoming, Some(&filter)).unwrap();
        match stored {
            FunctionData::LoadControlLimitListData(d) => {
                assert_eq!(d.limits[0].value.unwrap().number, 100);
                assert_eq!(d.limits[1].value.unwrap().number, 222);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn partial_delete_without_selectors_clears_the_list() {
        let mut stored = FunctionData::MeasurementListData(MeasurementListData {
            measurements: vec![Measurement {
                measurement_id: 1,
                ..Default::default()
            }],
        });
        stored.delete_partial(None).unwrap();
        match stored {
            FunctionData::MeasurementListData(d) => assert!(d.measurements.is_empty()),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn heartbeat_data_round_trip() {
        let data = FunctionData::DeviceDiagnosisHeartbeatData(DeviceDiagnosisHeartbeatData {
            timeout: Some(4000),
            heartbeat_counter: Some(3),
        });
        let round = FunctionData::from_typed_value(
            FunctionType::DeviceDiagnosisHeartbeatData,
            &data.to_value(),
        )
        .unwrap();
        assert_eq!(round, data);
    }

    #[test]
    fn unknown_function_key_is_rejected() {
        assert!(FunctionData::from_keyed_value("noSuchFunctionData", &json!([])).is_err());
    }
}
