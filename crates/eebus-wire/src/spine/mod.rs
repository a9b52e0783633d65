//! SPINE data model: addresses, datagram framing, typed function payloads.

pub mod address;
pub mod datagram;
pub mod function;
pub mod node_management;

pub use address::{DeviceAddress, EntityAddress, FeatureAddress};
pub use datagram::{
    CmdClassifier, Command, Datagram, Filter, Header, SPECIFICATION_VERSION,
};
pub use function::{
    DeviceClassificationManufacturerData, DeviceConfigurationKeyValue,
    DeviceConfigurationKeyValueDescription, DeviceConfigurationKeyValueDescriptionListData,
    DeviceConfigurationKeyValueListData, DeviceDiagnosisHeartbeatData, FunctionData, FunctionType,
    KeyValue, LoadControlLimit, LoadControlLimitDescription,
    LoadControlLimitDescriptionListData, LoadControlLimitListData, Measurement,
    MeasurementDescription, MeasurementDescriptionListData, MeasurementListData, ResultData,
    ScaledNumber, result_error,
};
pub use node_management::{
    BindingManagementDelete, BindingManagementEntry, BindingManagementRequest, DeviceDescription,
    DeviceInformation, EntityDescription, EntityInformation, FeatureDescription,
    FeatureInformation, FeatureSet, FunctionProperty, NodeManagementBindingData,
    NodeManagementBindingDeleteCall, NodeManagementBindingRequestCall,
    NodeManagementDestinationListData, NodeManagementDetailedDiscoveryData,
    NodeManagementSubscriptionData, NodeManagementSubscriptionDeleteCall,
    NodeManagementSubscriptionRequestCall, NodeManagementUseCaseData, PossibleOperations, Role,
    SubscriptionManagementDelete, SubscriptionManagementEntry, SubscriptionManagementRequest,
    UseCaseInformation, UseCaseSupport,
};
