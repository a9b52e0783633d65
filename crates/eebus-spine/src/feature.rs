//! Local and remote features.
//!
//! A local feature owns typed function slots, the client-side records of
//! its subscriptions/bindings to remotes, and the callback tables used to
//! correlate responses. A remote feature mirrors what the peer advertised
//! and caches the peer's function data.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use eebus_runtime::EebusError;
use eebus_wire::spine::node_management::{
    FeatureDescription, FeatureInformation, FunctionProperty, PossibleOperations, Role,
};
use eebus_wire::spine::{Command, FeatureAddress, Filter, FunctionData, FunctionType, Header};

use crate::function::Function;

/// Default upper bound on how long a peer may take to answer a request.
pub const DEFAULT_MAX_RESPONSE_DELAY: Duration = Duration::from_millis(10_000);

/// Well-known feature type names.
pub mod feature_type {
    pub const NODE_MANAGEMENT: &str = "NodeManagement";
    pub const DEVICE_CLASSIFICATION: &str = "DeviceClassification";
    pub const DEVICE_DIAGNOSIS: &str = "DeviceDiagnosis";
    pub const LOAD_CONTROL: &str = "LoadControl";
    pub const MEASUREMENT: &str = "Measurement";
    pub const ELECTRICAL_CONNECTION: &str = "ElectricalConnection";
    pub const DEVICE_CONFIGURATION: &str = "DeviceConfiguration";
}

/// A response correlated to an earlier outgoing request.
#[derive(Debug, Clone)]
pub struct ResponseMessage {
    pub msg_counter_reference: u64,
    pub ski: String,
    pub remote_feature: Option<FeatureAddress>,
    pub result: ResponseResult,
}

#[derive(Debug, Clone)]
pub enum ResponseResult {
    Data {
        function_type: FunctionType,
        data: FunctionData,
    },
    /// The peer did not answer within its max response delay.
    Timeout,
}

pub type ResponseCallback = Arc<dyn Fn(&ResponseMessage) + Send + Sync>;

/// A write held for application approval.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub header: Header,
    pub cmd: Command,
    pub remote_feature: FeatureAddress,
    pub ski: String,
}

pub type WriteApprovalCallback = Arc<dyn Fn(&WriteRequest) + Send + Sync>;

// ---------------------------------------------------------------------------
// FeatureLocal
// ---------------------------------------------------------------------------

pub struct FeatureLocal {
    address: FeatureAddress,
    feature_type: String,
    role: Role,
    description: Option<String>,
    functions: BTreeMap<FunctionType, Function>,
    /// Remote server features this local client subscribed to.
    remote_subscriptions: Vec<FeatureAddress>,
    /// Remote server features this local client bound to.
    remote_bindings: Vec<FeatureAddress>,
    response_callbacks: HashMap<u64, Vec<ResponseCallback>>,
    result_callbacks: Vec<ResponseCallback>,
    write_approval_callbacks: Vec<WriteApprovalCallback>,
}

impl FeatureLocal {
    pub fn new(address: FeatureAddress, feature_type: impl Into<String>, role: Role) -> Self {
        FeatureLocal {
            address,
            feature_type: feature_type.into(),
            role,
            description: None,
            functions: BTreeMap::new(),
            remote_subscriptions: Vec::new(),
            remote_bindings: Vec::new(),
            response_callbacks: HashMap::new(),
            result_callbacks: Vec::new(),
            write_approval_callbacks: Vec::new(),
        }
    }

    pub fn address(&self) -> &FeatureAddress {
        &self.address
    }

    pub fn id(&self) -> u32 {
        self.address.feature
    }

    pub fn feature_type(&self) -> &str {
        &self.feature_type
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = Some(description.into());
    }

    pub fn add_function(&mut self, function_type: FunctionType) -> &mut Function {
        self.functions
            .entry(function_type)
            .or_insert_with(|| Function::new(function_type))
    }

    pub fn function(&self, function_type: FunctionType) -> Option<&Function> {
        self.functions.get(&function_type)
    }

    pub fn function_mut(&mut self, function_type: FunctionType) -> Option<&mut Function> {
        self.functions.get_mut(&function_type)
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.values()
    }

    /// Advertise operations for one function.
    ///
    /// Only server and special roles expose operations; partial reads are
    /// not supported, partial writes are.
    pub fn set_function_operations(&mut self, function_type: FunctionType, read: bool, write: bool) {
        if !matches!(self.role, Role::Server | Role::Special) {
            return;
        }
        let function = self.add_function(function_type);
        function.set_operations(PossibleOperations {
            read,
            read_partial: false,
            write,
            write_partial: write,
        });
    }

    pub fn data_copy(&self, function_type: FunctionType) -> Option<FunctionData> {
        self.functions
            .get(&function_type)
            .and_then(Function::data_copy)
    }

    // --- client-side subscription / binding records ------------------------

    pub fn has_subscription_to_remote(&self, remote: &FeatureAddress) -> bool {
        self.remote_subscriptions.contains(remote)
    }

    pub fn record_remote_subscription(&mut self, remote: FeatureAddress) {
        if !self.remote_subscriptions.contains(&remote) {
            self.remote_subscriptions.push(remote);
        }
    }

    pub fn drop_remote_subscription(&mut self, remote: &FeatureAddress) {
        self.remote_subscriptions.retain(|a| a != remote);
    }

    pub fn has_binding_to_remote(&self, remote: &FeatureAddress) -> bool {
        self.remote_bindings.contains(remote)
    }

    pub fn record_remote_binding(&mut self, remote: FeatureAddress) {
        if !self.remote_bindings.contains(&remote) {
            self.remote_bindings.push(remote);
        }
    }

    pub fn drop_remote_binding(&mut self, remote: &FeatureAddress) {
        self.remote_bindings.retain(|a| a != remote);
    }

    /// Drop every client-side record pointing at the given remote device.
    pub fn clean_remote_device_caches(&mut self, remote_device: &str) {
        self.remote_subscriptions
            .retain(|a| a.device.as_deref() != Some(remote_device));
        self.remote_bindings
            .retain(|a| a.device.as_deref() != Some(remote_device));
    }

    // --- callbacks ---------------------------------------------------------

    pub fn add_response_callback(&mut self, msg_counter: u64, callback: ResponseCallback) {
        self.response_callbacks
            .entry(msg_counter)
            .or_default()
            .push(callback);
    }

    /// Remove and return the callbacks registered for a counter.
    pub fn take_response_callbacks(&mut self, msg_counter: u64) -> Vec<ResponseCallback> {
        self.response_callbacks
            .remove(&msg_counter)
            .unwrap_or_default()
    }

    pub fn add_result_callback(&mut self, callback: ResponseCallback) {
        self.result_callbacks.push(callback);
    }

    pub fn result_callbacks(&self) -> Vec<ResponseCallback> {
        self.result_callbacks.clone()
    }

    pub fn add_write_approval_callback(&mut self, callback: WriteApprovalCallback) -> Result<(), EebusError> {
        if self.role != Role::Server {
            return Err(EebusError::NoChange);
        }
        self.write_approval_callbacks.push(callback);
        Ok(())
    }

    pub fn write_approval_callbacks(&self) -> Vec<WriteApprovalCallback> {
        self.write_approval_callbacks.clone()
    }

    pub fn has_write_approval_callbacks(&self) -> bool {
        !self.write_approval_callbacks.is_empty()
    }

    /// The discovery row advertised for this feature.
    pub fn create_information(&self) -> FeatureInformation {
        let supported_function = self
            .functions
            .values()
            .filter_map(|function| {
                function.operations().map(|ops| FunctionProperty {
                    function: function.function_type(),
                    possible_operations: *ops,
                })
            })
            .collect();

        FeatureInformation {
            description: FeatureDescription {
                feature_address: self.address.clone(),
                feature_type: Some(self.feature_type.clone()),
                role: Some(self.role),
                supported_function,
                description: self.description.clone(),
                max_response_delay: None,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// FeatureRemote
// ---------------------------------------------------------------------------

pub struct FeatureRemote {
    address: FeatureAddress,
    feature_type: Option<String>,
    role: Option<Role>,
    functions: BTreeMap<FunctionType, Function>,
    max_response_delay: Duration,
}

impl FeatureRemote {
    pub fn new(address: FeatureAddress, feature_type: Option<String>, role: Option<Role>) -> Self {
        FeatureRemote {
            address,
            feature_type,
            role,
            functions: BTreeMap::new(),
            max_response_delay: DEFAULT_MAX_RESPONSE_DELAY,
        }
    }

    pub fn address(&self) -> &FeatureAddress {
        &self.address
    }

    pub fn feature_type(&self) -> Option<&str> {
        self.feature_type.as_deref()
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn max_response_delay(&self) -> Duration {
        self.max_response_delay
    }

    pub fn set_max_response_delay(&mut self, delay: Duration) {
        self.max_response_delay = delay;
    }

    /// Install what the peer advertised for this feature.
    pub fn apply_description(&mut self, description: &FeatureDescription) {
        if description.feature_type.is_some() {
            self.feature_type = description.feature_type.clone();
        }
        if description.role.is_some() {
            self.role = description.role;
        }
        if let Some(delay) = description.max_response_delay {
            self.max_response_delay = Duration::from_millis(delay);
        }
        for property in &description.supported_function {
            self.functions
                .entry(property.function)
                .or_insert_with(|| Function::new(property.function))
                .set_operations(property.possible_operations);
        }
    }

    pub fn operations(&self, function_type: FunctionType) -> Option<&PossibleOperations> {
        self.functions
            .get(&function_type)
            .and_then(Function::operations)
    }

    /// Update the cached copy of the peer's data.
    pub fn update_data(
        &mut self,
        data: &FunctionData,
        filter_partial: Option<&Filter>,
        filter_delete: Option<&Filter>,
    ) -> Result<(), EebusError> {
        let function_type = data.function_type();
        let function = self
            .functions
            .entry(function_type)
            .or_insert_with(|| Function::new(function_type));
        let partial = filter_partial.is_some() || filter_delete.is_some();
        function.update_data(data, filter_partial, filter_delete, partial)
    }

    pub fn data_copy(&self, function_type: FunctionType) -> Option<FunctionData> {
        self.functions
            .get(&function_type)
            .and_then(Function::data_copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eebus_wire::spine::{LoadControlLimit, LoadControlLimitListData, ScaledNumber};

    fn local_feature(role: Role) -> FeatureLocal {
        FeatureLocal::new(
            FeatureAddress::new(Some("d:local".into()), vec![1], 1),
            feature_type::LOAD_CONTROL,
            role,
        )
    }

    #[test]
    fn client_features_do_not_advertise_operations() {
        let mut feature = local_feature(Role::Client);
        feature.set_function_operations(FunctionType::LoadControlLimitListData, true, true);
        assert!(feature.create_information().description.supported_function.is_empty());
    }

    #[test]
    fn server_operations_show_up_in_information() {
        let mut feature = local_feature(Role::Server);
        feature.set_function_operations(FunctionType::LoadControlLimitListData, true, true);

        let info = feature.create_information();
        assert_eq!(info.description.supported_function.len(), 1);
        let ops = info.description.supported_function[0].possible_operations;
        assert!(ops.read && ops.write && ops.write_partial && !ops.read_partial);
    }

    #[test]
    fn response_callbacks_fire_once() {
        let mut feature = local_feature(Role::Client);
        feature.add_response_callback(7, Arc::new(|_| {}));
        assert_eq!(feature.take_response_callbacks(7).len(), 1);
        assert!(feature.take_response_callbacks(7).is_empty());
    }

    #[test]
    fn remote_cache_applies_partial_updates() {
        let mut remote = FeatureRemote::new(
            FeatureAddress::new(Some("d:remote".into()), vec![1], 1),
            Some(feature_type::LOAD_CONTROL.to_owned()),
            Some(Role::Server),
        );

        let first = FunctionData::LoadControlLimitListData(LoadControlLimitListData {
            limits: vec![LoadControlLimit {
                limit_id: 1,
                value: Some(ScaledNumber::new(10)),
                ..Default::default()
            }],
        });
        remote.update_data(&first, None, None).unwrap();

        let second = FunctionData::LoadControlLimitListData(LoadControlLimitListData {
            limits: vec![LoadControlLimit {
                limit_id: 2,
                value: Some(ScaledNumber::new(20)),
                ..Default::default()
            }],
        });
        remote
            .update_data(&second, Some(&Filter::empty()), None)
            .unwrap();

        match remote
            .data_copy(FunctionType::LoadControlLimitListData)
            .unwrap()
        {
            FunctionData::LoadControlLimitListData(d) => assert_eq!(d.limits.len(), 2),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn write_approval_requires_server_role() {
        let mut client = local_feature(Role::Client);
        assert_eq!(
            client.add_write_approval_callback(Arc::new(|_| {})).unwrap_err(),
            EebusError::NoChange
        );

        let mut server = local_feature(Role::Server);
        assert!(server.add_write_approval_callback(Arc::new(|_| {})).is_ok());
        assert!(server.has_write_approval_callbacks());
    }
}
