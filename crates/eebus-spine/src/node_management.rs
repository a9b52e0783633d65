//! The node management feature: detailed discovery, subscription and
//! binding calls, use-case and destination lists.
//!
//! Node management is the `special` feature at (entity [0], feature 0).
//! Its handlers run on the device worker under the device lock, like any
//! other dispatch.

use tracing::{debug, info, warn};

use eebus_runtime::EebusError;
use eebus_wire::spine::node_management::{
    NodeManagementDestinationListData, NodeManagementDetailedDiscoveryData,
    NodeManagementSubscriptionData, NodeManagementUseCaseData, Role,
};
use eebus_wire::spine::{
    CmdClassifier, Command, FeatureAddress, FunctionData, FunctionType, Header, ResultData,
    result_error,
};
use eebus_wire::spine::node_management::NodeManagementBindingData;

use crate::device::state::{DeviceState, Effect};
use crate::events::{ElementChange, EventPayload, EventType};
use crate::feature::{DEFAULT_MAX_RESPONSE_DELAY, ResponseMessage, ResponseResult};
use crate::sender::Sender;

/// Snapshot of the local device, entities and features for discovery
/// replies and entity-change notifies.
pub(crate) fn build_detailed_discovery(state: &DeviceState) -> NodeManagementDetailedDiscoveryData {
    let mut data = NodeManagementDetailedDiscoveryData {
        device_information: Some(state.create_information()),
        ..Default::default()
    };

    for entity in &state.entities {
        data.entity_information.push(entity.create_information());
        for feature in entity.features() {
            data.feature_information.push(feature.create_information());
        }
    }

    data
}

/// Issue the initial `read(DetailedDiscoveryData)` towards a peer.
pub(crate) fn request_detailed_discovery(
    state: &mut DeviceState,
    ski: &str,
) -> Result<u64, EebusError> {
    let local = state.node_management_address();
    let remote = FeatureAddress::node_management(None);

    let sender = state
        .remote_by_ski(ski)
        .ok_or(EebusError::NoChange)?
        .sender()
        .clone();

    let cmd = Command::new(FunctionData::NodeManagementDetailedDiscoveryData(
        NodeManagementDetailedDiscoveryData::default(),
    ));
    let counter = sender.send_read(&local, &remote, cmd)?;
    state
        .pending
        .add(ski, counter, local, DEFAULT_MAX_RESPONSE_DELAY);
    Ok(counter)
}

/// Reads on node management functions.
pub(crate) fn process_read(
    state: &mut DeviceState,
    header: &Header,
    cmd: &Command,
    sender: &Sender,
) -> Result<bool, EebusError> {
    let local = state.node_management_address();

    let data = match cmd.function.function_type() {
        FunctionType::NodeManagementDetailedDiscoveryData => {
            FunctionData::NodeManagementDetailedDiscoveryData(build_detailed_discovery(state))
        }
        FunctionType::NodeManagementUseCaseData => {
            let mut data = NodeManagementUseCaseData::default();
            for entity in &state.entities {
                data.use_case_information
                    .extend(entity.use_case_information());
            }
            FunctionData::NodeManagementUseCaseData(data)
        }
        FunctionType::NodeManagementSubscriptionData => {
            FunctionData::NodeManagementSubscriptionData(NodeManagementSubscriptionData {
                subscription_entry: state.subscriptions.management_entries(),
            })
        }
        FunctionType::NodeManagementBindingData => {
            FunctionData::NodeManagementBindingData(NodeManagementBindingData {
                binding_entry: state.bindings.management_entries(),
            })
        }
        FunctionType::NodeManagementDestinationListData => {
            if state.info.feature_set == eebus_wire::spine::node_management::FeatureSet::Simple {
                return Err(EebusError::NotImplemented(
                    "destination list on a simple feature set".into(),
                ));
            }
            let mut data = NodeManagementDestinationListData {
                destination_data: vec![state.create_information().description],
            };
            for remote in state.remote_devices.values() {
                data.destination_data.push(remote.create_destination_data());
            }
            FunctionData::NodeManagementDestinationListData(data)
        }
        other => {
            return Err(EebusError::NotImplemented(format!(
                "read of {other:?} on node management"
            )));
        }
    };

    sender.send_reply(header, &local, Command::new(data))?;
    Ok(false)
}

/// Subscription and binding management calls.
pub(crate) fn process_call(
    state: &mut DeviceState,
    ski: &str,
    header: &Header,
    cmd: &Command,
    sender: &Sender,
) -> Result<bool, EebusError> {
    let local = state.node_management_address();
    let remote_device = state
        .remote_by_ski(ski)
        .and_then(|r| r.address())
        .map(str::to_owned);

    // Fill missing device fields: the client lives on the peer, the
    // server on this device.
    let qualify_client = |address: &FeatureAddress| {
        let mut address = address.clone();
        if address.device.is_none() {
            address.device = remote_device.clone();
        }
        address
    };
    let qualify_server =
        |state: &DeviceState, address: &FeatureAddress| state.local_address(address);

    let outcome: Result<(), String> = match &cmd.function {
        FunctionData::NodeManagementSubscriptionRequestCall(call) => {
            match &call.subscription_request {
                None => Err("missing subscription request".into()),
                Some(request) => {
                    let server = qualify_server(state, &request.server_address);
                    let client = qualify_client(&request.client_address);
                    let subscribable = state
                        .feature(&request.server_address)
                        .is_some_and(|f| f.role() != Role::Client);
                    if !subscribable {
                        Err("subscription request not supported".into())
                    } else {
                        match state.subscriptions.add(server, client) {
                            Ok(_) | Err(EebusError::NoChange) => Ok(()),
                            Err(err) => Err(err.to_string()),
                        }
                    }
                }
            }
        }
        FunctionData::NodeManagementSubscriptionDeleteCall(call) => {
            match &call.subscription_delete {
                None => Err("missing subscription delete".into()),
                Some(delete) => {
                    let client = delete
                        .client_address
                        .as_ref()
                        .map(|a| qualify_client(a))
                        .unwrap_or_else(|| qualify_client(&header.source));
                    let server = delete
                        .server_address
                        .as_ref()
                        .map(|a| qualify_server(state, a))
                        .unwrap_or_else(|| qualify_server(state, &header.destination));
                    state
                        .subscriptions
                        .remove(&server, &client)
                        .map_err(|_| "subscription not found".to_owned())
                }
            }
        }
        FunctionData::NodeManagementBindingRequestCall(call) => match &call.binding_request {
            None => Err("missing binding request".into()),
            Some(request) => {
                let server = qualify_server(state, &request.server_address);
                let client = qualify_client(&request.client_address);
                let bindable = state
                    .feature(&request.server_address)
                    .is_some_and(|f| f.role() == Role::Server);
                if !bindable {
                    Err("binding request not supported".into())
                } else {
                    match state.bindings.add(server, client) {
                        Ok(_) | Err(EebusError::NoChange) => Ok(()),
                        Err(err) => Err(err.to_string()),
                    }
                }
            }
        },
        FunctionData::NodeManagementBindingDeleteCall(call) => match &call.binding_delete {
            None => Err("missing binding delete".into()),
            Some(delete) => {
                let client = delete
                    .client_address
                    .as_ref()
                    .map(|a| qualify_client(a))
                    .unwrap_or_else(|| qualify_client(&header.source));
                let server = delete
                    .server_address
                    .as_ref()
                    .map(|a| qualify_server(state, a))
                    .unwrap_or_else(|| qualify_server(state, &header.destination));
                state
                    .bindings
                    .remove(&server, &client)
                    .map_err(|_| "binding not found".to_owned())
            }
        },
        other => {
            return Err(EebusError::NotImplemented(format!(
                "call of {:?} on node management",
                other.function_type()
            )));
        }
    };

    match outcome {
        Ok(()) => {
            debug!(ski = %ski, function = ?cmd.function.function_type(), "management call accepted");
            sender.send_result_success(header, &local)?;
        }
        Err(description) => {
            warn!(ski = %ski, reason = %description, "management call rejected");
            sender.send_result_error(
                header,
                &local,
                ResultData::error(result_error::GENERAL_ERROR, Some(&description)),
            )?;
        }
    }
    Ok(true)
}

/// Install a peer's discovery data and, on a reply, run the client-side
/// bootstrap: subscribe to the peer's node management and read its use
/// cases.
pub(crate) fn process_discovery_update(
    state: &mut DeviceState,
    ski: &str,
    header: &Header,
    cmd: &Command,
) -> Result<bool, EebusError> {
    let FunctionData::NodeManagementDetailedDiscoveryData(data) = &cmd.function else {
        return Err(EebusError::InputArgument("expected discovery data".into()));
    };
    let device_information = data
        .device_information
        .as_ref()
        .ok_or_else(|| EebusError::InputArgument("discovery without device information".into()))?;

    let (installed, remote_address, sender) = {
        let remote = state
            .remote_devices
            .get_mut(ski)
            .ok_or_else(|| EebusError::InputArgumentOutOfRange("unknown peer".into()))?;
        remote.update_device(&device_information.description);
        let installed = remote.install_discovery(data);
        (
            installed,
            remote.address().map(str::to_owned),
            remote.sender().clone(),
        )
    };

    info!(
        ski = %ski,
        device = remote_address.as_deref().unwrap_or("<unknown>"),
        entities = installed.len(),
        "remote device discovered"
    );

    let mut payload = EventPayload::new(ski, EventType::DeviceChange, ElementChange::Add);
    payload.device_address = remote_address.clone();
    payload.function = Some(FunctionType::NodeManagementDetailedDiscoveryData);
    state.push_effect(Effect::Event(payload));

    for entity in &installed {
        let mut payload = EventPayload::new(ski, EventType::EntityChange, ElementChange::Add);
        payload.device_address = remote_address.clone();
        payload.entity_address = Some(entity.clone());
        payload.function = Some(FunctionType::NodeManagementDetailedDiscoveryData);
        state.push_effect(Effect::Event(payload));
    }

    if header.cmd_classifier != CmdClassifier::Reply {
        return Ok(false);
    }

    // Correlate with the outstanding discovery read.
    if let Some(reference) = header.msg_counter_reference {
        state.pending.resolve(ski, reference);
        let callbacks = state
            .feature_mut(&header.destination)
            .map(|f| f.take_response_callbacks(reference))
            .unwrap_or_default();
        if !callbacks.is_empty() {
            state.push_effect(Effect::Response {
                callbacks,
                message: ResponseMessage {
                    msg_counter_reference: reference,
                    ski: ski.to_owned(),
                    remote_feature: Some(header.source.clone()),
                    result: ResponseResult::Data {
                        function_type: FunctionType::NodeManagementDetailedDiscoveryData,
                        data: cmd.function.clone(),
                    },
                },
            });
        }
    }

    // Bootstrap: subscribe to the peer's node management, then learn its
    // use cases.
    let local = state.node_management_address();
    let mut remote_nm = FeatureAddress::node_management(remote_address);
    if remote_nm.device.is_none() {
        remote_nm.device = header.source.device.clone();
    }

    let already_subscribed = state
        .feature(&local)
        .is_some_and(|f| f.has_subscription_to_remote(&remote_nm));
    if !already_subscribed {
        sender.send_call_subscribe(
            &local,
            &remote_nm,
            Some(crate::feature::feature_type::NODE_MANAGEMENT.to_owned()),
        )?;
        if let Some(feature) = state.feature_mut(&local) {
            feature.record_remote_subscription(remote_nm.clone());
        }

        let use_case_read = Command::new(FunctionData::NodeManagementUseCaseData(
            NodeManagementUseCaseData::default(),
        ));
        let counter = sender.send_read(&local, &remote_nm, use_case_read)?;
        state
            .pending
            .add(ski, counter, local, DEFAULT_MAX_RESPONSE_DELAY);
    }

    Ok(false)
}
