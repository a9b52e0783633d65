//! Device state and the datagram router.
//!
//! Everything in here runs under the device mutex. Side effects that must
//! not run under the lock (event publication, user callbacks) are
//! collected as [`Effect`]s and executed by the caller after unlocking.
//! Sending never blocks: senders push pre-serialized frames into the
//! connection's write queue.

use std::collections::HashMap;

use tokio::time::Instant;
use tracing::{debug, warn};

use eebus_runtime::EebusError;
use eebus_wire::spine::address::{DEVICE_INFORMATION_ENTITY_ID, NODE_MANAGEMENT_FEATURE_ID};
use eebus_wire::spine::node_management::{DeviceDescription, DeviceInformation, Role};
use eebus_wire::spine::{
    CmdClassifier, Command, Datagram, DeviceAddress, FeatureAddress, FunctionData, FunctionType,
    Header, ResultData, result_error,
};

use crate::binding::BindingManager;
use crate::entity::EntityLocal;
use crate::events::{DeviceEventHub, ElementChange, EventPayload, EventType};
use crate::feature::{
    FeatureLocal, ResponseCallback, ResponseMessage, ResponseResult, WriteApprovalCallback,
    WriteRequest,
};
use crate::pending::PendingRequests;
use crate::sender::Sender;
use crate::subscription::SubscriptionManager;

use super::local::DeviceInfo;
use super::remote::DeviceRemote;

/// Deferred side effects, executed after the device lock is released.
pub(crate) enum Effect {
    Event(EventPayload),
    Response {
        callbacks: Vec<ResponseCallback>,
        message: ResponseMessage,
    },
    WriteApproval {
        callbacks: Vec<WriteApprovalCallback>,
        request: WriteRequest,
    },
}

pub(crate) struct DeviceState {
    pub(crate) info: DeviceInfo,
    pub(crate) entities: Vec<EntityLocal>,
    pub(crate) next_entity_id: u32,
    pub(crate) subscriptions: SubscriptionManager,
    pub(crate) bindings: BindingManager,
    pub(crate) remote_devices: HashMap<String, DeviceRemote>,
    pub(crate) pending: PendingRequests,
    pub(crate) stopped: bool,
    effects: Vec<Effect>,
}

impl DeviceState {
    pub(crate) fn new(info: DeviceInfo) -> Self {
        DeviceState {
            info,
            entities: Vec::new(),
            next_entity_id: 1,
            subscriptions: SubscriptionManager::new(),
            bindings: BindingManager::new(),
            remote_devices: HashMap::new(),
            pending: PendingRequests::new(),
            stopped: false,
            effects: Vec::new(),
        }
    }

    pub(crate) fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub(crate) fn push_effect(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    // -----------------------------------------------------------------------
    // Lookup helpers
    // -----------------------------------------------------------------------

    pub(crate) fn entity(&self, entity_path: &[u32]) -> Option<&EntityLocal> {
        self.entities
            .iter()
            .find(|e| e.address().entity == entity_path)
    }

    pub(crate) fn entity_mut(&mut self, entity_path: &[u32]) -> Option<&mut EntityLocal> {
        self.entities
            .iter_mut()
            .find(|e| e.address().entity == entity_path)
    }

    pub(crate) fn feature(&self, address: &FeatureAddress) -> Option<&FeatureLocal> {
        self.entity(&address.entity)?.feature_with_id(address.feature)
    }

    pub(crate) fn feature_mut(&mut self, address: &FeatureAddress) -> Option<&mut FeatureLocal> {
        self.entity_mut(&address.entity)?
            .feature_with_id_mut(address.feature)
    }

    /// The canonical (device-qualified) form of a local feature address.
    pub(crate) fn local_address(&self, address: &FeatureAddress) -> FeatureAddress {
        FeatureAddress::new(
            Some(self.info.address.clone()),
            address.entity.clone(),
            address.feature,
        )
    }

    pub(crate) fn node_management_address(&self) -> FeatureAddress {
        FeatureAddress::node_management(Some(self.info.address.clone()))
    }

    pub(crate) fn remote_by_ski(&self, ski: &str) -> Option<&DeviceRemote> {
        self.remote_devices.get(ski)
    }

    pub(crate) fn remote_by_address(&self, device: &str) -> Option<&DeviceRemote> {
        self.remote_devices
            .values()
            .find(|r| r.address() == Some(device))
    }

    fn is_node_management(address: &FeatureAddress) -> bool {
        address.entity == [DEVICE_INFORMATION_ENTITY_ID]
            && address.feature == NODE_MANAGEMENT_FEATURE_ID
    }

    /// The discovery row describing this device.
    pub(crate) fn create_information(&self) -> DeviceInformation {
        DeviceInformation {
            description: DeviceDescription {
                device_address: Some(DeviceAddress::new(self.info.address.clone())),
                device_type: Some(self.info.device_type.clone()),
                network_feature_set: Some(self.info.feature_set),
            },
        }
    }

    // -----------------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------------

    pub(crate) fn handle_payload(&mut self, ski: &str, payload: &serde_json::Value) {
        let datagram = match Datagram::from_value(payload) {
            Ok(datagram) => datagram,
            Err(err) => {
                warn!(ski = %ski, error = %err, "dropping undecodable datagram");
                return;
            }
        };
        self.process_datagram(ski, &datagram);
    }

    pub(crate) fn process_datagram(&mut self, ski: &str, datagram: &Datagram) {
        if self.stopped {
            return;
        }

        let header = &datagram.header;

        let Some(remote) = self.remote_devices.get_mut(ski) else {
            warn!(ski = %ski, "datagram from unknown peer");
            return;
        };
        let sender = remote.sender().clone();

        // Implicitly mirror the source feature.
        remote.ensure_feature(&header.source);

        // Unknown destination: silently drop, no reply.
        if self.feature(&header.destination).is_none() {
            debug!(
                ski = %ski,
                destination = %header.destination,
                "dropping datagram for unknown local feature"
            );
            return;
        }
        let local_address = self.local_address(&header.destination);

        let mut acked = false;
        let mut error = None;
        for cmd in &datagram.cmds {
            match self.dispatch_command(ski, header, cmd, &sender) {
                Ok(did_ack) => acked |= did_ack,
                Err(err) => {
                    error = Some(err);
                    break;
                }
            }
        }

        match error {
            None => {
                // Success ack per SPINE 5.2.4.
                let ack_classifier = matches!(
                    header.cmd_classifier,
                    CmdClassifier::Call | CmdClassifier::Reply | CmdClassifier::Notify
                );
                if header.wants_ack() && ack_classifier && !acked {
                    let _ = sender.send_result_success(header, &local_address);
                }
            }
            Some(err) => {
                warn!(
                    ski = %ski,
                    classifier = header.cmd_classifier.as_str(),
                    error = %err,
                    "command dispatch failed"
                );
                if header.wants_ack() && !acked {
                    let _ = sender.send_result_error(
                        header,
                        &local_address,
                        ResultData::error(result_error::GENERAL_ERROR, None),
                    );
                }
            }
        }
    }

    fn dispatch_command(
        &mut self,
        ski: &str,
        header: &Header,
        cmd: &Command,
        sender: &Sender,
    ) -> Result<bool, EebusError> {
        let node_management = Self::is_node_management(&header.destination);

        match header.cmd_classifier {
            CmdClassifier::Read => {
                if node_management {
                    crate::node_management::process_read(self, header, cmd, sender)
                } else {
                    self.process_read(header, cmd, sender)
                }
            }
            CmdClassifier::Reply | CmdClassifier::Notify => {
                if node_management
                    && cmd.function.function_type()
                        == FunctionType::NodeManagementDetailedDiscoveryData
                {
                    crate::node_management::process_discovery_update(self, ski, header, cmd)
                } else {
                    self.process_data_update(ski, header, cmd)
                }
            }
            CmdClassifier::Write => self.process_write(ski, header, cmd, sender),
            CmdClassifier::Call => {
                if node_management {
                    crate::node_management::process_call(self, ski, header, cmd, sender)
                } else {
                    Err(EebusError::NotImplemented(
                        "call on a non-management feature".into(),
                    ))
                }
            }
            CmdClassifier::Result => self.process_result(ski, header, cmd),
        }
    }

    /// Read request to a local server/special feature: reply from stored
    /// data.
    fn process_read(
        &mut self,
        header: &Header,
        cmd: &Command,
        sender: &Sender,
    ) -> Result<bool, EebusError> {
        let local_address = self.local_address(&header.destination);
        let feature = self
            .feature(&header.destination)
            .ok_or_else(|| EebusError::InputArgumentOutOfRange("unknown feature".into()))?;

        if feature.role() == Role::Client {
            // Read requests to a client feature are not allowed.
            return Err(EebusError::NoChange);
        }

        let function = feature
            .function(cmd.function.function_type())
            .ok_or(EebusError::NoChange)?;

        let reply = function.reply_cmd();
        sender.send_reply(header, &local_address, reply)?;
        Ok(false)
    }

    /// Reply and notify share the cache-update path; a reply additionally
    /// resolves pending-request callbacks.
    fn process_data_update(
        &mut self,
        ski: &str,
        header: &Header,
        cmd: &Command,
    ) -> Result<bool, EebusError> {
        let remote = self
            .remote_devices
            .get_mut(ski)
            .ok_or_else(|| EebusError::InputArgumentOutOfRange("unknown peer".into()))?;
        let remote_device_address = remote.address().map(str::to_owned);

        let feature = remote.ensure_feature(&header.source);
        feature.update_data(
            &cmd.function,
            cmd.filter_partial.as_ref(),
            cmd.filter_delete.as_ref(),
        )?;

        let mut remote_feature_address = header.source.clone();
        if remote_feature_address.device.is_none() {
            remote_feature_address.device = remote_device_address.clone();
        }

        let local_address = self.local_address(&header.destination);
        let function_type = cmd.function.function_type();

        let mut payload = EventPayload::new(ski, EventType::DataChange, ElementChange::Update);
        payload.device_address = remote_device_address;
        payload.entity_address = Some(remote_feature_address.entity_address());
        payload.feature_address = Some(remote_feature_address.clone());
        payload.local_feature = Some(local_address.clone());
        payload.function = Some(function_type);
        payload.classifier = Some(header.cmd_classifier);
        self.push_effect(Effect::Event(payload));

        if header.cmd_classifier == CmdClassifier::Reply {
            if let Some(reference) = header.msg_counter_reference {
                self.pending.resolve(ski, reference);
                let callbacks = self
                    .feature_mut(&header.destination)
                    .map(|f| f.take_response_callbacks(reference))
                    .unwrap_or_default();
                if !callbacks.is_empty() {
                    self.push_effect(Effect::Response {
                        callbacks,
                        message: ResponseMessage {
                            msg_counter_reference: reference,
                            ski: ski.to_owned(),
                            remote_feature: Some(remote_feature_address),
                            result: ResponseResult::Data {
                                function_type,
                                data: cmd.function.clone(),
                            },
                        },
                    });
                }
            }
        }

        Ok(false)
    }

    /// Write to a local server feature, gated by a binding.
    fn process_write(
        &mut self,
        ski: &str,
        header: &Header,
        cmd: &Command,
        sender: &Sender,
    ) -> Result<bool, EebusError> {
        let local_address = self.local_address(&header.destination);

        let remote_address = {
            let remote = self
                .remote_devices
                .get(ski)
                .ok_or_else(|| EebusError::InputArgumentOutOfRange("unknown peer".into()))?;
            let mut address = header.source.clone();
            if address.device.is_none() {
                address.device = remote.address().map(str::to_owned);
            }
            address
        };

        {
            let feature = self
                .feature(&header.destination)
                .ok_or_else(|| EebusError::InputArgumentOutOfRange("unknown feature".into()))?;
            if feature.role() != Role::Server {
                return Err(EebusError::NoChange);
            }
        }

        if !self.bindings.has_binding(&local_address, &remote_address) {
            return Err(EebusError::NoChange);
        }

        let feature = self
            .feature(&header.destination)
            .expect("feature just checked");
        if feature.has_write_approval_callbacks() {
            let callbacks = feature.write_approval_callbacks();
            self.push_effect(Effect::WriteApproval {
                callbacks,
                request: WriteRequest {
                    header: header.clone(),
                    cmd: cmd.clone(),
                    remote_feature: remote_address,
                    ski: ski.to_owned(),
                },
            });
            // The approval flow answers the peer.
            return Ok(true);
        }

        self.apply_write(ski, header, cmd, sender)?;
        Ok(true)
    }

    /// Perform an approved (or unguarded) write and answer the peer.
    pub(crate) fn apply_write(
        &mut self,
        ski: &str,
        header: &Header,
        cmd: &Command,
        sender: &Sender,
    ) -> Result<(), EebusError> {
        let local_address = self.local_address(&header.destination);

        let result = self.apply_write_data(header, cmd);
        match &result {
            Ok(()) => {
                if header.wants_ack() {
                    let _ = sender.send_result_success(header, &local_address);
                }
            }
            Err(_) => {
                let _ = sender.send_result_error(
                    header,
                    &local_address,
                    ResultData::error(result_error::GENERAL_ERROR, None),
                );
            }
        }
        let applied = result.is_ok();

        if applied {
            // Subscribers see the full updated list.
            let notify_cmd = self
                .feature(&header.destination)
                .and_then(|f| f.function(cmd.function.function_type()))
                .map(|function| function.write_cmd(None, None));
            if let Some(notify_cmd) = notify_cmd {
                self.notify_subscribers(&local_address, notify_cmd);
            }

            let mut payload = EventPayload::new(ski, EventType::DataChange, ElementChange::Update);
            payload.feature_address = Some(header.source.clone());
            payload.local_feature = Some(local_address);
            payload.function = Some(cmd.function.function_type());
            payload.classifier = Some(CmdClassifier::Write);
            self.push_effect(Effect::Event(payload));
        }

        result
    }

    fn apply_write_data(&mut self, header: &Header, cmd: &Command) -> Result<(), EebusError> {
        let feature = self
            .feature_mut(&header.destination)
            .ok_or_else(|| EebusError::InputArgumentOutOfRange("unknown feature".into()))?;
        let function = feature
            .function_mut(cmd.function.function_type())
            .ok_or(EebusError::NoChange)?;
        function.update_data(
            &cmd.function,
            cmd.filter_partial.as_ref(),
            cmd.filter_delete.as_ref(),
            true,
        )
    }

    /// Incoming result: correlate to the original request.
    fn process_result(
        &mut self,
        ski: &str,
        header: &Header,
        cmd: &Command,
    ) -> Result<bool, EebusError> {
        let FunctionData::ResultData(result) = &cmd.function else {
            return Err(EebusError::InputArgument(
                "result frame without resultData".into(),
            ));
        };

        if !result.is_success() {
            warn!(
                ski = %ski,
                error_number = result.error_number,
                description = result.description.as_deref().unwrap_or(""),
                "peer reported an error result"
            );
        }

        let Some(reference) = header.msg_counter_reference else {
            return Ok(false);
        };

        self.pending.resolve(ski, reference);

        let (mut callbacks, remote_feature) = {
            let feature = self.feature_mut(&header.destination);
            match feature {
                Some(feature) => (
                    feature.take_response_callbacks(reference),
                    Some(header.source.clone()),
                ),
                None => (Vec::new(), None),
            }
        };
        if let Some(feature) = self.feature(&header.destination) {
            callbacks.extend(feature.result_callbacks());
        }

        if !callbacks.is_empty() {
            self.push_effect(Effect::Response {
                callbacks,
                message: ResponseMessage {
                    msg_counter_reference: reference,
                    ski: ski.to_owned(),
                    remote_feature,
                    result: ResponseResult::Data {
                        function_type: FunctionType::ResultData,
                        data: cmd.function.clone(),
                    },
                },
            });
        }

        Ok(false)
    }

    // -----------------------------------------------------------------------
    // Fan-out and periodic work
    // -----------------------------------------------------------------------

    /// One notify per subscriber of the given local feature.
    pub(crate) fn notify_subscribers(&mut self, local_address: &FeatureAddress, cmd: Command) {
        if self.stopped {
            return;
        }

        for client in self.subscriptions.subscribers_of(local_address) {
            let Some(device) = client.device.as_deref() else {
                continue;
            };
            let Some(remote) = self.remote_by_address(device) else {
                continue;
            };
            let _ = remote
                .sender()
                .send_notify(local_address, &client, cmd.clone());
        }
    }

    /// The 1 s tick: pending-request expiry and heartbeats.
    pub(crate) fn tick(&mut self, now: Instant) {
        if self.stopped {
            return;
        }

        for entry in self.pending.expire(now) {
            let callbacks = self
                .feature_mut(&entry.local_feature)
                .map(|f| f.take_response_callbacks(entry.counter))
                .unwrap_or_default();
            if !callbacks.is_empty() {
                self.push_effect(Effect::Response {
                    callbacks,
                    message: ResponseMessage {
                        msg_counter_reference: entry.counter,
                        ski: entry.ski.clone(),
                        remote_feature: None,
                        result: ResponseResult::Timeout,
                    },
                });
            }
        }

        // Collect due heartbeats first; applying them needs the full state.
        let mut beats = Vec::new();
        for entity in &mut self.entities {
            let entity_path = entity.address().entity.clone();
            if let Some(heartbeat) = entity.heartbeat_mut() {
                let period = heartbeat.period();
                if let Some(counter) = heartbeat.tick(now) {
                    if let Some(feature_id) = heartbeat.feature_id() {
                        beats.push((entity_path, feature_id, counter, period));
                    }
                }
            }
        }

        for (entity_path, feature_id, counter, period) in beats {
            self.emit_heartbeat(&entity_path, feature_id, counter, period);
        }
    }

    fn emit_heartbeat(
        &mut self,
        entity_path: &[u32],
        feature_id: u32,
        counter: u64,
        period: std::time::Duration,
    ) {
        let data = FunctionData::DeviceDiagnosisHeartbeatData(
            eebus_wire::spine::DeviceDiagnosisHeartbeatData {
                timeout: Some(period.as_millis() as u64),
                heartbeat_counter: Some(counter),
            },
        );

        let address = {
            let Some(entity) = self.entity_mut(entity_path) else {
                return;
            };
            let Some(feature) = entity.feature_with_id_mut(feature_id) else {
                return;
            };
            let function = feature.add_function(FunctionType::DeviceDiagnosisHeartbeatData);
            if function.set_data(data.clone()).is_err() {
                return;
            }
            feature.address().clone()
        };
        let local_address = self.local_address(&address);

        self.notify_subscribers(&local_address, Command::new(data));
    }
}
