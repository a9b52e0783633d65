//! The local SPINE device: public API and the worker task.
//!
//! One worker per device consumes the message queue sequentially; routing
//! happens under the device mutex. External setters take the same lock.
//! Events and user callbacks collected during routing run after the lock
//! is released.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use eebus_runtime::{Deadline, EebusError, QueueReceiver, QueueSender, Timer, queue};
use eebus_ship::{DataReader, DataWriter};
use eebus_wire::spine::node_management::{
    DeviceInformation, FeatureSet, NodeManagementUseCaseData, Role, UseCaseInformation,
};
use eebus_wire::spine::{
    Command, EntityAddress, FeatureAddress, Filter, FunctionData, FunctionType, ResultData,
};

use crate::entity::EntityLocal;
use crate::events::{DeviceEventHub, ElementChange, EventPayload, EventType};
use crate::feature::{
    DEFAULT_MAX_RESPONSE_DELAY, FeatureLocal, ResponseCallback, WriteApprovalCallback,
    WriteRequest, feature_type,
};
use crate::heartbeat::{DEFAULT_HEARTBEAT_PERIOD, HeartbeatManager};
use crate::node_management;
use crate::sender::Sender;

use super::remote::DeviceRemote;
use super::state::{DeviceState, Effect};

/// Queue depth of the device worker.
const DEVICE_QUEUE_DEPTH: usize = 15;

/// Period of the housekeeping tick driving heartbeats and pending-request
/// expiry.
const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Static description of the local device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// SPINE device address, e.g. `d:_n:vendor_model-serial`.
    pub address: String,
    pub device_type: String,
    pub feature_set: FeatureSet,
    pub vendor: String,
    pub brand: String,
    pub model: String,
    pub serial: String,
    pub ship_id: String,
}

#[derive(Debug, Clone)]
pub struct EntitySpec {
    pub entity_type: String,
    /// Enables a heartbeat manager for the entity when set.
    pub heartbeat_period: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct FeatureSpec {
    pub feature_type: String,
    pub role: Role,
}

/// Messages consumed by the device worker.
pub enum DeviceMessage {
    DataReceived { ski: String, payload: Value },
    TimerTick,
    Cancel,
}

pub struct DeviceLocal {
    state: Arc<Mutex<DeviceState>>,
    events: Arc<DeviceEventHub>,
    queue_tx: QueueSender<DeviceMessage>,
    queue_rx: Mutex<Option<QueueReceiver<DeviceMessage>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    timer: Timer,
}

impl DeviceLocal {
    pub fn new(info: DeviceInfo) -> Self {
        let (queue_tx, queue_rx) = queue(DEVICE_QUEUE_DEPTH);

        let mut state = DeviceState::new(info);
        add_device_information_entity(&mut state);

        let timer_tx = queue_tx.clone();
        let timer = Timer::new(move || {
            // A dropped tick is caught up by the next one.
            let _ = timer_tx.try_send(DeviceMessage::TimerTick);
        });

        DeviceLocal {
            state: Arc::new(Mutex::new(state)),
            events: Arc::new(DeviceEventHub::new()),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            worker: Mutex::new(None),
            timer,
        }
    }

    pub fn events(&self) -> Arc<DeviceEventHub> {
        Arc::clone(&self.events)
    }

    pub fn address(&self) -> String {
        self.lock().info.address.clone()
    }

    pub fn node_management_address(&self) -> FeatureAddress {
        self.lock().node_management_address()
    }

    pub fn create_information(&self) -> DeviceInformation {
        self.lock().create_information()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DeviceState> {
        self.state.lock().expect("device lock")
    }

    fn run_effects(&self, effects: Vec<Effect>) {
        run_effects(&self.events, effects);
    }

    /// Mutate under the lock, then run the collected side effects.
    fn with_state<T>(&self, f: impl FnOnce(&mut DeviceState) -> T) -> T {
        let (result, effects) = {
            let mut state = self.lock();
            let result = f(&mut state);
            (result, state.take_effects())
        };
        self.run_effects(effects);
        result
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn start(&self) -> Result<(), EebusError> {
        let mut worker = self.worker.lock().expect("device lock");
        if worker.is_some() {
            return Err(EebusError::NoChange);
        }
        let queue_rx = self
            .queue_rx
            .lock()
            .expect("device lock")
            .take()
            .ok_or_else(|| EebusError::Thread("device worker already consumed".into()))?;

        let state = Arc::clone(&self.state);
        let events = Arc::clone(&self.events);
        *worker = Some(tokio::spawn(worker_loop(state, events, queue_rx)));

        self.timer.start(TICK_PERIOD, true);
        info!(device = %self.address(), "spine device started");
        Ok(())
    }

    pub async fn stop(&self) {
        self.timer.stop();
        self.with_state(|state| {
            state.stopped = true;
        });

        let _ = self
            .queue_tx
            .send(DeviceMessage::Cancel, Deadline::Infinite)
            .await;

        let worker = self.worker.lock().expect("device lock").take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
        info!(device = %self.address(), "spine device stopped");
    }

    // -----------------------------------------------------------------------
    // Entities and features
    // -----------------------------------------------------------------------

    pub fn add_entity(&self, spec: EntitySpec) -> EntityAddress {
        self.with_state(|state| {
            let id = state.next_entity_id;
            state.next_entity_id += 1;

            let address = EntityAddress::new(Some(state.info.address.clone()), vec![id]);
            let mut entity = EntityLocal::new(address.clone(), spec.entity_type);
            if let Some(period) = spec.heartbeat_period {
                entity.set_heartbeat(HeartbeatManager::new(period));
            }
            state.entities.push(entity);

            notify_entity_change(state, &address, "added");
            address
        })
    }

    pub fn remove_entity(&self, address: &EntityAddress) -> Result<(), EebusError> {
        self.with_state(|state| {
            let Some(entity) = state.entity_mut(&address.entity) else {
                return Err(EebusError::NoChange);
            };
            entity.remove_all_use_case_supports();
            if let Some(heartbeat) = entity.heartbeat_mut() {
                heartbeat.stop();
            }

            notify_entity_change(state, address, "removed");
            state.entities.retain(|e| e.address().entity != address.entity);
            Ok(())
        })
    }

    pub fn add_feature(
        &self,
        entity: &EntityAddress,
        spec: FeatureSpec,
    ) -> Result<FeatureAddress, EebusError> {
        self.with_state(|state| {
            let device = state.info.address.clone();
            let entity = state
                .entity_mut(&entity.entity)
                .ok_or_else(|| EebusError::InputArgumentOutOfRange("unknown entity".into()))?;
            let id = entity.next_feature_id();
            let address = FeatureAddress::new(
                Some(device),
                entity.address().entity.clone(),
                id,
            );
            entity.add_feature(FeatureLocal::new(
                address.clone(),
                spec.feature_type,
                spec.role,
            ));
            Ok(address)
        })
    }

    /// Advertise read/write operations for one function of a feature.
    ///
    /// Enabling heartbeat data on a DeviceDiagnosis server also arms the
    /// owning entity's heartbeat manager.
    pub fn set_function_operations(
        &self,
        feature: &FeatureAddress,
        function_type: FunctionType,
        read: bool,
        write: bool,
    ) -> Result<(), EebusError> {
        self.with_state(|state| {
            let target = state
                .feature_mut(feature)
                .ok_or_else(|| EebusError::InputArgumentOutOfRange("unknown feature".into()))?;
            target.set_function_operations(function_type, read, write);

            let wire_heartbeat = target.role() == Role::Server
                && target.feature_type() == feature_type::DEVICE_DIAGNOSIS
                && function_type == FunctionType::DeviceDiagnosisHeartbeatData;

            if wire_heartbeat {
                let feature_id = feature.feature;
                let entity = state
                    .entity_mut(&feature.entity)
                    .expect("feature's entity exists");
                if entity.heartbeat().is_none() {
                    entity.set_heartbeat(HeartbeatManager::new(DEFAULT_HEARTBEAT_PERIOD));
                }
                entity
                    .heartbeat_mut()
                    .expect("heartbeat just ensured")
                    .enable(feature_id);
            }
            Ok(())
        })
    }

    /// Replace a function's stored data, notifying subscribers.
    pub fn set_feature_data(
        &self,
        feature: &FeatureAddress,
        data: FunctionData,
    ) -> Result<(), EebusError> {
        self.update_feature_data(feature, data, None, None)
    }

    /// Update a function's stored data with optional partial filters,
    /// notifying subscribers of the change.
    pub fn update_feature_data(
        &self,
        feature: &FeatureAddress,
        data: FunctionData,
        filter_partial: Option<Filter>,
        filter_delete: Option<Filter>,
    ) -> Result<(), EebusError> {
        self.with_state(|state| {
            let function_type = data.function_type();
            let partial = filter_partial.is_some() || filter_delete.is_some();
            {
                let target = state
                    .feature_mut(feature)
                    .ok_or_else(|| EebusError::InputArgumentOutOfRange("unknown feature".into()))?;
                let function = target.function_mut(function_type).ok_or(EebusError::NoChange)?;
                function.update_data(
                    &data,
                    filter_partial.as_ref(),
                    filter_delete.as_ref(),
                    partial,
                )?;
            }

            let local_address = state.local_address(feature);
            let notify_cmd = state
                .feature(feature)
                .and_then(|f| f.function(function_type))
                .map(|f| f.write_cmd(filter_partial.clone(), filter_delete.clone()))
                .expect("feature just updated");
            state.notify_subscribers(&local_address, notify_cmd);

            let mut payload = EventPayload::new("", EventType::DataChange, ElementChange::Update);
            payload.local_feature = Some(local_address);
            payload.function = Some(function_type);
            state.push_effect(Effect::Event(payload));
            Ok(())
        })
    }

    pub fn feature_data(
        &self,
        feature: &FeatureAddress,
        function_type: FunctionType,
    ) -> Option<FunctionData> {
        self.lock().feature(feature)?.data_copy(function_type)
    }

    pub fn add_use_case_support(
        &self,
        entity: &EntityAddress,
        info: UseCaseInformation,
    ) -> Result<(), EebusError> {
        self.with_state(|state| {
            let entity = state
                .entity_mut(&entity.entity)
                .ok_or_else(|| EebusError::InputArgumentOutOfRange("unknown entity".into()))?;
            entity.add_use_case_support(info);
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Client operations towards remotes
    // -----------------------------------------------------------------------

    /// Issue a read towards a remote feature; the callback fires with the
    /// correlated reply (or a timeout).
    pub fn request_remote_data(
        &self,
        local: &FeatureAddress,
        function_type: FunctionType,
        remote: &FeatureAddress,
        callback: Option<ResponseCallback>,
    ) -> Result<u64, EebusError> {
        self.with_state(|state| {
            if state.stopped {
                return Err(EebusError::NoChange);
            }
            if state.feature(local).is_none() {
                return Err(EebusError::InputArgumentOutOfRange("unknown feature".into()));
            }

            let device = remote
                .device
                .as_deref()
                .ok_or_else(|| EebusError::InputArgumentNull("remote device address".into()))?;
            let (sender, ski, max_delay) = {
                let remote_device = state
                    .remote_by_address(device)
                    .ok_or(EebusError::NoChange)?;
                let max_delay = remote_device
                    .feature(remote)
                    .map(|f| f.max_response_delay())
                    .unwrap_or(DEFAULT_MAX_RESPONSE_DELAY);
                (
                    remote_device.sender().clone(),
                    remote_device.ski().to_owned(),
                    max_delay,
                )
            };

            let local_address = state.local_address(local);
            let cmd = Command::new(FunctionData::empty(function_type));
            let counter = sender.send_read(&local_address, remote, cmd)?;

            state.pending.add(&ski, counter, local_address, max_delay);
            if let Some(callback) = callback {
                state
                    .feature_mut(local)
                    .expect("feature just checked")
                    .add_response_callback(counter, callback);
            }
            Ok(counter)
        })
    }

    /// Issue a write towards a remote server feature.
    ///
    /// The peer only accepts it once a binding for this pair exists; the
    /// outcome arrives as a result frame correlated by the returned
    /// counter.
    pub fn write_remote_data(
        &self,
        local: &FeatureAddress,
        remote: &FeatureAddress,
        data: FunctionData,
        filter_partial: Option<Filter>,
        filter_delete: Option<Filter>,
    ) -> Result<u64, EebusError> {
        self.with_state(|state| {
            if state.stopped {
                return Err(EebusError::NoChange);
            }
            if state.feature(local).is_none() {
                return Err(EebusError::InputArgumentOutOfRange("unknown feature".into()));
            }

            let device = remote
                .device
                .as_deref()
                .ok_or_else(|| EebusError::InputArgumentNull("remote device address".into()))?;
            let (sender, ski, max_delay) = {
                let remote_device = state
                    .remote_by_address(device)
                    .ok_or(EebusError::NoChange)?;
                let max_delay = remote_device
                    .feature(remote)
                    .map(|f| f.max_response_delay())
                    .unwrap_or(DEFAULT_MAX_RESPONSE_DELAY);
                (
                    remote_device.sender().clone(),
                    remote_device.ski().to_owned(),
                    max_delay,
                )
            };

            let local_address = state.local_address(local);
            let mut cmd = Command::new(data);
            if let Some(filter) = filter_partial {
                cmd = cmd.with_partial(filter);
            }
            if let Some(filter) = filter_delete {
                cmd = cmd.with_delete(filter);
            }

            let counter = sender.send_write(&local_address, remote, cmd)?;
            state.pending.add(&ski, counter, local_address, max_delay);
            Ok(counter)
        })
    }

    pub fn add_result_callback(
        &self,
        feature: &FeatureAddress,
        callback: ResponseCallback,
    ) -> Result<(), EebusError> {
        self.with_state(|state| {
            state
                .feature_mut(feature)
                .ok_or_else(|| EebusError::InputArgumentOutOfRange("unknown feature".into()))?
                .add_result_callback(callback);
            Ok(())
        })
    }

    pub fn add_write_approval_callback(
        &self,
        feature: &FeatureAddress,
        callback: WriteApprovalCallback,
    ) -> Result<(), EebusError> {
        self.with_state(|state| {
            state
                .feature_mut(feature)
                .ok_or_else(|| EebusError::InputArgumentOutOfRange("unknown feature".into()))?
                .add_write_approval_callback(callback)
        })
    }

    /// Complete a deferred write: apply it and answer the peer.
    pub fn approve_write(&self, request: &WriteRequest) -> Result<(), EebusError> {
        self.with_state(|state| {
            let sender = state
                .remote_by_ski(&request.ski)
                .ok_or(EebusError::NoChange)?
                .sender()
                .clone();
            state.apply_write(&request.ski, &request.header, &request.cmd, &sender)
        })
    }

    /// Refuse a deferred write with the given result.
    pub fn deny_write(&self, request: &WriteRequest, result: ResultData) -> Result<(), EebusError> {
        self.with_state(|state| {
            let sender = state
                .remote_by_ski(&request.ski)
                .ok_or(EebusError::NoChange)?
                .sender()
                .clone();
            let local_address = state.local_address(&request.header.destination);
            sender.send_result_error(&request.header, &local_address, result)?;
            Ok(())
        })
    }

    pub fn subscribe_to_remote(
        &self,
        local: &FeatureAddress,
        remote: &FeatureAddress,
    ) -> Result<(), EebusError> {
        self.with_state(|state| {
            let (sender, local_address) = prepare_management_call(state, local, remote)?;
            let server_type = state.feature(local).map(|f| f.feature_type().to_owned());
            sender.send_call_subscribe(&local_address, remote, server_type)?;
            state
                .feature_mut(local)
                .expect("feature just checked")
                .record_remote_subscription(remote.clone());
            Ok(())
        })
    }

    pub fn remove_remote_subscription(
        &self,
        local: &FeatureAddress,
        remote: &FeatureAddress,
    ) -> Result<(), EebusError> {
        self.with_state(|state| {
            let (sender, local_address) = prepare_management_call(state, local, remote)?;
            sender.send_call_unsubscribe(&local_address, remote)?;
            state
                .feature_mut(local)
                .expect("feature just checked")
                .drop_remote_subscription(remote);
            Ok(())
        })
    }

    pub fn bind_to_remote(
        &self,
        local: &FeatureAddress,
        remote: &FeatureAddress,
    ) -> Result<(), EebusError> {
        self.with_state(|state| {
            let (sender, local_address) = prepare_management_call(state, local, remote)?;
            let server_type = state.feature(local).map(|f| f.feature_type().to_owned());
            sender.send_call_bind(&local_address, remote, server_type)?;
            state
                .feature_mut(local)
                .expect("feature just checked")
                .record_remote_binding(remote.clone());
            Ok(())
        })
    }

    pub fn remove_remote_binding(
        &self,
        local: &FeatureAddress,
        remote: &FeatureAddress,
    ) -> Result<(), EebusError> {
        self.with_state(|state| {
            let (sender, local_address) = prepare_management_call(state, local, remote)?;
            sender.send_call_unbind(&local_address, remote)?;
            state
                .feature_mut(local)
                .expect("feature just checked")
                .drop_remote_binding(remote);
            Ok(())
        })
    }

    pub fn has_subscription_to_remote(
        &self,
        local: &FeatureAddress,
        remote: &FeatureAddress,
    ) -> bool {
        self.lock()
            .feature(local)
            .is_some_and(|f| f.has_subscription_to_remote(remote))
    }

    pub fn has_binding_to_remote(&self, local: &FeatureAddress, remote: &FeatureAddress) -> bool {
        self.lock()
            .feature(local)
            .is_some_and(|f| f.has_binding_to_remote(remote))
    }

    // -----------------------------------------------------------------------
    // Remote devices
    // -----------------------------------------------------------------------

    /// Install the mirror for a freshly connected peer and kick off
    /// detailed discovery. Returns the data-phase sink for the connection.
    pub fn setup_remote_device(
        &self,
        ski: &str,
        writer: Arc<dyn DataWriter>,
    ) -> Arc<dyn DataReader> {
        self.with_state(|state| {
            let sender = Sender::new(ski, writer);
            let remote = DeviceRemote::new(ski, sender);
            state.remote_devices.insert(ski.to_owned(), remote);

            if let Err(err) = node_management::request_detailed_discovery(state, ski) {
                warn!(ski = %ski, error = %err, "detailed discovery request failed");
            }
        });

        Arc::new(DeviceDataReader {
            ski: ski.to_owned(),
            queue_tx: self.queue_tx.clone(),
        })
    }

    /// A peer's SHIP connection ended: drop its mirror and everything
    /// referring to it.
    pub fn remove_remote_device_connection(&self, ski: &str) {
        self.with_state(|state| {
            // Disconnect events also arrive for connections that never
            // reached the SPINE layer.
            if !state.remote_devices.contains_key(ski) {
                return;
            }
            let device_address = remove_remote_device(state, ski);

            let mut payload = EventPayload::new(ski, EventType::DeviceChange, ElementChange::Remove);
            payload.device_address = device_address;
            state.push_effect(Effect::Event(payload));
        });
    }

    pub fn has_remote_device(&self, ski: &str) -> bool {
        self.lock().remote_devices.contains_key(ski)
    }

    pub fn remote_device_address(&self, ski: &str) -> Option<String> {
        self.lock().remote_by_ski(ski)?.address().map(str::to_owned)
    }

    pub fn remote_feature_data(
        &self,
        ski: &str,
        feature: &FeatureAddress,
        function_type: FunctionType,
    ) -> Option<FunctionData> {
        self.lock()
            .remote_by_ski(ski)?
            .feature(feature)?
            .data_copy(function_type)
    }

    pub fn remote_use_cases(&self, ski: &str) -> Option<NodeManagementUseCaseData> {
        self.lock().remote_by_ski(ski)?.use_cases_data_copy()
    }

    pub fn subscription_entries(&self) -> Vec<crate::subscription::SubscriptionEntry> {
        self.lock().subscriptions.entries().to_vec()
    }

    pub fn binding_entries(&self) -> Vec<crate::binding::BindingEntry> {
        self.lock().bindings.entries().to_vec()
    }

    // -----------------------------------------------------------------------
    // Test hooks
    // -----------------------------------------------------------------------

    /// Route one payload synchronously, bypassing the worker queue.
    #[cfg(test)]
    pub(crate) fn handle_payload_for_test(&self, ski: &str, payload: &Value) {
        self.with_state(|state| state.handle_payload(ski, payload));
    }

    #[cfg(test)]
    pub(crate) fn tick_for_test(&self, now: Instant) {
        self.with_state(|state| state.tick(now));
    }
}

fn prepare_management_call(
    state: &DeviceState,
    local: &FeatureAddress,
    remote: &FeatureAddress,
) -> Result<(Sender, FeatureAddress), EebusError> {
    if state.stopped {
        return Err(EebusError::NoChange);
    }

    let feature = state
        .feature(local)
        .ok_or_else(|| EebusError::InputArgumentOutOfRange("unknown feature".into()))?;
    if feature.role() == Role::Server {
        // Server features do not subscribe or bind to anyone.
        return Err(EebusError::NoChange);
    }

    let device = remote.device.as_deref().ok_or(EebusError::NoChange)?;
    let sender = state
        .remote_by_address(device)
        .ok_or(EebusError::NoChange)?
        .sender()
        .clone();
    Ok((sender, state.local_address(local)))
}

/// Drop the mirror and every reference to it; returns the device address
/// the mirror had learned, if any.
fn remove_remote_device(state: &mut DeviceState, ski: &str) -> Option<String> {
    let device_address = state
        .remote_by_ski(ski)
        .and_then(|r| r.address().map(str::to_owned));

    if let Some(device) = device_address.as_deref() {
        state.subscriptions.remove_device_subscriptions(device);
        state.bindings.remove_device_bindings(device);
        for entity in &mut state.entities {
            for feature in entity.features_mut() {
                feature.clean_remote_device_caches(device);
            }
        }
    }

    state.pending.remove_device(ski);
    state.remote_devices.remove(ski);
    device_address
}

/// Build entity `[0]` with node management and device classification, as
/// every device carries them.
fn add_device_information_entity(state: &mut DeviceState) {
    let device = state.info.address.clone();
    let address = EntityAddress::device_information(Some(device.clone()));
    let mut entity = EntityLocal::new(address.clone(), crate::entity::entity_type::DEVICE_INFORMATION);

    // Node management at feature 0.
    let nm_id = entity.next_feature_id();
    let mut nm = FeatureLocal::new(
        address.feature(nm_id),
        feature_type::NODE_MANAGEMENT,
        Role::Special,
    );
    nm.set_function_operations(FunctionType::NodeManagementDetailedDiscoveryData, true, false);
    nm.set_function_operations(FunctionType::NodeManagementUseCaseData, true, false);
    nm.set_function_operations(FunctionType::NodeManagementSubscriptionData, true, false);
    nm.set_function_operations(FunctionType::NodeManagementSubscriptionRequestCall, false, false);
    nm.set_function_operations(FunctionType::NodeManagementSubscriptionDeleteCall, false, false);
    nm.set_function_operations(FunctionType::NodeManagementBindingData, true, false);
    nm.set_function_operations(FunctionType::NodeManagementBindingRequestCall, false, false);
    nm.set_function_operations(FunctionType::NodeManagementBindingDeleteCall, false, false);
    if state.info.feature_set != FeatureSet::Simple {
        nm.set_function_operations(FunctionType::NodeManagementDestinationListData, true, false);
    }
    entity.add_feature(nm);

    // Device classification with the manufacturer data preloaded.
    let dc_id = entity.next_feature_id();
    let mut dc = FeatureLocal::new(
        address.feature(dc_id),
        feature_type::DEVICE_CLASSIFICATION,
        Role::Server,
    );
    dc.set_function_operations(
        FunctionType::DeviceClassificationManufacturerData,
        true,
        false,
    );
    let manufacturer = FunctionData::DeviceClassificationManufacturerData(
        eebus_wire::spine::DeviceClassificationManufacturerData {
            device_name: Some(state.info.model.clone()),
            device_code: Some(state.info.ship_id.clone()),
            serial_number: Some(state.info.serial.clone()),
            brand_name: Some(state.info.brand.clone()),
            vendor_name: Some(state.info.vendor.clone()),
        },
    );
    if let Some(function) = dc.function_mut(FunctionType::DeviceClassificationManufacturerData) {
        let _ = function.set_data(manufacturer);
    }
    entity.add_feature(dc);

    state.entities.push(entity);
}

/// Tell node-management subscribers about an entity joining or leaving.
fn notify_entity_change(state: &mut DeviceState, address: &EntityAddress, change: &str) {
    let Some(entity) = state.entity(&address.entity) else {
        return;
    };

    let mut info = entity.create_information();
    info.description.last_state_change = Some(change.to_owned());

    let mut data = eebus_wire::spine::NodeManagementDetailedDiscoveryData {
        device_information: Some(state.create_information()),
        entity_information: vec![info],
        ..Default::default()
    };
    if change == "added" {
        data.feature_information = entity.features().iter().map(|f| f.create_information()).collect();
    }

    let nm_address = state.node_management_address();
    let cmd = Command::new(FunctionData::NodeManagementDetailedDiscoveryData(data))
        .with_partial(Filter::empty());
    state.notify_subscribers(&nm_address, cmd);
}

fn run_effects(events: &DeviceEventHub, effects: Vec<Effect>) {
    for effect in effects {
        match effect {
            Effect::Event(payload) => events.publish(&payload),
            Effect::Response { callbacks, message } => {
                for callback in callbacks {
                    callback(&message);
                }
            }
            Effect::WriteApproval { callbacks, request } => {
                for callback in callbacks {
                    callback(&request);
                }
            }
        }
    }
}

async fn worker_loop(
    state: Arc<Mutex<DeviceState>>,
    events: Arc<DeviceEventHub>,
    mut queue_rx: QueueReceiver<DeviceMessage>,
) {
    loop {
        match queue_rx.recv(Deadline::Infinite).await {
            Ok(DeviceMessage::DataReceived { ski, payload }) => {
                let effects = {
                    let mut state = state.lock().expect("device lock");
                    state.handle_payload(&ski, &payload);
                    state.take_effects()
                };
                run_effects(&events, effects);
            }
            Ok(DeviceMessage::TimerTick) => {
                let effects = {
                    let mut state = state.lock().expect("device lock");
                    state.tick(Instant::now());
                    state.take_effects()
                };
                run_effects(&events, effects);
            }
            Ok(DeviceMessage::Cancel) => {
                debug!("device worker cancelled");
                break;
            }
            Err(_) => break,
        }
    }
}

/// Feed of data-phase payloads from one SHIP connection into the device
/// queue. Runs on the connection task, so it only enqueues.
struct DeviceDataReader {
    ski: String,
    queue_tx: QueueSender<DeviceMessage>,
}

impl DataReader for DeviceDataReader {
    fn data_received(&self, payload: Value) {
        let message = DeviceMessage::DataReceived {
            ski: self.ski.clone(),
            payload,
        };
        if self.queue_tx.try_send(message).is_err() {
            warn!(ski = %self.ski, "device queue saturated, dropping datagram");
        }
    }
}
