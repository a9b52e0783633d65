//! The service facade: one SHIP node wired to one SPINE device.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use eebus_runtime::EebusError;
use eebus_ship::api::{DataReader, DataWriter, ShipNodeReader};
use eebus_ship::{ShipNode, ShipNodeConfig, ShipRole, ShipTransport, SmeState};
use eebus_spine::device::DeviceInfo;
use eebus_spine::DeviceLocal;
use eebus_wire::spine::node_management::FeatureSet;

/// Construction parameters for an [`EebusService`].
///
/// The SPINE device address is derived from vendor, model and serial as
/// `d:_n:<vendor>_<model>-<serial>`.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub vendor: String,
    pub brand: String,
    pub model: String,
    pub serial: String,
    pub ship_id: String,
    pub device_type: String,
    pub feature_set: FeatureSet,
    /// Port the embedder's TLS listener runs on.
    pub port: u16,
    /// Default role for connections started through the service.
    pub role: ShipRole,
    /// SKI of the local certificate, hex.
    pub local_ski: String,
}

impl ServiceConfig {
    pub fn device_address(&self) -> String {
        format!("d:_n:{}_{}-{}", self.vendor, self.model, self.serial)
    }
}

/// Callbacks from the service into the embedding application.
///
/// All methods have defaults, so an embedder only implements what it
/// cares about.
pub trait ServiceReader: Send + Sync {
    fn on_remote_ski_connected(&self, _ski: &str) {}
    fn on_remote_ski_disconnected(&self, _ski: &str) {}
    fn on_ship_state_update(&self, _ski: &str, _state: SmeState) {}
    fn on_ship_id_update(&self, _ski: &str, _ship_id: &str) {}
}

struct ServiceInner {
    device: Arc<DeviceLocal>,
    reader: Arc<dyn ServiceReader>,
    pairing_possible: AtomicBool,
}

impl ShipNodeReader for ServiceInner {
    fn on_remote_ski_connected(&self, ski: &str) {
        self.reader.on_remote_ski_connected(ski);
    }

    fn on_remote_ski_disconnected(&self, ski: &str) {
        self.device.remove_remote_device_connection(ski);
        self.reader.on_remote_ski_disconnected(ski);
    }

    fn setup_remote_device(&self, ski: &str, writer: Arc<dyn DataWriter>) -> Arc<dyn DataReader> {
        self.device.setup_remote_device(ski, writer)
    }

    fn on_ship_id_update(&self, ski: &str, ship_id: &str) {
        info!(ski = %ski, ship_id = %ship_id, "peer announced its ship id");
        self.reader.on_ship_id_update(ski, ship_id);
    }

    fn on_state_update(&self, ski: &str, state: SmeState) {
        self.reader.on_ship_state_update(ski, state);
    }

    fn is_waiting_for_trust_allowed(&self, _ski: &str) -> bool {
        self.pairing_possible.load(Ordering::SeqCst)
    }
}

/// Owns the SHIP node and the local SPINE device of one EEBUS service.
pub struct EebusService {
    config: ServiceConfig,
    inner: Arc<ServiceInner>,
    ship_node: ShipNode,
}

impl EebusService {
    pub fn new(config: ServiceConfig, reader: Arc<dyn ServiceReader>) -> Self {
        let device = Arc::new(DeviceLocal::new(DeviceInfo {
            address: config.device_address(),
            device_type: config.device_type.clone(),
            feature_set: config.feature_set,
            vendor: config.vendor.clone(),
            brand: config.brand.clone(),
            model: config.model.clone(),
            serial: config.serial.clone(),
            ship_id: config.ship_id.clone(),
        }));

        let inner = Arc::new(ServiceInner {
            device,
            reader,
            pairing_possible: AtomicBool::new(false),
        });

        let ship_node = ShipNode::new(
            ShipNodeConfig {
                local_ski: config.local_ski.clone(),
                ship_id: config.ship_id.clone(),
                port: config.port,
                role: config.role,
            },
            Arc::clone(&inner) as Arc<dyn ShipNodeReader>,
        );

        EebusService {
            config,
            inner,
            ship_node,
        }
    }

    pub fn start(&self) -> Result<(), EebusError> {
        self.inner.device.start()
    }

    pub async fn stop(&self) {
        self.ship_node.stop();
        self.inner.device.stop().await;
    }

    pub fn local_device(&self) -> Arc<DeviceLocal> {
        Arc::clone(&self.inner.device)
    }

    pub fn local_ski(&self) -> &str {
        &self.config.local_ski
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Allow or refuse peers to wait in the hello phase for a trust
    /// decision.
    pub fn set_pairing_possible(&self, possible: bool) {
        self.inner.pairing_possible.store(possible, Ordering::SeqCst);
    }

    pub fn register_remote_ski(&self, ski: &str, trusted: bool) {
        self.ship_node.register_remote_ski(ski, trusted);
    }

    pub fn unregister_remote_ski(&self, ski: &str) {
        self.ship_node.unregister_remote_ski(ski);
    }

    pub fn cancel_pairing_with_ski(&self, ski: &str) {
        self.ship_node.cancel_pairing_with_ski(ski);
    }

    pub fn connection_state(&self, ski: &str) -> Option<SmeState> {
        self.ship_node.connection_state(ski)
    }

    /// Take an inbound TLS session for the given peer SKI.
    pub fn accept_peer(&self, ski: &str, transport: ShipTransport) -> Result<(), EebusError> {
        self.ship_node.accept(ski, transport)
    }

    /// Dial out to the given peer SKI.
    pub fn connect_peer(&self, ski: &str, transport: ShipTransport) -> Result<(), EebusError> {
        self.ship_node.connect(ski, transport)
    }
}
