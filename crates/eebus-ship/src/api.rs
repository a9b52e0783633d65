//! Seams between the SHIP layer and its embedder.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use eebus_runtime::EebusError;
use eebus_wire::ship::{ShipData, ShipFrame};

use crate::connection::SmeState;

/// Sink for data-phase payloads, implemented by the SPINE side.
///
/// Called on the connection task; implementations must only enqueue and
/// return.
pub trait DataReader: Send + Sync {
    fn data_received(&self, payload: Value);
}

/// Sink for outbound SPINE payloads.
///
/// Thread-safe; implementations enqueue in FIFO order and never block.
pub trait DataWriter: Send + Sync {
    fn write_payload(&self, payload: Value) -> Result<(), EebusError>;
}

/// [`DataWriter`] backed by a connection's frame queue: wraps each payload
/// in a SHIP data frame and hands it to the connection task.
pub struct ShipDataWriter {
    write_tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ShipDataWriter {
    pub(crate) fn new(write_tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        ShipDataWriter { write_tx }
    }
}

impl DataWriter for ShipDataWriter {
    fn write_payload(&self, payload: Value) -> Result<(), EebusError> {
        let frame = ShipFrame::Data(ShipData::new(payload));
        self.write_tx
            .send(frame.encode())
            .map_err(|_| EebusError::NoChange)
    }
}

/// Callbacks from the SHIP node into the embedding service.
///
/// The service wires connection lifecycle into the SPINE device here;
/// every method is invoked from a connection task.
pub trait ShipNodeReader: Send + Sync {
    /// The SME for this SKI reached the data phase.
    fn on_remote_ski_connected(&self, ski: &str);

    /// The connection for this SKI is gone; tear down mirrored state.
    fn on_remote_ski_disconnected(&self, ski: &str);

    /// Provide the data-phase sink for a freshly completed connection.
    fn setup_remote_device(&self, ski: &str, writer: Arc<dyn DataWriter>) -> Arc<dyn DataReader>;

    /// The peer announced its SHIP id during the access-methods exchange.
    fn on_ship_id_update(&self, ski: &str, ship_id: &str);

    /// The SME transitioned to a new state.
    fn on_state_update(&self, ski: &str, state: SmeState);

    /// Whether an untrusted peer may sit in the hello phase awaiting a
    /// trust decision. `false` aborts the SME from hello.
    fn is_waiting_for_trust_allowed(&self, ski: &str) -> bool;
}
