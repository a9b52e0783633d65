//! The SHIP node: owns every connection and the SKI trust registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{info, warn};

use eebus_runtime::EebusError;

use crate::api::ShipNodeReader;
use crate::connection::{ConnEvent, ShipRole, Sme, SmeState};
use crate::transport::ShipTransport;

/// Construction parameters for a [`ShipNode`].
#[derive(Debug, Clone)]
pub struct ShipNodeConfig {
    /// The local certificate's subject key identifier, hex.
    pub local_ski: String,
    /// The local SHIP id announced in the access-methods exchange.
    pub ship_id: String,
    /// TCP port the embedder's listener runs on; recorded for the
    /// embedding application, unused by the core itself.
    pub port: u16,
    /// Default role for connections started via [`ShipNode::start_connection`].
    pub role: ShipRole,
}

#[derive(Debug, Clone, Copy)]
struct SkiRegistration {
    trusted: bool,
}

struct ConnectionHandle {
    event_tx: mpsc::UnboundedSender<ConnEvent>,
    state: Arc<Mutex<SmeState>>,
}

struct NodeInner {
    config: ShipNodeConfig,
    reader: Arc<dyn ShipNodeReader>,
    registry: Mutex<HashMap<String, SkiRegistration>>,
    connections: Mutex<HashMap<String, ConnectionHandle>>,
}

impl NodeInner {
    fn connection_finished(&self, ski: &str) {
        self.connections.lock().expect("ship node lock").remove(ski);
        info!(ski = %ski, "ship connection ended");
    }
}

/// Owns the set of SHIP connections and admission decisions.
pub struct ShipNode {
    inner: Arc<NodeInner>,
}

impl ShipNode {
    pub fn new(config: ShipNodeConfig, reader: Arc<dyn ShipNodeReader>) -> Self {
        ShipNode {
            inner: Arc::new(NodeInner {
                config,
                reader,
                registry: Mutex::new(HashMap::new()),
                connections: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Mark a remote SKI as known; `trusted` grants immediate admission.
    ///
    /// Granting trust to a SKI with a live pending connection lets that
    /// connection proceed out of the hello phase.
    pub fn register_remote_ski(&self, ski: &str, trusted: bool) {
        self.inner
            .registry
            .lock()
            .expect("ship node lock")
            .insert(ski.to_owned(), SkiRegistration { trusted });

        if trusted {
            let connections = self.inner.connections.lock().expect("ship node lock");
            if let Some(handle) = connections.get(ski) {
                let _ = handle.event_tx.send(ConnEvent::Trust);
            }
        }
    }

    /// Forget a remote SKI: closes any live connection, which in turn
    /// tears down the mirrored SPINE state via the node reader.
    pub fn unregister_remote_ski(&self, ski: &str) {
        self.inner
            .registry
            .lock()
            .expect("ship node lock")
            .remove(ski);
        self.close_connection(ski);
    }

    /// Abort an in-flight pairing attempt without touching the registry.
    pub fn cancel_pairing_with_ski(&self, ski: &str) {
        self.close_connection(ski);
    }

    pub fn is_ski_trusted(&self, ski: &str) -> bool {
        self.inner
            .registry
            .lock()
            .expect("ship node lock")
            .get(ski)
            .map(|r| r.trusted)
            .unwrap_or(false)
    }

    /// The SKI of the local certificate this node was configured with.
    pub fn local_ski(&self) -> &str {
        &self.inner.config.local_ski
    }

    /// Current SME state of the connection for a SKI, if one is live.
    pub fn connection_state(&self, ski: &str) -> Option<SmeState> {
        self.inner
            .connections
            .lock()
            .expect("ship node lock")
            .get(ski)
            .map(|h| *h.state.lock().expect("ship node lock"))
    }

    /// Take an inbound TLS session whose peer certificate carries `ski`.
    pub fn accept(&self, ski: &str, transport: ShipTransport) -> Result<(), EebusError> {
        self.spawn_connection(ski, transport, ShipRole::Server)
    }

    /// Dial out to a peer whose certificate carries `ski`.
    pub fn connect(&self, ski: &str, transport: ShipTransport) -> Result<(), EebusError> {
        self.spawn_connection(ski, transport, ShipRole::Client)
    }

    /// Start a connection using the node's configured default role.
    pub fn start_connection(&self, ski: &str, transport: ShipTransport) -> Result<(), EebusError> {
        self.spawn_connection(ski, transport, self.inner.config.role)
    }

    /// Close every connection. The registry survives a stop.
    pub fn stop(&self) {
        let connections = self.inner.connections.lock().expect("ship node lock");
        for handle in connections.values() {
            let _ = handle.event_tx.send(ConnEvent::CloseRequest);
        }
    }

    fn close_connection(&self, ski: &str) {
        let connections = self.inner.connections.lock().expect("ship node lock");
        if let Some(handle) = connections.get(ski) {
            let _ = handle.event_tx.send(ConnEvent::CloseRequest);
        }
    }

    fn spawn_connection(
        &self,
        ski: &str,
        transport: ShipTransport,
        role: ShipRole,
    ) -> Result<(), EebusError> {
        let mut connections = self.inner.connections.lock().expect("ship node lock");
        if connections.contains_key(ski) {
            // One session per device; a second TLS session for the same
            // SKI is refused.
            warn!(ski = %ski, "connection for this SKI is already active");
            return Err(EebusError::NoChange);
        }

        let trusted = self.is_ski_trusted(ski);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(SmeState::Initial));

        let observer = Arc::new(StateMirror {
            inner: Arc::clone(&state),
            reader: Arc::clone(&self.inner.reader),
        });

        let sme = Sme::new(
            role,
            ski.to_owned(),
            self.inner.config.ship_id.clone(),
            trusted,
            observer,
            write_tx,
            &event_tx,
        );

        connections.insert(
            ski.to_owned(),
            ConnectionHandle {
                event_tx,
                state: Arc::clone(&state),
            },
        );
        drop(connections);

        info!(ski = %ski, ?role, "starting ship connection");

        let inner = Arc::clone(&self.inner);
        let ski = ski.to_owned();
        tokio::spawn(async move {
            crate::connection::run(transport, sme, event_rx, write_rx).await;
            inner.connection_finished(&ski);
        });

        Ok(())
    }
}

impl Drop for ShipNode {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Keeps the node's view of a connection's state current while forwarding
/// every reader callback to the embedding service.
struct StateMirror {
    inner: Arc<Mutex<SmeState>>,
    reader: Arc<dyn ShipNodeReader>,
}

impl ShipNodeReader for StateMirror {
    fn on_remote_ski_connected(&self, ski: &str) {
        self.reader.on_remote_ski_connected(ski);
    }

    fn on_remote_ski_disconnected(&self, ski: &str) {
        self.reader.on_remote_ski_disconnected(ski);
    }

    fn setup_remote_device(
        &self,
        ski: &str,
        writer: Arc<dyn crate::api::DataWriter>,
    ) -> Arc<dyn crate::api::DataReader> {
        self.reader.setup_remote_device(ski, writer)
    }

    fn on_ship_id_update(&self, ski: &str, ship_id: &str) {
        self.reader.on_ship_id_update(ski, ship_id);
    }

    fn on_state_update(&self, ski: &str, state: SmeState) {
        *self.inner.lock().expect("ship node lock") = state;
        self.reader.on_state_update(ski, state);
    }

    fn is_waiting_for_trust_allowed(&self, ski: &str) -> bool {
        self.reader.is_waiting_for_trust_allowed(ski)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{DataReader, DataWriter};
    use crate::transport::pair;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct NullReader {
        connected: AtomicUsize,
        disconnected: AtomicUsize,
    }

    struct NullSink;

    impl DataReader for NullSink {
        fn data_received(&self, _payload: Value) {}
    }

    impl ShipNodeReader for NullReader {
        fn on_remote_ski_connected(&self, _ski: &str) {
            self.connected.fetch_add(1, Ordering::SeqCst);
        }

        fn on_remote_ski_disconnected(&self, _ski: &str) {
            self.disconnected.fetch_add(1, Ordering::SeqCst);
        }

        fn setup_remote_device(
            &self,
            _ski: &str,
            _writer: Arc<dyn DataWriter>,
        ) -> Arc<dyn DataReader> {
            Arc::new(NullSink)
        }

        fn on_ship_id_update(&self, _ski: &str, _ship_id: &str) {}

        fn on_state_update(&self, _ski: &str, _state: SmeState) {}

        fn is_waiting_for_trust_allowed(&self, _ski: &str) -> bool {
            true
        }
    }

    fn node(reader: Arc<NullReader>, role: ShipRole) -> ShipNode {
        ShipNode::new(
            ShipNodeConfig {
                local_ski: "local-ski".into(),
                ship_id: "SHIP-LOCAL".into(),
                port: 4711,
                role,
            },
            reader,
        )
    }

    #[tokio::test]
    async fn two_nodes_complete_and_unregister_tears_down() {
        let server_reader = Arc::new(NullReader {
            connected: AtomicUsize::new(0),
            disconnected: AtomicUsize::new(0),
        });
        let client_reader = Arc::new(NullReader {
            connected: AtomicUsize::new(0),
            disconnected: AtomicUsize::new(0),
        });

        let server = node(Arc::clone(&server_reader), ShipRole::Server);
        let client = node(Arc::clone(&client_reader), ShipRole::Client);

        server.register_remote_ski("ski-client", true);
        client.register_remote_ski("ski-server", true);

        let (server_side, client_side) = pair(16);
        server.accept("ski-client", server_side).unwrap();
        client.connect("ski-server", client_side).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if server_reader.connected.load(Ordering::SeqCst) == 1
                    && client_reader.connected.load(Ordering::SeqCst) == 1
                {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("both nodes should reach the data phase");

        assert_eq!(
            server.connection_state("ski-client"),
            Some(SmeState::Complete)
        );

        client.unregister_remote_ski("ski-server");

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if server_reader.disconnected.load(Ordering::SeqCst) == 1
                    && client_reader.disconnected.load(Ordering::SeqCst) == 1
                {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("unregister should close both ends");

        assert_eq!(client.connection_state("ski-server"), None);
    }

    #[tokio::test]
    async fn duplicate_connection_for_a_ski_is_refused() {
        let reader = Arc::new(NullReader {
            connected: AtomicUsize::new(0),
            disconnected: AtomicUsize::new(0),
        });
        let server = node(Arc::clone(&reader), ShipRole::Server);

        let (a, _a_peer) = pair(4);
        let (b, _b_peer) = pair(4);

        server.accept("ski-x", a).unwrap();
        assert_eq!(server.accept("ski-x", b).unwrap_err(), EebusError::NoChange);
    }
}
