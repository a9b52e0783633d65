//! The SHIP connection state machine (SME).
//!
//! One task per peer. Inbound frames, timer expirations and control
//! requests all arrive as events on the connection's queue; the state
//! machine itself is synchronous and only ever runs on that task. Timer
//! callbacks post events, they never touch state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use eebus_runtime::Timer;
use eebus_wire::ship::{
    AccessMethods, ConnectionClose, ConnectionHello, ConnectionPinError, ConnectionPinState,
    HandshakeType, HelloPhase, MessageProtocolHandshake, MessageProtocolHandshakeError, PinState,
    ShipFrame, handshake_error, pin_error,
};

use crate::api::{DataReader, ShipDataWriter, ShipNodeReader};
use crate::transport::ShipTransport;

const T_CMI: Duration = Duration::from_secs(60);
const T_HELLO: Duration = Duration::from_secs(60);
const T_HELLO_PROLONG: Duration = Duration::from_secs(30);
const T_HANDSHAKE: Duration = Duration::from_secs(10);
const T_PIN: Duration = Duration::from_secs(600);

/// `waiting` value advertised while sitting in the hello-pending phase.
const HELLO_WAITING_MS: u32 = 60_000;

/// Which end of the TLS session this SME drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShipRole {
    Client,
    Server,
}

/// SME lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmeState {
    Initial,
    CmiServerWait,
    CmiServerEvaluate,
    CmiClientSend,
    CmiClientWait,
    CmiClientEvaluate,
    HelloReadyInit,
    HelloReadyListen,
    HelloPendingInit,
    HelloPendingListen,
    HelloPendingTimeout,
    HelloAbort,
    HandshakeExchange,
    HandshakeSelected,
    HandshakeMismatch,
    PinCheck,
    PinRequired,
    PinAckOk,
    PinOptional,
    PinNone,
    PinError,
    AccessMethodsExchange,
    Complete,
    ClosingAnnounce,
    ClosingConfirm,
    Closed,
}

/// Timer kinds owned by one SME.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmeTimer {
    Cmi,
    Hello,
    HelloProlong,
    Handshake,
    Pin,
}

/// Events delivered to a connection task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnEvent {
    Timer(SmeTimer),
    /// The embedding application granted trust for this SKI.
    Trust,
    /// Close the connection cleanly (stop, unregister, cancel pairing).
    CloseRequest,
}

struct SmeTimers {
    cmi: Timer,
    hello: Timer,
    hello_prolong: Timer,
    handshake: Timer,
    pin: Timer,
}

impl SmeTimers {
    fn new(event_tx: &mpsc::UnboundedSender<ConnEvent>) -> Self {
        let post = |kind: SmeTimer| {
            let tx = event_tx.clone();
            move || {
                let _ = tx.send(ConnEvent::Timer(kind));
            }
        };
        SmeTimers {
            cmi: Timer::new(post(SmeTimer::Cmi)),
            hello: Timer::new(post(SmeTimer::Hello)),
            hello_prolong: Timer::new(post(SmeTimer::HelloProlong)),
            handshake: Timer::new(post(SmeTimer::Handshake)),
            pin: Timer::new(post(SmeTimer::Pin)),
        }
    }

    fn stop_all(&self) {
        self.cmi.stop();
        self.hello.stop();
        self.hello_prolong.stop();
        self.handshake.stop();
        self.pin.stop();
    }
}

pub(crate) struct Sme {
    role: ShipRole,
    ski: String,
    local_ship_id: String,
    state: SmeState,
    trusted: bool,

    sent_ready: bool,
    peer_ready: bool,
    /// We granted the peer one T_hello reset already.
    prolongation_granted: bool,
    /// We asked the peer for one prolongation already.
    prolongation_requested: bool,

    peer_pin_done: bool,
    sent_access_methods: bool,
    received_access_methods: bool,

    reached_data_phase: bool,

    node_reader: Arc<dyn ShipNodeReader>,
    data_reader: Option<Arc<dyn DataReader>>,
    write_tx: mpsc::UnboundedSender<Vec<u8>>,
    timers: SmeTimers,
}

impl Sme {
    pub(crate) fn new(
        role: ShipRole,
        ski: String,
        local_ship_id: String,
        trusted: bool,
        node_reader: Arc<dyn ShipNodeReader>,
        write_tx: mpsc::UnboundedSender<Vec<u8>>,
        event_tx: &mpsc::UnboundedSender<ConnEvent>,
    ) -> Self {
        Sme {
            role,
            ski,
            local_ship_id,
            state: SmeState::Initial,
            trusted,
            sent_ready: false,
            peer_ready: false,
            prolongation_granted: false,
            prolongation_requested: false,
            peer_pin_done: false,
            sent_access_methods: false,
            received_access_methods: false,
            reached_data_phase: false,
            node_reader,
            data_reader: None,
            write_tx,
            timers: SmeTimers::new(event_tx),
        }
    }

    pub(crate) fn state(&self) -> SmeState {
        self.state
    }

    fn set_state(&mut self, state: SmeState) {
        if self.state != state {
            debug!(ski = %self.ski, ?state, "sme state change");
            self.state = state;
            self.node_reader.on_state_update(&self.ski, state);
        }
    }

    fn send_frame(&self, frame: &ShipFrame) {
        let _ = self.write_tx.send(frame.encode());
    }

    /// Kick off the exchange: a client sends CMI at once, a server waits
    /// for it.
    pub(crate) fn start(&mut self) {
        match self.role {
            ShipRole::Client => {
                self.set_state(SmeState::CmiClientSend);
                self.send_frame(&ShipFrame::Cmi(eebus_wire::ship::CMI_VALUE));
                self.set_state(SmeState::CmiClientWait);
                self.timers.cmi.start(T_CMI, false);
            }
            ShipRole::Server => {
                self.set_state(SmeState::CmiServerWait);
                self.timers.cmi.start(T_CMI, false);
            }
        }
    }

    /// Abort: announce the close and drop straight to `Closed`.
    fn abort(&mut self, reason: Option<&str>) {
        warn!(ski = %self.ski, reason = reason.unwrap_or("protocol violation"), "sme abort");
        self.send_frame(&ShipFrame::Close(ConnectionClose::announce(reason)));
        self.enter_closed();
    }

    fn enter_closed(&mut self) {
        self.timers.stop_all();
        self.set_state(SmeState::Closed);
    }

    /// Terminal cleanup, run once the task loop exits.
    pub(crate) fn finish(&mut self) {
        self.timers.stop_all();
        if self.state != SmeState::Closed {
            self.set_state(SmeState::Closed);
        }
        if self.reached_data_phase {
            self.reached_data_phase = false;
            self.node_reader.on_remote_ski_disconnected(&self.ski);
        }
    }

    pub(crate) fn on_transport_gone(&mut self) {
        if self.state != SmeState::Closed {
            info!(ski = %self.ski, "transport closed by peer");
            self.enter_closed();
        }
    }

    // -----------------------------------------------------------------------
    // Event handling
    // -----------------------------------------------------------------------

    pub(crate) fn handle_event(&mut self, event: ConnEvent) {
        match event {
            ConnEvent::Timer(timer) => self.handle_timer(timer),
            ConnEvent::Trust => self.handle_trust(),
            ConnEvent::CloseRequest => self.handle_close_request(),
        }
    }

    fn handle_timer(&mut self, timer: SmeTimer) {
        if self.state == SmeState::Closed {
            return;
        }

        match timer {
            SmeTimer::Cmi => self.abort(Some("CMI timeout")),
            SmeTimer::Hello => self.hello_abort("hello timeout"),
            SmeTimer::HelloProlong => self.on_prolong_timer(),
            SmeTimer::Handshake => match self.state {
                SmeState::ClosingAnnounce => {
                    // The peer never confirmed; force the transport down.
                    self.enter_closed();
                }
                _ => self.abort(Some("handshake timeout")),
            },
            SmeTimer::Pin => self.abort(Some("pin exchange timeout")),
        }
    }

    fn handle_trust(&mut self) {
        self.trusted = true;
        if matches!(
            self.state,
            SmeState::HelloPendingInit | SmeState::HelloPendingListen | SmeState::HelloPendingTimeout
        ) {
            self.send_hello_ready();
            if self.peer_ready {
                self.hello_complete();
            }
        }
    }

    fn handle_close_request(&mut self) {
        match self.state {
            SmeState::Closed => {}
            SmeState::Complete => {
                self.send_frame(&ShipFrame::Close(ConnectionClose::announce(None)));
                self.set_state(SmeState::ClosingAnnounce);
                self.timers.handshake.start(T_HANDSHAKE, false);
            }
            _ => self.abort(None),
        }
    }

    // -----------------------------------------------------------------------
    // Frame handling
    // -----------------------------------------------------------------------

    pub(crate) fn handle_frame(&mut self, bytes: &[u8]) {
        if self.state == SmeState::Closed {
            return;
        }

        let frame = match ShipFrame::decode(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                self.abort(Some(&err.to_string()));
                return;
            }
        };

        // A close announce ends the session from any state.
        if let ShipFrame::Close(close) = &frame {
            match close.phase {
                eebus_wire::ship::ClosePhase::Announce => {
                    self.send_frame(&ShipFrame::Close(ConnectionClose::confirm()));
                    self.set_state(SmeState::ClosingConfirm);
                    self.enter_closed();
                }
                eebus_wire::ship::ClosePhase::Confirm => {
                    if self.state == SmeState::ClosingAnnounce {
                        self.enter_closed();
                    } else {
                        self.abort(Some("unexpected close confirm"));
                    }
                }
            }
            return;
        }

        match self.state {
            SmeState::CmiServerWait => self.on_cmi_server(&frame),
            SmeState::CmiClientWait => self.on_cmi_client(&frame),
            SmeState::HelloReadyListen
            | SmeState::HelloPendingListen
            | SmeState::HelloPendingTimeout => self.on_hello_frame(&frame),
            SmeState::HandshakeExchange => self.on_handshake_frame(&frame),
            SmeState::PinCheck => self.on_pin_frame(&frame),
            SmeState::AccessMethodsExchange => self.on_access_methods_frame(&frame),
            SmeState::Complete => self.on_data_frame(&frame),
            _ => self.abort(Some("unexpected frame")),
        }
    }

    // --- CMI ---------------------------------------------------------------

    fn on_cmi_server(&mut self, frame: &ShipFrame) {
        self.set_state(SmeState::CmiServerEvaluate);
        match frame {
            ShipFrame::Cmi(value) if *value == eebus_wire::ship::CMI_VALUE => {
                self.timers.cmi.stop();
                self.send_frame(&ShipFrame::Cmi(eebus_wire::ship::CMI_VALUE));
                self.enter_hello();
            }
            ShipFrame::Cmi(_) => self.abort(Some("CMI mismatch")),
            _ => self.abort(Some("expected CMI frame")),
        }
    }

    fn on_cmi_client(&mut self, frame: &ShipFrame) {
        self.set_state(SmeState::CmiClientEvaluate);
        match frame {
            ShipFrame::Cmi(value) if *value == eebus_wire::ship::CMI_VALUE => {
                self.timers.cmi.stop();
                self.enter_hello();
            }
            ShipFrame::Cmi(_) => self.abort(Some("CMI mismatch")),
            _ => self.abort(Some("expected CMI frame")),
        }
    }

    // --- Hello / trust -----------------------------------------------------

    fn enter_hello(&mut self) {
        if self.trusted {
            self.set_state(SmeState::HelloReadyInit);
            self.send_hello_ready();
        } else if self.node_reader.is_waiting_for_trust_allowed(&self.ski) {
            self.set_state(SmeState::HelloPendingInit);
            info!(ski = %self.ski, "peer untrusted, waiting for trust decision");
            self.send_frame(&ShipFrame::Hello(ConnectionHello::pending(Some(
                HELLO_WAITING_MS,
            ))));
            self.set_state(SmeState::HelloPendingListen);
            self.timers.hello.start(T_HELLO, false);
            self.timers.hello_prolong.start(T_HELLO_PROLONG, false);
        } else {
            self.set_state(SmeState::HelloAbort);
            info!(ski = %self.ski, "peer untrusted and waiting not allowed, aborting");
            self.send_frame(&ShipFrame::Hello(ConnectionHello::aborted()));
            self.abort(Some("trust denied"));
        }
    }

    fn send_hello_ready(&mut self) {
        self.send_frame(&ShipFrame::Hello(ConnectionHello::ready()));
        self.sent_ready = true;
        self.timers.hello_prolong.stop();
        self.set_state(SmeState::HelloReadyListen);
        self.timers.hello.start(T_HELLO, false);
    }

    fn on_hello_frame(&mut self, frame: &ShipFrame) {
        let ShipFrame::Hello(hello) = frame else {
            self.abort(Some("expected hello frame"));
            return;
        };

        match hello.phase {
            HelloPhase::Aborted => self.abort(Some("peer aborted hello")),
            HelloPhase::Ready => {
                self.peer_ready = true;
                if self.sent_ready {
                    self.hello_complete();
                }
            }
            HelloPhase::Pending => {
                if hello.prolongation_request == Some(true) {
                    // One reset of T_hello is granted; further requests
                    // run into the regular timeout.
                    if !self.prolongation_granted {
                        self.prolongation_granted = true;
                        self.timers.hello.start(T_HELLO, false);
                    }
                }
            }
        }
    }

    fn on_prolong_timer(&mut self) {
        if !matches!(
            self.state,
            SmeState::HelloPendingListen | SmeState::HelloPendingTimeout
        ) {
            return;
        }
        if !self.prolongation_requested {
            self.prolongation_requested = true;
            self.set_state(SmeState::HelloPendingTimeout);
            let mut hello = ConnectionHello::pending(Some(HELLO_WAITING_MS));
            hello.prolongation_request = Some(true);
            self.send_frame(&ShipFrame::Hello(hello));
        }
    }

    fn hello_abort(&mut self, reason: &str) {
        self.set_state(SmeState::HelloAbort);
        self.send_frame(&ShipFrame::Hello(ConnectionHello::aborted()));
        self.abort(Some(reason));
    }

    fn hello_complete(&mut self) {
        self.timers.hello.stop();
        self.timers.hello_prolong.stop();
        self.enter_handshake();
    }

    // --- Protocol handshake ------------------------------------------------

    fn enter_handshake(&mut self) {
        self.set_state(SmeState::HandshakeExchange);
        if self.role == ShipRole::Server {
            self.send_frame(&ShipFrame::ProtocolHandshake(MessageProtocolHandshake::new(
                HandshakeType::AnnounceMax,
            )));
        }
        self.timers.handshake.start(T_HANDSHAKE, false);
    }

    fn on_handshake_frame(&mut self, frame: &ShipFrame) {
        match frame {
            ShipFrame::ProtocolHandshake(handshake) => match (self.role, handshake.handshake_type)
            {
                (ShipRole::Server, HandshakeType::Select) => {
                    if handshake.is_acceptable() {
                        self.set_state(SmeState::HandshakeSelected);
                        self.enter_pin();
                    } else {
                        self.handshake_mismatch();
                    }
                }
                (ShipRole::Client, HandshakeType::AnnounceMax) => {
                    if handshake.is_acceptable() {
                        self.send_frame(&ShipFrame::ProtocolHandshake(
                            MessageProtocolHandshake::new(HandshakeType::Select),
                        ));
                        self.set_state(SmeState::HandshakeSelected);
                        self.enter_pin();
                    } else {
                        self.handshake_mismatch();
                    }
                }
                _ => self.handshake_mismatch(),
            },
            ShipFrame::ProtocolHandshakeError(err) => {
                self.abort(Some(&format!("peer handshake error {}", err.error)));
            }
            _ => self.abort(Some("expected protocol handshake")),
        }
    }

    fn handshake_mismatch(&mut self) {
        self.set_state(SmeState::HandshakeMismatch);
        self.send_frame(&ShipFrame::ProtocolHandshakeError(
            MessageProtocolHandshakeError {
                error: handshake_error::SELECTION_MISMATCH,
            },
        ));
        self.abort(Some("protocol handshake mismatch"));
    }

    // --- PIN ---------------------------------------------------------------

    fn enter_pin(&mut self) {
        self.timers.handshake.stop();
        self.set_state(SmeState::PinCheck);
        self.send_frame(&ShipFrame::PinState(ConnectionPinState {
            pin_state: PinState::None,
            input_permission: None,
        }));
        self.timers.pin.start(T_PIN, false);
        if self.peer_pin_done {
            self.pin_complete();
        }
    }

    fn on_pin_frame(&mut self, frame: &ShipFrame) {
        match frame {
            ShipFrame::PinState(pin_state) => match pin_state.pin_state {
                PinState::None | PinState::PinOk => {
                    self.peer_pin_done = true;
                    self.pin_complete();
                }
                PinState::Optional => {
                    // Optional means the peer does not insist on a PIN.
                    self.set_state(SmeState::PinOptional);
                    self.peer_pin_done = true;
                    self.pin_complete();
                }
                PinState::Required => {
                    // PIN verification is not supported; refuse entry to
                    // the data phase.
                    self.set_state(SmeState::PinRequired);
                    self.send_frame(&ShipFrame::PinError(ConnectionPinError {
                        error: pin_error::WRONG_PIN,
                    }));
                    self.set_state(SmeState::PinError);
                    self.abort(Some("pin required by peer"));
                }
            },
            ShipFrame::PinInput(_) => {
                // We advertised `none`; there is no PIN to check input
                // against.
                self.set_state(SmeState::PinError);
                self.send_frame(&ShipFrame::PinError(ConnectionPinError {
                    error: pin_error::WRONG_PIN,
                }));
                self.abort(Some("unexpected pin input"));
            }
            ShipFrame::PinError(err) => {
                self.set_state(SmeState::PinError);
                self.abort(Some(&format!("peer pin error {}", err.error)));
            }
            _ => self.abort(Some("expected pin state")),
        }
    }

    fn pin_complete(&mut self) {
        self.timers.pin.stop();
        self.set_state(SmeState::PinNone);
        self.enter_access_methods();
    }

    // --- Access methods ----------------------------------------------------

    fn enter_access_methods(&mut self) {
        self.set_state(SmeState::AccessMethodsExchange);
        self.send_frame(&ShipFrame::AccessMethodsRequest);
        self.timers.handshake.start(T_HANDSHAKE, false);
    }

    fn on_access_methods_frame(&mut self, frame: &ShipFrame) {
        match frame {
            ShipFrame::AccessMethodsRequest => {
                self.send_frame(&ShipFrame::AccessMethods(AccessMethods {
                    id: self.local_ship_id.clone(),
                    dns_sd_mdns: false,
                    dns_uri: None,
                }));
                self.sent_access_methods = true;
                self.maybe_complete();
            }
            ShipFrame::AccessMethods(access_methods) => {
                self.node_reader
                    .on_ship_id_update(&self.ski, &access_methods.id);
                self.received_access_methods = true;
                self.maybe_complete();
            }
            _ => self.abort(Some("expected access methods")),
        }
    }

    fn maybe_complete(&mut self) {
        if self.sent_access_methods && self.received_access_methods {
            self.timers.handshake.stop();
            self.enter_complete();
        }
    }

    fn enter_complete(&mut self) {
        info!(ski = %self.ski, "ship connection established");
        self.set_state(SmeState::Complete);
        self.reached_data_phase = true;
        self.node_reader.on_remote_ski_connected(&self.ski);
        let writer = Arc::new(ShipDataWriter::new(self.write_tx.clone()));
        self.data_reader = Some(self.node_reader.setup_remote_device(&self.ski, writer));
    }

    // --- Data phase --------------------------------------------------------

    fn on_data_frame(&mut self, frame: &ShipFrame) {
        match frame {
            ShipFrame::Data(data) => {
                if data.protocol_id != eebus_wire::ship::PROTOCOL_ID {
                    self.abort(Some("unknown protocol id"));
                    return;
                }
                if let Some(reader) = &self.data_reader {
                    reader.data_received(data.payload.clone());
                }
            }
            _ => self.abort(Some("unexpected frame in data phase")),
        }
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

/// Run one connection to completion.
///
/// Returns once the SME reaches `Closed` or the transport goes away.
pub(crate) async fn run(
    transport: ShipTransport,
    mut sme: Sme,
    mut event_rx: mpsc::UnboundedReceiver<ConnEvent>,
    mut write_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let (tx, mut rx) = transport.into_split();

    sme.start();

    while sme.state() != SmeState::Closed {
        // Ship queued outbound frames before waiting for the next event.
        while let Ok(frame) = write_rx.try_recv() {
            if !tx.send(frame).await {
                sme.on_transport_gone();
                break;
            }
        }
        if sme.state() == SmeState::Closed {
            break;
        }

        tokio::select! {
            inbound = rx.recv() => match inbound {
                Some(bytes) => sme.handle_frame(&bytes),
                None => sme.on_transport_gone(),
            },
            event = event_rx.recv() => match event {
                Some(event) => sme.handle_event(event),
                None => sme.on_transport_gone(),
            },
            outbound = write_rx.recv() => {
                if let Some(frame) = outbound {
                    if !tx.send(frame).await {
                        sme.on_transport_gone();
                    }
                }
            }
        }
    }

    // Flush whatever the close path queued (close announce/confirm).
    while let Ok(frame) = write_rx.try_recv() {
        if !tx.send(frame).await {
            break;
        }
    }

    rx.close();
    sme.finish();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::pair;
    use serde_json::Value;
    use std::sync::Mutex;

    struct RecordingReader {
        states: Mutex<Vec<SmeState>>,
        connected: Mutex<Vec<String>>,
        disconnected: Mutex<Vec<String>>,
        payloads: Arc<Mutex<Vec<Value>>>,
        allow_waiting: bool,
    }

    impl RecordingReader {
        fn new(allow_waiting: bool) -> Arc<Self> {
            Arc::new(RecordingReader {
                states: Mutex::new(Vec::new()),
                connected: Mutex::new(Vec::new()),
                disconnected: Mutex::new(Vec::new()),
                payloads: Arc::new(Mutex::new(Vec::new())),
                allow_waiting,
            })
        }

        fn last_state(&self) -> Option<SmeState> {
            self.states.lock().unwrap().last().copied()
        }
    }

    struct PayloadSink(Arc<Mutex<Vec<Value>>>);

    impl DataReader for PayloadSink {
        fn data_received(&self, payload: Value) {
            self.0.lock().unwrap().push(payload);
        }
    }

    impl ShipNodeReader for RecordingReader {
        fn on_remote_ski_connected(&self, ski: &str) {
            self.connected.lock().unwrap().push(ski.to_owned());
        }

        fn on_remote_ski_disconnected(&self, ski: &str) {
            self.disconnected.lock().unwrap().push(ski.to_owned());
        }

        fn setup_remote_device(
            &self,
            _ski: &str,
            _writer: Arc<dyn crate::api::DataWriter>,
        ) -> Arc<dyn DataReader> {
            Arc::new(PayloadSink(Arc::clone(&self.payloads)))
        }

        fn on_ship_id_update(&self, _ski: &str, _ship_id: &str) {}

        fn on_state_update(&self, _ski: &str, state: SmeState) {
            self.states.lock().unwrap().push(state);
        }

        fn is_waiting_for_trust_allowed(&self, _ski: &str) -> bool {
            self.allow_waiting
        }
    }

    fn spawn_sme(
        role: ShipRole,
        transport: ShipTransport,
        trusted: bool,
        reader: Arc<RecordingReader>,
    ) -> (
        mpsc::UnboundedSender<ConnEvent>,
        tokio::task::JoinHandle<()>,
    ) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let sme = Sme::new(
            role,
            "ski-peer".into(),
            "ship-id-local".into(),
            trusted,
            reader,
            write_tx,
            &event_tx,
        );
        let handle = tokio::spawn(run(transport, sme, event_rx, write_rx));
        (event_tx, handle)
    }

    #[tokio::test]
    async fn full_handshake_reaches_data_phase() {
        let (server_side, client_side) = pair(16);
        let server_reader = RecordingReader::new(true);
        let client_reader = RecordingReader::new(true);

        let (_server_events, server_task) = spawn_sme(
            ShipRole::Server,
            server_side,
            true,
            Arc::clone(&server_reader),
        );
        let (client_events, client_task) = spawn_sme(
            ShipRole::Client,
            client_side,
            true,
            Arc::clone(&client_reader),
        );

        // Let both SMEs run the exchange to completion.
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if server_reader.connected.lock().unwrap().len() == 1
                    && client_reader.connected.lock().unwrap().len() == 1
                {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("handshake should complete");

        assert_eq!(server_reader.last_state(), Some(SmeState::Complete));
        assert_eq!(client_reader.last_state(), Some(SmeState::Complete));

        // Clean close from the client side.
        client_events.send(ConnEvent::CloseRequest).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(5), client_task).await;
        let _ = tokio::time::timeout(Duration::from_secs(5), server_task).await;

        assert_eq!(server_reader.disconnected.lock().unwrap().len(), 1);
        assert_eq!(client_reader.disconnected.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cmi_mismatch_closes_with_reason() {
        let (server_side, peer) = pair(16);
        let reader = RecordingReader::new(true);
        let (_events, task) = spawn_sme(ShipRole::Server, server_side, true, Arc::clone(&reader));

        let (peer_tx, mut peer_rx) = peer.into_split();
        assert!(peer_tx.send(b"\x04{\"cmi\":2}".to_vec()).await);

        let frame = peer_rx.recv().await.expect("close frame");
        let decoded = ShipFrame::decode(&frame).unwrap();
        match decoded {
            ShipFrame::Close(close) => {
                assert_eq!(close.phase, eebus_wire::ship::ClosePhase::Announce);
                assert_eq!(close.reason.as_deref(), Some("CMI mismatch"));
            }
            other => panic!("expected close, got {other:?}"),
        }

        let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        assert_eq!(reader.last_state(), Some(SmeState::Closed));
    }

    #[tokio::test]
    async fn hello_abort_from_peer_closes_connection() {
        let (client_side, peer) = pair(16);
        let reader = RecordingReader::new(true);
        let (_events, task) = spawn_sme(ShipRole::Client, client_side, true, Arc::clone(&reader));

        let (peer_tx, mut peer_rx) = peer.into_split();

        // Client sends CMI; echo it back to move it into hello.
        let cmi = peer_rx.recv().await.expect("client cmi");
        assert_eq!(cmi, b"\x04{\"cmi\":1}");
        assert!(peer_tx.send(b"\x04{\"cmi\":1}".to_vec()).await);

        // Client sends hello ready; answer with aborted.
        let hello = peer_rx.recv().await.expect("client hello");
        assert!(matches!(
            ShipFrame::decode(&hello).unwrap(),
            ShipFrame::Hello(_)
        ));
        assert!(
            peer_tx
                .send(b"\x01{\"connectionHello\":[{\"phase\":\"aborted\"}]}".to_vec())
                .await
        );

        // Expect hello aborted mirror + close announce, in some order.
        let mut saw_close = false;
        while let Some(frame) = peer_rx.recv().await {
            if let Ok(ShipFrame::Close(close)) = ShipFrame::decode(&frame) {
                assert_eq!(close.phase, eebus_wire::ship::ClosePhase::Announce);
                saw_close = true;
                break;
            }
        }
        assert!(saw_close, "expected a close announce");

        let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        assert_eq!(reader.last_state(), Some(SmeState::Closed));
    }

    #[tokio::test]
    async fn handshake_version_mismatch_sends_selection_mismatch() {
        let (server_side, peer) = pair(16);
        let reader = RecordingReader::new(true);
        let (_events, task) = spawn_sme(ShipRole::Server, server_side, true, Arc::clone(&reader));

        let (peer_tx, mut peer_rx) = peer.into_split();

        assert!(peer_tx.send(b"\x04{\"cmi\":1}".to_vec()).await);
        let _server_cmi = peer_rx.recv().await.expect("server cmi");
        let _server_hello = peer_rx.recv().await.expect("server hello");
        assert!(
            peer_tx
                .send(b"\x01{\"connectionHello\":[{\"phase\":\"ready\"}]}".to_vec())
                .await
        );

        // Server announces max; reply with an unacceptable version.
        let announce = peer_rx.recv().await.expect("announce");
        assert!(matches!(
            ShipFrame::decode(&announce).unwrap(),
            ShipFrame::ProtocolHandshake(_)
        ));
        let bad_select = b"\x01{\"messageProtocolHandshake\":[{\"handshakeType\":\"select\"},{\"version\":[{\"major\":2},{\"minor\":0}]},{\"formats\":[{\"format\":[\"JSON-UTF8\"]}]}]}";
        assert!(peer_tx.send(bad_select.to_vec()).await);

        let error = peer_rx.recv().await.expect("handshake error");
        assert_eq!(
            ShipFrame::decode(&error).unwrap(),
            ShipFrame::ProtocolHandshakeError(MessageProtocolHandshakeError {
                error: handshake_error::SELECTION_MISMATCH
            })
        );

        let close = peer_rx.recv().await.expect("close");
        assert!(matches!(
            ShipFrame::decode(&close).unwrap(),
            ShipFrame::Close(_)
        ));

        let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        assert_eq!(reader.last_state(), Some(SmeState::Closed));
    }

    #[tokio::test]
    async fn untrusted_peer_waits_until_trust_granted() {
        let (server_side, client_side) = pair(16);
        let server_reader = RecordingReader::new(true);
        let client_reader = RecordingReader::new(true);

        let (server_events, _server_task) = spawn_sme(
            ShipRole::Server,
            server_side,
            false,
            Arc::clone(&server_reader),
        );
        let (_client_events, _client_task) = spawn_sme(
            ShipRole::Client,
            client_side,
            true,
            Arc::clone(&client_reader),
        );

        // The server sits in pending; grant trust shortly after.
        tokio::time::sleep(Duration::from_millis(50)).await;
        server_events.send(ConnEvent::Trust).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if server_reader.connected.lock().unwrap().len() == 1 {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("trust grant should unblock the handshake");
    }

    #[tokio::test]
    async fn untrusted_peer_without_waiting_is_aborted() {
        let (server_side, peer) = pair(16);
        let reader = RecordingReader::new(false);
        let (_events, task) = spawn_sme(ShipRole::Server, server_side, false, Arc::clone(&reader));

        let (peer_tx, mut peer_rx) = peer.into_split();
        assert!(peer_tx.send(b"\x04{\"cmi\":1}".to_vec()).await);

        let mut saw_aborted = false;
        while let Some(frame) = peer_rx.recv().await {
            match ShipFrame::decode(&frame) {
                Ok(ShipFrame::Hello(hello)) if hello.phase == HelloPhase::Aborted => {
                    saw_aborted = true;
                }
                Ok(ShipFrame::Close(_)) => break,
                _ => {}
            }
        }
        assert!(saw_aborted, "expected hello aborted");

        let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        assert!(reader.connected.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pin_required_peer_is_refused() {
        let (server_side, peer) = pair(16);
        let reader = RecordingReader::new(true);
        let (_events, task) = spawn_sme(ShipRole::Server, server_side, true, Arc::clone(&reader));

        let (peer_tx, mut peer_rx) = peer.into_split();
        assert!(peer_tx.send(b"\x04{\"cmi\":1}".to_vec()).await);
        let _cmi = peer_rx.recv().await.unwrap();
        let _hello = peer_rx.recv().await.unwrap();
        assert!(
            peer_tx
                .send(b"\x01{\"connectionHello\":[{\"phase\":\"ready\"}]}".to_vec())
                .await
        );
        let _announce = peer_rx.recv().await.unwrap();
        let select = b"\x01{\"messageProtocolHandshake\":[{\"handshakeType\":\"select\"},{\"version\":[{\"major\":1},{\"minor\":0}]},{\"formats\":[{\"format\":[\"JSON-UTF8\"]}]}]}";
        assert!(peer_tx.send(select.to_vec()).await);

        let _pin_state = peer_rx.recv().await.unwrap();
        assert!(
            peer_tx
                .send(b"\x01{\"connectionPinState\":[{\"pinState\":\"required\"}]}".to_vec())
                .await
        );

        let mut saw_pin_error = false;
        while let Some(frame) = peer_rx.recv().await {
            match ShipFrame::decode(&frame) {
                Ok(ShipFrame::PinError(err)) => {
                    assert_eq!(err.error, pin_error::WRONG_PIN);
                    saw_pin_error = true;
                }
                Ok(ShipFrame::Close(_)) => break,
                _ => {}
            }
        }
        assert!(saw_pin_error, "expected connectionPinError");

        let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        assert!(reader.connected.lock().unwrap().is_empty());
    }
}
