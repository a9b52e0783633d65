// eebus: an embedded EEBUS home-energy interoperability stack.
//
// Two wire protocols over a mutually-authenticated transport: SHIP drives
// connection handshake, trust and lifecycle; SPINE exposes the
// device → entity → feature → function data model with read / reply /
// notify / write / call / result commands, mediated by subscriptions and
// bindings.
//
// The crates compose bottom-up:
//   eebus-runtime  queue, timer, event hub, error taxonomy
//   eebus-wire     SHIP frames, SPINE datagrams, the ordered-JSON codec
//   eebus-ship     SME connection state machine and the SHIP node
//   eebus-spine    local device, remote mirrors, routing, node management
//
// This crate adds the service facade wiring a SHIP node and a SPINE
// device together. mDNS discovery, certificate handling and the concrete
// TLS/WebSocket transport stay with the embedder; transports are injected
// through `eebus_ship::ShipTransport`.

pub mod service;

pub use eebus_runtime::EebusError;
pub use eebus_ship::{ShipNode, ShipNodeConfig, ShipRole, ShipTransport, SmeState, transport};
pub use eebus_spine::{
    DeviceEventHub, DeviceInfo, DeviceLocal, ElementChange, EntitySpec, EventPayload, EventType,
    FeatureSpec, ResponseMessage, ResponseResult, WriteRequest,
};
pub use eebus_wire::{ship, spine};
pub use service::{EebusService, ServiceConfig, ServiceReader};
