// eebus-ship: the connection and trust layer.
//
// One `ShipConnection` drives a single peer from CMI exchange through
// hello/trust, protocol handshake, PIN and access methods into the data
// phase. The `ShipNode` owns every connection and the SKI trust registry.
// The TLS/WebSocket realization stays outside; transports are channel
// pairs the embedder bridges into its socket of choice.

pub mod api;
pub mod connection;
pub mod node;
pub mod transport;

pub use api::{DataReader, DataWriter, ShipDataWriter, ShipNodeReader};
pub use connection::{ShipRole, SmeState};
pub use node::{ShipNode, ShipNodeConfig};
pub use transport::ShipTransport;
