// eebus-spine: the data-model and command layer.
//
// A `DeviceLocal` owns the local entity/feature tree, one mirror per
// connected peer, the subscription and binding managers, and a single
// worker task that routes every inbound datagram. All mutation happens
// either on that worker or through API methods that take the device lock;
// sending never holds it.

pub mod binding;
pub mod device;
pub mod entity;
pub mod events;
pub mod feature;
pub mod function;
pub mod heartbeat;
pub mod node_management;
pub mod pending;
pub mod sender;
pub mod subscription;

pub use device::{DeviceInfo, DeviceLocal, EntitySpec, FeatureSpec};
pub use events::{DeviceEventHub, ElementChange, EventPayload, EventType};
pub use feature::{ResponseMessage, ResponseResult, WriteRequest};
pub use sender::Sender;
