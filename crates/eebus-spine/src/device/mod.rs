//! The SPINE node: the local device, its worker, and one mirror per peer.

mod local;
mod remote;
pub(crate) mod state;

pub use local::{DeviceInfo, DeviceLocal, DeviceMessage, EntitySpec, FeatureSpec};
pub use remote::DeviceRemote;
