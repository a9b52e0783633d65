// eebus-runtime: scheduling and signalling primitives shared by the SHIP and
// SPINE layers.
//
// Everything here is deliberately small: a bounded queue with timed
// send/receive and close semantics, a single-shot/auto-reload timer whose
// callback is only ever allowed to post a message somewhere, an in-process
// event hub, and the error taxonomy used across the workspace.

mod error;
pub mod events;
pub mod queue;
pub mod timer;

pub use error::EebusError;
pub use events::{EventHub, ListenerHandle};
pub use queue::{Deadline, QueueReceiver, QueueSender, queue};
pub use timer::{Timer, TimerState};
