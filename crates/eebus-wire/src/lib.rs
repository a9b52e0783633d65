// eebus-wire: the byte-level contract of the stack.
//
// SHIP frames (message-type byte + JSON-UTF8 value) and SPINE datagrams
// share one encoding deviation from plain JSON: a "sequence" (ordered,
// labelled fields) is written as an array of single-key objects so field
// order survives the trip. The helpers in `value` implement that shape
// once; every message type builds on them.

pub mod ship;
pub mod spine;
pub mod value;

pub use eebus_runtime::EebusError;
