/// Error kinds shared by every crate in the workspace.
///
/// Handlers map wire-level failures onto these kinds; whether an error is
/// reported back to the peer (as a SPINE result) or only logged is decided
/// at the call site, not here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EebusError {
    /// Malformed input that is present but unusable.
    #[error("invalid argument: {0}")]
    InputArgument(String),
    /// A required field is missing.
    #[error("missing required field: {0}")]
    InputArgumentNull(String),
    /// Enum or integer outside the accepted range; unknown addressee.
    #[error("out of range: {0}")]
    InputArgumentOutOfRange(String),
    /// Resource exhaustion while building up state.
    #[error("resource allocation failed: {0}")]
    Memory(String),
    /// One-time initialization failed.
    #[error("initialization failed: {0}")]
    Init(String),
    /// A worker task could not be started.
    #[error("worker start failed: {0}")]
    Thread(String),
    /// A time source misbehaved.
    #[error("time source failure: {0}")]
    Time(String),
    /// A timed wait expired.
    #[error("wait expired")]
    Timeout,
    /// The operation was a no-op: already in the desired state, the peer is
    /// unknown, or the channel was closed.
    #[error("no change")]
    NoChange,
    /// Unsupported command classifier or function type.
    #[error("not implemented: {0}")]
    NotImplemented(String),
    /// Wire bytes could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),
}
