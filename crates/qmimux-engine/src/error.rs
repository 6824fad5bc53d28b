use std::time::Duration;

/// Errors that can occur in the multiplexing engine.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Wire-level encode/decode error.
    #[error("frame error: {0}")]
    Frame(#[from] qmimux_frame::FrameError),

    /// No matching control reply arrived before the deadline (or the
    /// mismatch budget ran out first).
    #[error("control request timed out after {0:?}")]
    Timeout(Duration),

    /// The session already has a client id; allocate may run at most once.
    #[error("session already bound to a client id")]
    AlreadyBound,

    /// The operation needs a bound client id and the session has none.
    #[error("session not bound to a client id")]
    NotBound,

    /// The session was destroyed, or the engine shut down after a channel
    /// failure.
    #[error("session closed")]
    Closed,

    /// Channel I/O error.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The control service answered with a non-zero status TLV.
    #[error("control request rejected (result {result}, error {error})")]
    ControlFailure { result: u16, error: u16 },

    /// A control reply decoded as a frame but its TLV block was missing or
    /// too short for the expected reply fields.
    #[error("malformed control reply: {0}")]
    MalformedReply(#[source] qmimux_frame::FrameError),
}

pub type Result<T> = std::result::Result<T, MuxError>;
