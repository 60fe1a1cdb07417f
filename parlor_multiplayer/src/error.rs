// Error taxonomy for session hosting and joining.
//
// This enum covers what API calls can actually return. Per-connection faults
// during normal operation (malformed frames, transport errors, heartbeat
// silence) are handled inside the server and client loops and surface as
// `SessionEvent`s, not as `Error` values — a remote client's failure must
// never become a host-side `Err`.

use std::io;

use thiserror::Error;

use parlor_protocol::{FrameError, RejectReason};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The listening endpoint could not be bound. Fatal to hosting.
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    /// The registry's configured concurrent-session limit is reached.
    #[error("session table is full ({max} active)")]
    CapacityExceeded { max: usize },

    /// The host refused the join (or the display name failed local checks).
    #[error("join rejected: {0}")]
    JoinRejected(RejectReason),

    /// Inbound bytes did not decode as a frame this build speaks.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The peer sent a variant it may not send.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The operation requires an Open connection.
    #[error("not connected")]
    NotConnected,

    /// The peer closed the connection before the exchange completed.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// `connect` exhausted its deadline waiting for the host's verdict.
    #[error("connect timed out")]
    ConnectTimeout,

    /// The session was ended; this handle is defunct.
    #[error("session is closed")]
    SessionClosed,

    /// Transport failure.
    #[error("network i/o: {0}")]
    Io(#[from] io::Error),
}

impl From<FrameError> for Error {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(io) => Error::Io(io),
            FrameError::Closed => Error::ConnectionClosed,
            other => Error::MalformedFrame(other.to_string()),
        }
    }
}
