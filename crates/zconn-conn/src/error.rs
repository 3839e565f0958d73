use std::io::ErrorKind;
use std::time::Duration;

use zconn_frame::FrameError;
use zconn_transport::{TransportError, TransportKind};

/// Errors that can occur on a connection or server.
#[derive(Debug, thiserror::Error)]
pub enum ConnError {
    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// I/O error outside the framing layer.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation kept timing out until the retry bound was hit.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The connection is closing or closed.
    #[error("connection closed")]
    Closed,

    /// Settings no connection could run with.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A descriptor was submitted without a required field.
    #[error("invalid payload: {0}")]
    InvalidPayload(&'static str),

    /// No worker strategy exists for this transport kind.
    #[error("{0} transport is not supported")]
    Unsupported(TransportKind),

    /// Returned by a handler to end its connection on purpose.
    #[error("connection killed by handler")]
    KillConn,

    /// Any other handler failure.
    #[error("handler error: {0}")]
    Handler(String),
}

impl ConnError {
    /// Whether this error only means a deadline passed.
    ///
    /// I/O errors of kind `TimedOut` or `WouldBlock` count, whether they
    /// come straight from the stream or through the framing layer.
    pub fn is_timeout(&self) -> bool {
        match self {
            ConnError::Timeout(_) => true,
            ConnError::Io(err) | ConnError::Frame(FrameError::Io(err)) => is_timeout_kind(err.kind()),
            ConnError::Transport(TransportError::Io(err)) => is_timeout_kind(err.kind()),
            _ => false,
        }
    }

    /// Whether the peer went away, as opposed to a protocol or local fault.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ConnError::Frame(FrameError::ConnectionClosed) => true,
            ConnError::Io(err) | ConnError::Frame(FrameError::Io(err)) => matches!(
                err.kind(),
                ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

fn is_timeout_kind(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

pub type Result<T> = std::result::Result<T, ConnError>;

/// Alias used in handler signatures.
pub type ConnResult<T> = Result<T>;
