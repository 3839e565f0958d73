use std::net::SocketAddr;
use std::path::PathBuf;

/// Errors that can occur while binding, accepting, or connecting raw streams.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind a TCP listener.
    #[error("failed to bind to {addr}: {source}")]
    BindTcp {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to bind a Unix domain socket listener.
    #[error("failed to bind to {path}: {source}")]
    BindUnix {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the specified endpoint.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The endpoint string could not be parsed.
    #[error("invalid endpoint '{0}' (expected tcp://host:port or unix:///path)")]
    InvalidEndpoint(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
