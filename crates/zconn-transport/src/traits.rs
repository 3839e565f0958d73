use std::fmt;
use std::future::Future;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;

/// Delivery semantics of a raw stream.
///
/// The connection layer picks its worker strategy from this tag once, at
/// construction, instead of inspecting the concrete stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Reliable, ordered byte stream (TCP, Unix stream sockets, pipes).
    Stream,
    /// Unreliable, connectionless datagrams.
    Datagram,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stream => f.write_str("stream"),
            TransportKind::Datagram => f.write_str("datagram"),
        }
    }
}

/// Address of one end of a raw stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnAddr {
    Tcp(SocketAddr),
    /// Unix socket path; `None` for unnamed (client-side or socketpair) ends.
    Unix(Option<PathBuf>),
    /// In-process stream with no network address.
    Memory,
}

impl fmt::Display for ConnAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnAddr::Tcp(addr) => write!(f, "tcp://{addr}"),
            ConnAddr::Unix(Some(path)) => write!(f, "unix://{}", path.display()),
            ConnAddr::Unix(None) => f.write_str("unix://(unnamed)"),
            ConnAddr::Memory => f.write_str("memory"),
        }
    }
}

/// A connected raw duplex stream.
///
/// Implementations must be safe to split into independent read and write
/// halves; the connection layer drives each half from its own task.
pub trait RawStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Delivery semantics of this stream.
    fn transport_kind(&self) -> TransportKind;

    /// Local address, or [`ConnAddr::Memory`] when there is none.
    fn local_addr(&self) -> ConnAddr;

    /// Remote address, or [`ConnAddr::Memory`] when there is none.
    fn peer_addr(&self) -> ConnAddr;
}

impl RawStream for TcpStream {
    fn transport_kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    fn local_addr(&self) -> ConnAddr {
        TcpStream::local_addr(self)
            .map(ConnAddr::Tcp)
            .unwrap_or(ConnAddr::Memory)
    }

    fn peer_addr(&self) -> ConnAddr {
        TcpStream::peer_addr(self)
            .map(ConnAddr::Tcp)
            .unwrap_or(ConnAddr::Memory)
    }
}

#[cfg(unix)]
impl RawStream for tokio::net::UnixStream {
    fn transport_kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    fn local_addr(&self) -> ConnAddr {
        unix_addr(tokio::net::UnixStream::local_addr(self).ok())
    }

    fn peer_addr(&self) -> ConnAddr {
        unix_addr(tokio::net::UnixStream::peer_addr(self).ok())
    }
}

#[cfg(unix)]
fn unix_addr(addr: Option<tokio::net::unix::SocketAddr>) -> ConnAddr {
    ConnAddr::Unix(addr.and_then(|a| a.as_pathname().map(|p| p.to_path_buf())))
}

impl RawStream for DuplexStream {
    fn transport_kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    fn local_addr(&self) -> ConnAddr {
        ConnAddr::Memory
    }

    fn peer_addr(&self) -> ConnAddr {
        ConnAddr::Memory
    }
}

/// Accepts raw streams. Dropping the listener closes it.
pub trait Listener: Send + 'static {
    type Stream: RawStream;

    /// Wait for the next incoming stream.
    fn accept(&mut self) -> impl Future<Output = std::io::Result<Self::Stream>> + Send;

    /// Address the listener is bound to.
    fn local_addr(&self) -> ConnAddr;
}

/// Returns true if an `accept()` failure only affected one pending
/// connection (or was a momentary resource shortage) and accepting
/// should continue.
pub fn is_transient_accept_error(err: &std::io::Error) -> bool {
    if matches!(
        err.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
    ) {
        return true;
    }

    // EMFILE / ENFILE / ENOBUFS / ENOMEM: out of descriptors or buffers, retry after backoff.
    #[cfg(target_os = "linux")]
    if let Some(code) = err.raw_os_error() {
        return matches!(code, 23 | 24 | 105 | 12);
    }

    false
}
