//! Raw stream and listener abstraction.
//!
//! This is the lowest layer of zconn. It knows nothing about framing; it
//! only provides:
//! - [`RawStream`]: an async duplex byte stream that reports its
//!   [`TransportKind`] and addresses explicitly
//! - [`Listener`]: something that accepts raw streams (TCP, Unix sockets)
//! - [`Endpoint`]: `tcp://` / `unix://` addressing used by the CLI

pub mod endpoint;
pub mod error;
pub mod tcp;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use endpoint::Endpoint;
pub use error::{Result, TransportError};
pub use tcp::TcpAcceptor;
pub use traits::{is_transient_accept_error, ConnAddr, Listener, RawStream, TransportKind};

#[cfg(unix)]
pub use uds::UnixAcceptor;
