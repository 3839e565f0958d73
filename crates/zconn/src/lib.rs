//! Async framed connections over raw byte streams.
//!
//! zconn turns a TCP, Unix-socket, or in-memory stream into a
//! queue-driven connection: frames are delimited by `\r\n` with an escape
//! sequence for payload bytes that collide with it, every operation runs
//! under an adaptive deadline, and a server supervises one connection per
//! accepted stream.
//!
//! # Crate Structure
//!
//! - [`transport`]: raw streams, listeners, addresses
//! - [`frame`]: delimiter/escape framing, async reader and writer, codec
//! - [`conn`]: `ZConn`, payload descriptors and pool, timeout policies, `Server`
//!
//! ```no_run
//! use zconn::conn::{ConnConfig, ZConn};
//! use zconn::transport::TcpAcceptor;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let stream = TcpAcceptor::connect("127.0.0.1:7000").await?;
//! let conn = ZConn::new(stream, ConnConfig::default())?;
//! conn.send("hello-world").await?;
//! let reply = conn.recv().await?;
//! conn.close().await;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

/// Re-export transport types.
pub mod transport {
    pub use zconn_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use zconn_frame::*;
}

/// Re-export connection and server types.
pub mod conn {
    pub use zconn_conn::*;
}
