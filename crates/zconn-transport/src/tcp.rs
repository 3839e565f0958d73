use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{ConnAddr, Listener};

/// TCP listener producing [`TcpStream`]s.
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
    addr: SocketAddr,
}

impl TcpAcceptor {
    /// Bind and listen on `addr`. Port 0 picks an ephemeral port.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::BindTcp { addr, source })?;
        let addr = listener.local_addr()?;
        info!(%addr, "listening on tcp");
        Ok(Self { listener, addr })
    }

    /// Wrap an already bound tokio listener.
    pub fn from_listener(listener: TcpListener) -> Result<Self> {
        let addr = listener.local_addr()?;
        Ok(Self { listener, addr })
    }

    /// Connect to a listening TCP endpoint.
    pub async fn connect(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<TcpStream> {
        let endpoint = addr.to_string();
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Connect {
                endpoint: endpoint.clone(),
                source,
            })?;
        // Frames are flushed explicitly; do not let Nagle hold back a frame tail.
        stream.set_nodelay(true)?;
        debug!(%endpoint, "connected over tcp");
        Ok(stream)
    }

    /// The bound address (with the resolved port).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Listener for TcpAcceptor {
    type Stream = TcpStream;

    async fn accept(&mut self) -> std::io::Result<TcpStream> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        debug!(%peer, "accepted tcp connection");
        Ok(stream)
    }

    fn local_addr(&self) -> ConnAddr {
        ConnAddr::Tcp(self.addr)
    }
}
