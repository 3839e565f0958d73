//! Queue-driven framed connections.
//!
//! A [`ZConn`] owns a raw stream and runs one read loop and one write loop
//! over it. Callers submit [`Payload`] descriptors to either queue and
//! wait on the matching [`PayloadReceipt`]. Each operation runs under a
//! deadline computed by a [`TimeoutPolicy`]; timeouts are retried in
//! place, any other failure closes the connection.
//!
//! [`Server`] accepts raw streams from a [`Listener`](zconn_transport::Listener)
//! and hands one `ZConn` per stream to a [`ConnHandler`].

pub mod config;
pub mod conn;
pub mod error;
pub mod payload;
pub mod server;
pub mod timeout;
pub mod worker;

pub use config::{
    Clock, ConnConfig, DEFAULT_MAX_TIMEOUT_RETRIES, DEFAULT_QUEUE_CAPACITY, DEFAULT_TIMEOUT,
};
pub use conn::{ConnId, OpQueue, ZConn};
pub use error::{ConnError, ConnResult, Result};
pub use payload::{DataStream, Payload, PayloadPool, PayloadReceipt, DEFAULT_POOL_CAPACITY};
pub use server::{ConnHandler, Server};
pub use timeout::TimeoutPolicy;
pub use worker::Worker;
