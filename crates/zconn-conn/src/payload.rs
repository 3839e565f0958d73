//! Operation descriptors and their pool.
//!
//! A [`Payload`] carries the data of one read or write operation together
//! with the signals the connection loop fires when the operation finishes.
//! The submitting side keeps the matching [`PayloadReceipt`].

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::oneshot;
use zconn_transport::ConnAddr;

use crate::error::{ConnError, Result};

/// Idle payloads kept by a pool by default.
pub const DEFAULT_POOL_CAPACITY: usize = 1024;

/// In-memory byte stream: the source of a write and the sink of a read.
///
/// Reading consumes bytes from the front. Once closed, the stream rejects
/// writes but can still be drained.
#[derive(Debug, Default)]
pub struct DataStream {
    buf: BytesMut,
    closed: bool,
}

impl DataStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes, failing with `BrokenPipe` once closed.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "data stream is closed"));
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Take every unread byte.
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Drop the contents and reopen, keeping the allocation.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.closed = false;
    }

    pub(crate) fn sink(&mut self) -> io::Result<&mut BytesMut> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "data stream is closed"));
        }
        Ok(&mut self.buf)
    }
}

impl From<&[u8]> for DataStream {
    fn from(bytes: &[u8]) -> Self {
        Self {
            buf: BytesMut::from(bytes),
            closed: false,
        }
    }
}

impl AsyncRead for DataStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let n = self.buf.len().min(buf.remaining());
        buf.put_slice(&self.buf[..n]);
        self.buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for DataStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(self.write_bytes(buf).map(|()| buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.close();
        Poll::Ready(Ok(()))
    }
}

/// Descriptor for one read or write operation.
///
/// On success the loop sends the payload itself back through the
/// completion signal; on failure it sends the error through the error
/// signal. Exactly one of the two fires per submission.
#[derive(Default)]
pub struct Payload {
    data: Option<DataStream>,
    done: Option<oneshot::Sender<Payload>>,
    error: Option<oneshot::Sender<ConnError>>,
    addr: Option<oneshot::Sender<ConnAddr>>,
}

impl Payload {
    /// A payload with fresh signals and an empty data stream.
    pub fn new() -> (Self, PayloadReceipt) {
        let mut payload = Self {
            data: Some(DataStream::new()),
            ..Self::default()
        };
        let receipt = payload.reset();
        (payload, receipt)
    }

    /// Reinitialise the signals and return the matching receipt. Data is
    /// left as is.
    pub fn reset(&mut self) -> PayloadReceipt {
        self.arm(false)
    }

    /// Like [`reset`](Self::reset), also wiring the remote-address signal.
    pub fn reset_with_addr(&mut self) -> PayloadReceipt {
        self.arm(true)
    }

    fn arm(&mut self, with_addr: bool) -> PayloadReceipt {
        let (done_tx, done_rx) = oneshot::channel();
        let (error_tx, error_rx) = oneshot::channel();
        self.done = Some(done_tx);
        self.error = Some(error_tx);

        let addr = if with_addr {
            let (addr_tx, addr_rx) = oneshot::channel();
            self.addr = Some(addr_tx);
            Some(addr_rx)
        } else {
            self.addr = None;
            None
        };

        PayloadReceipt {
            done: done_rx,
            error: error_rx,
            addr,
        }
    }

    /// Drop every field.
    pub fn clear(&mut self) {
        self.data = None;
        self.done = None;
        self.error = None;
        self.addr = None;
    }

    /// Check that the payload can be submitted.
    pub fn verify(&self) -> Result<()> {
        if self.data.is_none() {
            return Err(ConnError::InvalidPayload("missing data stream"));
        }
        if self.done.is_none() {
            return Err(ConnError::InvalidPayload("missing completion signal"));
        }
        if self.error.is_none() {
            return Err(ConnError::InvalidPayload("missing error signal"));
        }
        Ok(())
    }

    pub fn data(&self) -> Option<&DataStream> {
        self.data.as_ref()
    }

    pub fn data_mut(&mut self) -> Result<&mut DataStream> {
        self.data
            .as_mut()
            .ok_or(ConnError::InvalidPayload("missing data stream"))
    }

    pub fn set_data(&mut self, data: DataStream) {
        self.data = Some(data);
    }

    pub fn take_data(&mut self) -> Option<DataStream> {
        self.data.take()
    }

    pub(crate) fn deliver_addr(&mut self, addr: &ConnAddr) {
        if let Some(tx) = self.addr.take() {
            let _ = tx.send(addr.clone());
        }
    }

    pub(crate) fn complete(mut self) {
        self.addr = None;
        if let Some(done) = self.done.take() {
            let _ = done.send(self);
        }
    }

    pub(crate) fn fail(mut self, err: ConnError) {
        if let Some(error) = self.error.take() {
            let _ = error.send(err);
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("data", &self.data)
            .field("armed", &self.done.is_some())
            .field("wants_addr", &self.addr.is_some())
            .finish()
    }
}

/// Caller side of a payload's signals.
#[derive(Debug)]
pub struct PayloadReceipt {
    done: oneshot::Receiver<Payload>,
    error: oneshot::Receiver<ConnError>,
    addr: Option<oneshot::Receiver<ConnAddr>>,
}

enum Signal {
    Done(std::result::Result<Payload, oneshot::error::RecvError>),
    Error(std::result::Result<ConnError, oneshot::error::RecvError>),
}

impl PayloadReceipt {
    /// Wait for the operation to finish.
    ///
    /// Returns the payload on success, the operation's error on failure,
    /// or `ConnError::Closed` if the payload was dropped without being
    /// served.
    pub async fn wait(mut self) -> Result<Payload> {
        let signal = tokio::select! {
            biased;
            res = &mut self.done => Signal::Done(res),
            res = &mut self.error => Signal::Error(res),
        };

        match signal {
            Signal::Done(Ok(payload)) => Ok(payload),
            Signal::Done(Err(_)) => match self.error.await {
                Ok(err) => Err(err),
                Err(_) => Err(ConnError::Closed),
            },
            Signal::Error(Ok(err)) => Err(err),
            Signal::Error(Err(_)) => self.done.await.map_err(|_| ConnError::Closed),
        }
    }

    /// Remote address of the connection that served the payload, if the
    /// payload asked for it.
    pub async fn remote_addr(&mut self) -> Option<ConnAddr> {
        let rx = self.addr.as_mut()?;
        let addr = rx.await.ok();
        self.addr = None;
        addr
    }
}

/// Free list of payloads.
///
/// Cloning the pool is cheap; clones share the same free list.
#[derive(Clone)]
pub struct PayloadPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    free: Mutex<Vec<Payload>>,
    capacity: usize,
}

impl PayloadPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                capacity,
            }),
        }
    }

    /// The process-wide default pool.
    pub fn global() -> &'static PayloadPool {
        static GLOBAL: OnceLock<PayloadPool> = OnceLock::new();
        GLOBAL.get_or_init(|| PayloadPool::new(DEFAULT_POOL_CAPACITY))
    }

    /// Take a payload with fresh signals and an empty, open data stream.
    pub fn acquire(&self) -> (Payload, PayloadReceipt) {
        let mut payload = self.take();
        let receipt = payload.reset();
        (payload, receipt)
    }

    /// Like [`acquire`](Self::acquire), also asking for the remote address.
    pub fn acquire_with_addr(&self) -> (Payload, PayloadReceipt) {
        let mut payload = self.take();
        let receipt = payload.reset_with_addr();
        (payload, receipt)
    }

    fn take(&self) -> Payload {
        let mut payload = self.inner.free.lock().pop().unwrap_or_default();
        match payload.data.as_mut() {
            Some(data) => data.reset(),
            None => payload.data = Some(DataStream::new()),
        }
        payload
    }

    /// Clear a payload and keep it for reuse.
    ///
    /// The data stream's allocation survives; its contents do not.
    pub fn release(&self, mut payload: Payload) {
        let data = payload.take_data().map(|mut data| {
            data.reset();
            data
        });
        payload.clear();
        payload.data = data;

        let mut free = self.inner.free.lock();
        if free.len() < self.inner.capacity {
            free.push(payload);
        }
    }

    /// Number of payloads waiting in the free list.
    pub fn idle(&self) -> usize {
        self.inner.free.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl Default for PayloadPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

impl fmt::Debug for PayloadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadPool")
            .field("idle", &self.idle())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}
