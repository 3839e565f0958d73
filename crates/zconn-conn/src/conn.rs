use std::fmt;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, trace, warn, Instrument};
use zconn_frame::{DelimitedReader, DelimitedWriter, FrameError, Marker};
use zconn_transport::{ConnAddr, RawStream, TransportKind};

use crate::config::{Clock, ConnConfig};
use crate::error::{ConnError, Result};
use crate::payload::{Payload, PayloadPool};
use crate::timeout::TimeoutPolicy;
use crate::worker::Worker;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl ConnId {
    fn next() -> Self {
        Self(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Submission side of one direction's operation queue.
#[derive(Debug)]
pub struct OpQueue {
    tx: mpsc::Sender<Payload>,
    token: CancellationToken,
}

impl OpQueue {
    /// Verify `payload` and queue it, waiting for room if the queue is
    /// full.
    ///
    /// Operations on one queue are served in submission order. Once this
    /// returns `Ok`, the payload's receipt resolves exactly once.
    pub async fn submit(&self, payload: Payload) -> Result<()> {
        payload.verify()?;
        if self.token.is_cancelled() {
            return Err(ConnError::Closed);
        }
        self.tx.send(payload).await.map_err(|_| ConnError::Closed)
    }

    /// Like [`submit`](Self::submit), but fails with `Closed` instead of
    /// waiting when the queue is full.
    pub fn try_submit(&self, payload: Payload) -> Result<()> {
        payload.verify()?;
        if self.token.is_cancelled() {
            return Err(ConnError::Closed);
        }
        self.tx.try_send(payload).map_err(|_| ConnError::Closed)
    }
}

/// Stops a connection's loops and waits for them.
#[derive(Debug, Clone)]
pub(crate) struct Closer {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl Closer {
    pub(crate) async fn close(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// A framed connection driven by two independent loops.
///
/// The read loop serves the read queue and the write loop serves the write
/// queue, each owning one half of the raw stream. A terminal error in
/// either loop cancels both. Dropping the connection cancels it as well;
/// use [`close`](Self::close) to also wait for the loops to exit.
pub struct ZConn {
    id: ConnId,
    kind: TransportKind,
    local: ConnAddr,
    remote: ConnAddr,
    read_queue: OpQueue,
    write_queue: OpQueue,
    pool: PayloadPool,
    closer: Closer,
}

impl ZConn {
    /// Take ownership of `stream` and start both loops on the current
    /// Tokio runtime.
    pub fn new<S: RawStream>(stream: S, config: ConnConfig) -> Result<Self> {
        Self::spawn(stream, config, CancellationToken::new())
    }

    /// Like [`new`](Self::new), with the connection's cancellation token
    /// derived from `parent`.
    pub fn with_parent<S: RawStream>(
        stream: S,
        config: ConnConfig,
        parent: &CancellationToken,
    ) -> Result<Self> {
        Self::spawn(stream, config, parent.child_token())
    }

    fn spawn<S: RawStream>(stream: S, config: ConnConfig, token: CancellationToken) -> Result<Self> {
        config.validate()?;

        let id = ConnId::next();
        let kind = stream.transport_kind();
        let local = stream.local_addr();
        let remote = stream.peer_addr();
        let worker = Worker::for_kind(kind);
        let tracker = TaskTracker::new();

        let (read_half, write_half) = tokio::io::split(stream);
        let (read_tx, read_rx) = mpsc::channel(config.queue_capacity);
        let (write_tx, write_rx) = mpsc::channel(config.queue_capacity);

        let span = tracing::debug_span!("zconn", conn = %id, peer = %remote);

        let read_loop = OpLoop {
            half: Reading(DelimitedReader::with_config(read_half, config.frame.clone())),
            rx: read_rx,
            worker,
            remote: remote.clone(),
            default_timeout: config.read_timeout,
            last: config.read_timeout,
            policy: config.read_policy.clone(),
            max_retries: config.max_timeout_retries,
            clock: config.clock().clone(),
            token: token.clone(),
        };
        let write_loop = OpLoop {
            half: Writing(DelimitedWriter::with_config(write_half, config.frame.clone())),
            rx: write_rx,
            worker,
            remote: remote.clone(),
            default_timeout: config.write_timeout,
            last: config.write_timeout,
            policy: config.write_policy.clone(),
            max_retries: config.max_timeout_retries,
            clock: config.clock().clone(),
            token: token.clone(),
        };

        tracker.spawn(read_loop.run().instrument(span.clone()));
        tracker.spawn(write_loop.run().instrument(span));
        tracker.close();

        debug!(conn = %id, kind = %kind, local = %local, peer = %remote, "connection started");

        Ok(Self {
            id,
            kind,
            local,
            remote,
            read_queue: OpQueue {
                tx: read_tx,
                token: token.clone(),
            },
            write_queue: OpQueue {
                tx: write_tx,
                token: token.clone(),
            },
            pool: config.pool,
            closer: Closer { token, tracker },
        })
    }

    pub fn read_queue(&self) -> &OpQueue {
        &self.read_queue
    }

    pub fn write_queue(&self) -> &OpQueue {
        &self.write_queue
    }

    /// Write one frame and wait until it has been flushed.
    pub async fn send(&self, bytes: impl AsRef<[u8]>) -> Result<()> {
        let (mut payload, receipt) = self.pool.acquire();
        payload.data_mut()?.write_bytes(bytes.as_ref())?;
        self.write_queue.submit(payload).await?;
        let payload = receipt.wait().await?;
        self.pool.release(payload);
        Ok(())
    }

    /// Read one frame.
    pub async fn recv(&self) -> Result<Bytes> {
        let (payload, receipt) = self.pool.acquire();
        self.read_queue.submit(payload).await?;
        let mut payload = receipt.wait().await?;
        let frame = payload.data_mut()?.take();
        self.pool.release(payload);
        Ok(frame)
    }

    /// Write a marker as its control line followed by an empty frame.
    ///
    /// Both frames are queued before either receipt is awaited. A send
    /// from another task can still land between them.
    pub async fn send_marker(&self, marker: &Marker) -> Result<()> {
        let (mut line, line_receipt) = self.pool.acquire();
        line.data_mut()?.write_bytes(&marker.line())?;
        let (blank, blank_receipt) = self.pool.acquire();
        self.write_queue.submit(line).await?;
        self.write_queue.submit(blank).await?;

        let line = line_receipt.wait().await?;
        self.pool.release(line);
        let blank = blank_receipt.wait().await?;
        self.pool.release(blank);
        Ok(())
    }

    /// Read a control line and the empty frame that closes it.
    pub async fn recv_marker(&self) -> Result<Marker> {
        let line = self.recv().await?;
        let blank = self.recv().await?;
        if !blank.is_empty() {
            return Err(FrameError::InvalidMarker(
                "control line is not followed by a blank line".to_string(),
            )
            .into());
        }
        Ok(Marker::decode(&line)?)
    }

    /// Cancel both loops and wait for them to exit. Calling it again is a
    /// no-op.
    pub async fn close(&self) {
        self.closer.close().await;
    }

    pub(crate) fn closer(&self) -> Closer {
        self.closer.clone()
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.kind
    }

    pub fn local_addr(&self) -> &ConnAddr {
        &self.local
    }

    pub fn remote_addr(&self) -> &ConnAddr {
        &self.remote
    }

    /// Whether the connection has been cancelled.
    pub fn is_closed(&self) -> bool {
        self.closer.token.is_cancelled()
    }

    /// Token cancelled when the connection starts closing.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.closer.token.clone()
    }
}

impl Drop for ZConn {
    fn drop(&mut self) {
        self.closer.token.cancel();
    }
}

impl fmt::Debug for ZConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZConn")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// One direction of the codec, driven by an [`OpLoop`].
trait Half: Send + 'static {
    const DIRECTION: &'static str;

    fn attempt<'a>(
        &'a mut self,
        worker: Worker,
        payload: &'a mut Payload,
    ) -> impl Future<Output = Result<()>> + Send + 'a;
}

struct Reading<R>(DelimitedReader<R>);

impl<R> Half for Reading<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    const DIRECTION: &'static str = "read";

    fn attempt<'a>(
        &'a mut self,
        worker: Worker,
        payload: &'a mut Payload,
    ) -> impl Future<Output = Result<()>> + Send + 'a {
        worker.serve_read(&mut self.0, payload)
    }
}

struct Writing<W>(DelimitedWriter<W>);

impl<W> Half for Writing<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    const DIRECTION: &'static str = "write";

    fn attempt<'a>(
        &'a mut self,
        worker: Worker,
        payload: &'a mut Payload,
    ) -> impl Future<Output = Result<()>> + Send + 'a {
        async move {
            worker.serve_write(&mut self.0, payload).await?;
            let flushed = self.0.end().await?;
            trace!(bytes = flushed, "frame terminated");
            Ok(())
        }
    }
}

enum Attempt {
    Done,
    TimedOut,
    Failed(ConnError),
    Cancelled,
}

struct OpLoop<H> {
    half: H,
    rx: mpsc::Receiver<Payload>,
    worker: Worker,
    remote: ConnAddr,
    default_timeout: Duration,
    last: Duration,
    policy: TimeoutPolicy,
    max_retries: Option<u32>,
    clock: Clock,
    token: CancellationToken,
}

impl<H: Half> OpLoop<H> {
    async fn run(mut self) {
        debug!(direction = H::DIRECTION, "loop started");
        loop {
            let payload = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(payload) => payload,
                    None => break,
                },
            };
            if self.serve(payload).await.is_break() {
                self.token.cancel();
                break;
            }
        }

        self.rx.close();
        let mut dropped = 0usize;
        while let Some(payload) = self.rx.recv().await {
            payload.fail(ConnError::Closed);
            dropped += 1;
        }
        debug!(direction = H::DIRECTION, dropped, "loop stopped");
    }

    async fn serve(&mut self, mut payload: Payload) -> ControlFlow<()> {
        if let Err(err) = payload.verify() {
            error!(direction = H::DIRECTION, error = %err, "rejecting malformed payload");
            payload.fail(err);
            return ControlFlow::Break(());
        }
        payload.deliver_addr(&self.remote);

        let mut timeouts = 0u32;
        loop {
            let timeout = self.policy.apply(self.last);
            self.last = timeout;
            let deadline = (self.clock)() + timeout;

            let attempt = tokio::select! {
                biased;
                _ = self.token.cancelled() => Attempt::Cancelled,
                res = tokio::time::timeout_at(deadline, self.half.attempt(self.worker, &mut payload)) => {
                    match res {
                        Ok(Ok(())) => Attempt::Done,
                        Ok(Err(err)) if err.is_timeout() => Attempt::TimedOut,
                        Ok(Err(err)) => Attempt::Failed(err),
                        Err(_elapsed) => Attempt::TimedOut,
                    }
                }
            };

            match attempt {
                Attempt::Done => {
                    self.last = self.default_timeout;
                    payload.complete();
                    return ControlFlow::Continue(());
                }
                Attempt::Cancelled => {
                    payload.fail(ConnError::Closed);
                    return ControlFlow::Break(());
                }
                Attempt::Failed(err) => {
                    if err.is_disconnect() {
                        debug!(direction = H::DIRECTION, error = %err, "peer disconnected");
                    } else {
                        error!(direction = H::DIRECTION, error = %err, "operation failed");
                    }
                    payload.fail(err);
                    return ControlFlow::Break(());
                }
                Attempt::TimedOut => {
                    if self.max_retries.is_some_and(|max| timeouts >= max) {
                        error!(
                            direction = H::DIRECTION,
                            retries = timeouts,
                            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                            "operation kept timing out"
                        );
                        payload.fail(ConnError::Timeout(timeout));
                        return ControlFlow::Break(());
                    }
                    timeouts += 1;
                    warn!(
                        direction = H::DIRECTION,
                        attempt = timeouts,
                        timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        "operation timed out, retrying"
                    );
                }
            }
        }
    }
}
