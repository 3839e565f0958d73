use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn, Instrument};
use zconn_transport::{is_transient_accept_error, ConnAddr, Listener, TransportError};

use crate::config::ConnConfig;
use crate::conn::ZConn;
use crate::error::{ConnError, ConnResult, Result};

const MIN_ACCEPT_BACKOFF: Duration = Duration::from_millis(5);
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Application logic run once per accepted connection.
///
/// Returning `Err(ConnError::KillConn)` ends the connection without
/// affecting the server. A peer disconnect, or `ConnError::Closed` after
/// the server was shut down, is a normal exit. Any other error stops the
/// whole server.
pub trait ConnHandler: Send + Sync + 'static {
    fn serve_conn(
        &self,
        token: CancellationToken,
        conn: ZConn,
    ) -> impl Future<Output = ConnResult<()>> + Send;
}

impl<F, Fut> ConnHandler for F
where
    F: Fn(CancellationToken, ZConn) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ConnResult<()>> + Send,
{
    fn serve_conn(
        &self,
        token: CancellationToken,
        conn: ZConn,
    ) -> impl Future<Output = ConnResult<()>> + Send {
        self(token, conn)
    }
}

struct Shared<H> {
    handler: H,
    config: ConnConfig,
    token: CancellationToken,
    tracker: TaskTracker,
    first_error: Mutex<Option<ConnError>>,
}

impl<H> Shared<H> {
    fn record(&self, err: ConnError) {
        let mut slot = self.first_error.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }
}

/// Accept loop handing each connection to a [`ConnHandler`].
pub struct Server<L, H> {
    listener: Mutex<Option<L>>,
    local_addr: ConnAddr,
    shared: Arc<Shared<H>>,
}

impl<L: Listener, H: ConnHandler> Server<L, H> {
    pub fn new(listener: L, handler: H, config: ConnConfig) -> Result<Self> {
        config.validate()?;
        let local_addr = listener.local_addr();
        Ok(Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
            shared: Arc::new(Shared {
                handler,
                config,
                token: CancellationToken::new(),
                tracker: TaskTracker::new(),
                first_error: Mutex::new(None),
            }),
        })
    }

    /// Start the accept loop in the background. Only the first call has
    /// an effect.
    pub fn serve(&self) {
        let Some(listener) = self.listener.lock().take() else {
            debug!(addr = %self.local_addr, "server already started");
            return;
        };
        info!(addr = %self.local_addr, "server listening");
        let shared = Arc::clone(&self.shared);
        self.shared.tracker.spawn(accept_loop(listener, shared));
    }

    /// Stop accepting and cancel every connection.
    pub fn shutdown(&self) {
        self.shared.token.cancel();
    }

    /// Wait for the accept loop and every connection task, then return
    /// the first error recorded, if any.
    pub async fn wait(&self) -> Result<()> {
        self.shared.tracker.close();
        self.shared.tracker.wait().await;
        match self.shared.first_error.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn local_addr(&self) -> &ConnAddr {
        &self.local_addr
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.token.clone()
    }
}

async fn accept_loop<L: Listener, H: ConnHandler>(mut listener: L, shared: Arc<Shared<H>>) {
    let mut backoff = MIN_ACCEPT_BACKOFF;
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shared.token.cancelled() => break,
            res = listener.accept() => res,
        };

        match accepted {
            Ok(stream) => {
                backoff = MIN_ACCEPT_BACKOFF;
                let conn = match ZConn::with_parent(stream, shared.config.clone(), &shared.token) {
                    Ok(conn) => conn,
                    Err(err) => {
                        error!(error = %err, "failed to start connection");
                        shared.record(err);
                        shared.token.cancel();
                        break;
                    }
                };
                let span = tracing::info_span!("handler", conn = %conn.id(), peer = %conn.remote_addr());
                shared
                    .tracker
                    .spawn(run_handler(conn, Arc::clone(&shared)).instrument(span));
            }
            Err(err) if is_transient_accept_error(&err) => {
                warn!(
                    error = %err,
                    backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    "transient accept error"
                );
                tokio::select! {
                    biased;
                    _ = shared.token.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_ACCEPT_BACKOFF);
            }
            Err(err) => {
                error!(error = %err, "accept failed");
                shared.record(ConnError::Transport(TransportError::Accept(err)));
                shared.token.cancel();
                break;
            }
        }
    }

    drop(listener);
    debug!("accept loop stopped");
}

async fn run_handler<H: ConnHandler>(conn: ZConn, shared: Arc<Shared<H>>) {
    let closer = conn.closer();
    let token = conn.cancellation_token();
    debug!("connection accepted");

    let result = shared.handler.serve_conn(token, conn).await;
    closer.close().await;

    match result {
        Ok(()) => debug!("connection finished"),
        Err(ConnError::KillConn) => {
            debug!("connection killed by handler");
            shared.record(ConnError::KillConn);
        }
        Err(ConnError::Closed) if shared.token.is_cancelled() => {
            debug!("connection closed by server shutdown");
        }
        Err(err) if err.is_disconnect() => {
            debug!(error = %err, "peer disconnected");
        }
        Err(err) => {
            error!(error = %err, "handler failed, stopping server");
            shared.record(err);
            shared.token.cancel();
        }
    }
}
