use std::sync::atomic::{AtomicUsize, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zconn_conn::{ConnConfig, ConnError, ConnHandler, ConnResult, Server, TimeoutPolicy, ZConn};
use zconn_frame::{FrameError, Marker};
use zconn_transport::{Endpoint, Listener, TcpAcceptor};

use crate::cmd::{parse_duration, runtime, ServeArgs};
use crate::exit::{conn_error, io_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let config = conn_config(&args)?;
    runtime()?.block_on(async move {
        match &args.endpoint {
            Endpoint::Tcp(addr) => {
                let listener = TcpAcceptor::bind(*addr)
                    .await
                    .map_err(|err| transport_error("bind failed", err))?;
                serve_on(listener, &args, config, format).await
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let listener = zconn_transport::UnixAcceptor::bind(path)
                    .map_err(|err| transport_error("bind failed", err))?;
                serve_on(listener, &args, config, format).await
            }
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(crate::exit::CliError::new(
                crate::exit::USAGE,
                "unix endpoints are not supported on this platform",
            )),
        }
    })
}

fn conn_config(args: &ServeArgs) -> CliResult<ConnConfig> {
    let read_timeout = parse_duration(&args.read_timeout)?;
    let write_timeout = parse_duration(&args.write_timeout)?;
    let mut config = ConnConfig::default()
        .with_read_timeout(read_timeout)
        .with_write_timeout(write_timeout);
    if let Some(factor) = args.backoff {
        let cap = read_timeout.max(write_timeout) * 8;
        config = config
            .with_read_policy(TimeoutPolicy::backoff(factor, cap))
            .with_write_policy(TimeoutPolicy::backoff(factor, cap));
    }
    if args.max_retries.is_some() {
        config = config.with_max_timeout_retries(args.max_retries);
    }
    Ok(config)
}

async fn serve_on<L: Listener>(
    listener: L,
    args: &ServeArgs,
    config: ConnConfig,
    format: OutputFormat,
) -> CliResult<i32> {
    let done = CancellationToken::new();
    let handler = PrintHandler {
        echo: args.echo,
        limit: args.count,
        seen: AtomicUsize::new(0),
        done: done.clone(),
        format,
    };
    let server =
        Server::new(listener, handler, config).map_err(|err| conn_error("serve failed", err))?;
    let server_token = server.cancellation_token();
    server.serve();
    eprintln!("listening on {}", server.local_addr());

    let signal = tokio::select! {
        _ = done.cancelled() => {
            debug!("frame count reached");
            Ok(())
        }
        _ = server_token.cancelled() => Ok(()),
        res = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            res
        }
    };

    server.shutdown();
    let result = server.wait().await;
    signal.map_err(|err| io_error("signal handler setup failed", err))?;
    result.map_err(|err| conn_error("server failed", err))?;
    Ok(SUCCESS)
}

struct PrintHandler {
    echo: bool,
    limit: Option<usize>,
    seen: AtomicUsize,
    done: CancellationToken,
    format: OutputFormat,
}

impl ConnHandler for PrintHandler {
    async fn serve_conn(&self, token: CancellationToken, conn: ZConn) -> ConnResult<()> {
        loop {
            let frame = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                res = conn.recv() => res,
            };
            let frame = match frame {
                Ok(frame) => frame,
                Err(err) if err.is_timeout() => {
                    warn!(error = %err, "idle connection dropped");
                    return Ok(());
                }
                Err(err) => return Err(err),
            };

            print_frame(&frame, conn.id(), conn.remote_addr(), self.format);
            // a control line is closed by an empty frame
            if let Ok(marker) = Marker::decode(&frame) {
                if !conn.recv().await?.is_empty() {
                    return Err(ConnError::Frame(FrameError::InvalidMarker(
                        "control line is not followed by a blank line".to_string(),
                    )));
                }
                if self.echo {
                    conn.send_marker(&marker).await?;
                }
            } else if self.echo {
                conn.send(&frame[..]).await?;
            }

            if let Some(limit) = self.limit {
                if self.seen.fetch_add(1, Ordering::SeqCst) + 1 >= limit {
                    self.done.cancel();
                    return Ok(());
                }
            }
        }
    }
}
