use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use zconn_conn::{ConnConfig, ZConn};
use zconn_transport::{Endpoint, TcpAcceptor};

use crate::exit::{conn_error, io_error, transport_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept connections and print every frame received.
    Serve(ServeArgs),
    /// Send a single frame.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Endpoint to bind: tcp://host:port, host:port, or unix:///path.
    pub endpoint: Endpoint,
    /// Write every received frame back to its sender.
    #[arg(long)]
    pub echo: bool,
    /// Exit after receiving N frames across all connections.
    #[arg(long)]
    pub count: Option<usize>,
    /// Per-attempt read timeout (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s")]
    pub read_timeout: String,
    /// Per-attempt write timeout (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s")]
    pub write_timeout: String,
    /// Multiply the timeout by FACTOR after each expired attempt.
    #[arg(long, value_name = "FACTOR")]
    pub backoff: Option<u32>,
    /// Expired attempts allowed before an operation fails.
    #[arg(long)]
    pub max_retries: Option<u32>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Endpoint to connect to: tcp://host:port, host:port, or unix:///path.
    pub endpoint: Endpoint,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Wrap the payload in a DX marker with this header.
    #[arg(long)]
    pub header: Option<String>,
    /// Wait for one response frame and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the response when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))
}

pub(crate) async fn connect(endpoint: &Endpoint, config: ConnConfig) -> CliResult<ZConn> {
    match endpoint {
        Endpoint::Tcp(addr) => {
            let stream = TcpAcceptor::connect(*addr)
                .await
                .map_err(|err| transport_error("connect failed", err))?;
            ZConn::new(stream, config).map_err(|err| conn_error("connect failed", err))
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let stream = zconn_transport::UnixAcceptor::connect(path)
                .await
                .map_err(|err| transport_error("connect failed", err))?;
            ZConn::new(stream, config).map_err(|err| conn_error("connect failed", err))
        }
        #[cfg(not(unix))]
        Endpoint::Unix(_) => Err(CliError::new(
            USAGE,
            "unix endpoints are not supported on this platform",
        )),
    }
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert_eq!(parse_duration("0s").unwrap_err().code, USAGE);
        assert_eq!(parse_duration("bad").unwrap_err().code, USAGE);
        assert_eq!(parse_duration("  ").unwrap_err().code, USAGE);
    }
}
