use std::fs;

use zconn_conn::{ConnConfig, ConnResult, ZConn};
use zconn_frame::Marker;

use crate::cmd::{connect, parse_duration, runtime, SendArgs};
use crate::exit::{conn_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let payload = resolve_payload(&args)?;
    // A reply that misses the first deadline is reported, not retried.
    let config = ConnConfig::default()
        .with_read_timeout(wait_timeout)
        .with_max_timeout_retries(Some(0));

    runtime()?.block_on(async move {
        let conn = connect(&args.endpoint, config).await?;
        let result = exchange(&conn, &payload, args.wait).await;
        conn.close().await;

        match result {
            Ok(Some(reply)) => print_frame(&reply, conn.id(), conn.remote_addr(), format),
            Ok(None) => {}
            Err(err) => return Err(conn_error("send failed", err)),
        }
        Ok(SUCCESS)
    })
}

/// What `send` puts on the wire.
#[derive(Debug, PartialEq, Eq)]
enum Outgoing {
    Frame(Vec<u8>),
    Marker(Marker),
}

async fn exchange(conn: &ZConn, payload: &Outgoing, wait: bool) -> ConnResult<Option<Vec<u8>>> {
    match payload {
        Outgoing::Frame(bytes) => conn.send(bytes).await?,
        Outgoing::Marker(marker) => conn.send_marker(marker).await?,
    }
    if !wait {
        return Ok(None);
    }
    let reply = match payload {
        Outgoing::Frame(_) => conn.recv().await?.to_vec(),
        Outgoing::Marker(_) => conn.recv_marker().await?.line().to_vec(),
    };
    Ok(Some(reply))
}

fn resolve_payload(args: &SendArgs) -> CliResult<Outgoing> {
    let body = if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        json.as_bytes().to_vec()
    } else if let Some(data) = &args.data {
        data.as_bytes().to_vec()
    } else if let Some(path) = &args.file {
        fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        })?
    } else {
        Vec::new()
    };

    match &args.header {
        Some(header) => {
            let marker = Marker::data(header.clone(), body)
                .map_err(|err| CliError::new(USAGE, format!("--header rejected: {err}")))?;
            Ok(Outgoing::Marker(marker))
        }
        None => Ok(Outgoing::Frame(body)),
    }
}

#[cfg(test)]
mod tests {
    use zconn_transport::Endpoint;

    use super::*;

    fn args() -> SendArgs {
        SendArgs {
            endpoint: Endpoint::Tcp("127.0.0.1:7000".parse().unwrap()),
            json: None,
            data: None,
            file: None,
            header: None,
            wait: false,
            wait_timeout: "5s".to_string(),
        }
    }

    #[test]
    fn missing_payload_sends_empty_frame() {
        assert_eq!(resolve_payload(&args()).unwrap(), Outgoing::Frame(Vec::new()));
    }

    #[test]
    fn invalid_json_is_usage_error() {
        let mut a = args();
        a.json = Some("{not json".to_string());
        assert_eq!(resolve_payload(&a).unwrap_err().code, USAGE);
    }

    #[test]
    fn header_wraps_payload_in_dx_marker() {
        let mut a = args();
        a.data = Some("body".to_string());
        a.header = Some("job-7".to_string());
        let Outgoing::Marker(marker) = resolve_payload(&a).unwrap() else {
            panic!("expected a marker");
        };
        assert_eq!(marker.to_bytes().as_ref(), b"DX job-7 body\r\n\r\n");
    }

    #[test]
    fn header_with_space_is_rejected() {
        let mut a = args();
        a.data = Some("body".to_string());
        a.header = Some("two words".to_string());
        assert_eq!(resolve_payload(&a).unwrap_err().code, USAGE);
    }

    #[test]
    fn file_payload_is_read() {
        let dir = tempfile::tempdir().expect("tempdir should be creatable");
        let path = dir.path().join("payload.bin");
        fs::write(&path, b"line\r\nbreak").expect("payload file should be writable");
        let mut a = args();
        a.file = Some(path);
        assert_eq!(
            resolve_payload(&a).unwrap(),
            Outgoing::Frame(b"line\r\nbreak".to_vec())
        );
    }
}
