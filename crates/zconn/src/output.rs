use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use zconn_conn::ConnId;
use zconn_frame::Marker;
use zconn_transport::ConnAddr;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum MarkerOutput {
    Next { len: u64 },
    Data { header: String },
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    conn: String,
    peer: String,
    size: usize,
    payload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    marker: Option<MarkerOutput>,
    timestamp: &'a str,
}

pub fn print_frame(frame: &[u8], conn: ConnId, peer: &ConnAddr, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let timestamp = now_unix_seconds();
            let out = FrameOutput {
                conn: conn.to_string(),
                peer: peer.to_string(),
                size: frame.len(),
                payload: payload_preview(frame),
                marker: describe_marker(frame),
                timestamp: &timestamp,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let marker = match describe_marker(frame) {
                Some(MarkerOutput::Next { len }) => format!("NX {len}"),
                Some(MarkerOutput::Data { header }) => format!("DX {header}"),
                None => "-".to_string(),
            };
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CONN", "PEER", "SIZE", "MARKER", "PAYLOAD"])
                .add_row(vec![
                    conn.to_string(),
                    peer.to_string(),
                    frame.len().to_string(),
                    marker,
                    payload_preview(frame),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "conn={} peer={} size={} payload={}",
                conn,
                peer,
                frame.len(),
                payload_preview(frame)
            );
        }
        OutputFormat::Raw => {
            print_raw(frame);
            print_raw(b"\n");
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn describe_marker(frame: &[u8]) -> Option<MarkerOutput> {
    match Marker::decode(frame).ok()? {
        Marker::Next { len } => Some(MarkerOutput::Next { len }),
        Marker::Data { header, .. } => Some(MarkerOutput::Data {
            header: String::from_utf8_lossy(&header).into_owned(),
        }),
    }
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
