#![cfg(all(unix, feature = "cli"))]

use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn zconn() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_zconn"));
    cmd.arg("--log-level").arg("error");
    cmd
}

fn spawn_server(endpoint: &str, extra: &[&str]) -> Child {
    zconn()
        .arg("--format")
        .arg("json")
        .arg("serve")
        .arg(endpoint)
        .args(extra)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("serve command should start")
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let start = Instant::now();
    while !path.exists() {
        if start.elapsed() >= timeout {
            panic!("socket {} never appeared", path.display());
        }
        thread::sleep(Duration::from_millis(20));
    }
}

fn wait_for_tcp(addr: &str, timeout: Duration) {
    let start = Instant::now();
    loop {
        if TcpStream::connect(addr).is_ok() {
            return;
        }
        if start.elapsed() >= timeout {
            panic!("server at {addr} never accepted");
        }
        thread::sleep(Duration::from_millis(20));
    }
}

fn free_tcp_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("ephemeral port should bind");
    let addr = listener.local_addr().expect("listener should have an address");
    addr.to_string()
}

fn wait_with_deadline(mut child: Child, timeout: Duration) -> Output {
    let start = Instant::now();
    loop {
        if child
            .try_wait()
            .expect("child status should be readable")
            .is_some()
        {
            return child.wait_with_output().expect("child output should be readable");
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            panic!("child did not exit within {timeout:?}");
        }
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn version_prints_name_and_version() {
    let output = zconn().arg("version").output().expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("zconn {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn extended_version_reports_framing_defaults() {
    let output = zconn()
        .arg("version")
        .arg("--extended")
        .output()
        .expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("name: zconn"));
    assert!(stdout.contains("escape: /&"));
}

#[test]
fn echo_round_trip_over_unix_socket() {
    let dir = tempfile::tempdir().expect("tempdir should be creatable");
    let sock = dir.path().join("echo.sock");
    let endpoint = format!("unix://{}", sock.display());

    let server = spawn_server(&endpoint, &["--echo", "--count", "1"]);
    wait_for_socket(&sock, Duration::from_secs(5));

    let output = zconn()
        .arg("--format")
        .arg("json")
        .arg("send")
        .arg(&endpoint)
        .arg("--data")
        .arg("hello\r\nworld")
        .arg("--wait")
        .output()
        .expect("send should run");
    assert!(
        output.status.success(),
        "send failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let reply: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("reply should be JSON");
    assert_eq!(reply["payload"], "hello\r\nworld");
    assert_eq!(reply["size"], 12);

    let served = wait_with_deadline(server, Duration::from_secs(5));
    assert!(served.status.success());
    let printed: serde_json::Value =
        serde_json::from_slice(&served.stdout).expect("served frame should be JSON");
    assert_eq!(printed["payload"], "hello\r\nworld");
    assert!(printed["conn"]
        .as_str()
        .is_some_and(|id| id.starts_with("conn-")));
}

#[test]
fn echo_round_trip_over_tcp_with_marker() {
    let addr = free_tcp_addr();
    let endpoint = format!("tcp://{addr}");

    let server = spawn_server(&endpoint, &["--echo", "--count", "1"]);
    wait_for_tcp(&addr, Duration::from_secs(5));

    let output = zconn()
        .arg("--format")
        .arg("json")
        .arg("send")
        .arg(&endpoint)
        .arg("--json")
        .arg("{\"op\":\"ping\"}")
        .arg("--header")
        .arg("job-1")
        .arg("--wait")
        .output()
        .expect("send should run");
    assert!(
        output.status.success(),
        "send failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let reply: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("reply should be JSON");
    assert_eq!(reply["marker"]["kind"], "data");
    assert_eq!(reply["marker"]["header"], "job-1");

    let served = wait_with_deadline(server, Duration::from_secs(5));
    assert!(served.status.success());
}

#[test]
fn wait_without_reply_times_out_with_124() {
    let dir = tempfile::tempdir().expect("tempdir should be creatable");
    let sock = dir.path().join("silent.sock");
    let endpoint = format!("unix://{}", sock.display());

    let mut server = spawn_server(&endpoint, &[]);
    wait_for_socket(&sock, Duration::from_secs(5));

    let output = zconn()
        .arg("send")
        .arg(&endpoint)
        .arg("--data")
        .arg("anyone?")
        .arg("--wait")
        .arg("--wait-timeout")
        .arg("200ms")
        .output()
        .expect("send should run");
    assert_eq!(output.status.code(), Some(124));

    let _ = server.kill();
    let _ = server.wait();
}

#[test]
fn connect_to_missing_socket_is_transport_error() {
    let dir = tempfile::tempdir().expect("tempdir should be creatable");
    let sock = dir.path().join("missing.sock");

    let output = zconn()
        .arg("send")
        .arg(format!("unix://{}", sock.display()))
        .arg("--data")
        .arg("x")
        .output()
        .expect("send should run");
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("connect failed"));
}

#[test]
fn bad_duration_is_usage_error() {
    let output = zconn()
        .arg("send")
        .arg("127.0.0.1:9")
        .arg("--wait-timeout")
        .arg("soon")
        .output()
        .expect("send should run");
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn malformed_endpoint_is_rejected_by_parser() {
    let output = zconn()
        .arg("serve")
        .arg("nowhere")
        .output()
        .expect("serve should run");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid endpoint"));
}
