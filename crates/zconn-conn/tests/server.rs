use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use zconn_conn::{ConnConfig, ConnError, ConnHandler, ConnResult, Server, ZConn};
use zconn_transport::{ConnAddr, TcpAcceptor};

/// Echoes every frame back; `quit` ends the connection with `KillConn`.
struct Echo {
    served: AtomicUsize,
}

impl ConnHandler for Echo {
    async fn serve_conn(&self, _token: CancellationToken, conn: ZConn) -> ConnResult<()> {
        loop {
            let frame = conn.recv().await?;
            if frame.as_ref() == b"quit" {
                return Err(ConnError::KillConn);
            }
            conn.send(&frame).await?;
            self.served.fetch_add(1, Ordering::SeqCst);
        }
    }
}

async fn echo_server() -> (Server<TcpAcceptor, Echo>, SocketAddr) {
    let acceptor = TcpAcceptor::bind("127.0.0.1:0".parse().unwrap())
        .await
        .expect("bind should succeed");
    let addr = acceptor.addr();
    let server = Server::new(
        acceptor,
        Echo {
            served: AtomicUsize::new(0),
        },
        ConnConfig::default(),
    )
    .expect("server should build");
    server.serve();
    (server, addr)
}

async fn client(addr: SocketAddr) -> ZConn {
    let stream = TcpAcceptor::connect(addr).await.expect("connect should succeed");
    ZConn::new(stream, ConnConfig::default()).expect("client conn should start")
}

#[tokio::test]
async fn echo_roundtrip_over_tcp() {
    let (server, addr) = echo_server().await;
    assert_eq!(server.local_addr(), &ConnAddr::Tcp(addr));

    let conn = client(addr).await;
    for msg in ["one", "two\r\nlines", "/&"] {
        conn.send(msg).await.unwrap();
        assert_eq!(conn.recv().await.unwrap().as_ref(), msg.as_bytes());
    }
    conn.close().await;

    server.shutdown();
    assert!(server.wait().await.is_ok());
}

#[tokio::test]
async fn kill_conn_is_reported_while_other_connections_continue() {
    let (server, addr) = echo_server().await;

    let doomed = client(addr).await;
    let survivor = client(addr).await;

    survivor.send("before").await.unwrap();
    assert_eq!(survivor.recv().await.unwrap().as_ref(), b"before");

    doomed.send("quit").await.unwrap();
    let err = doomed.recv().await.unwrap_err();
    assert!(err.is_disconnect(), "unexpected error: {err}");

    survivor.send("after").await.unwrap();
    assert_eq!(survivor.recv().await.unwrap().as_ref(), b"after");
    assert!(!server.cancellation_token().is_cancelled());

    server.shutdown();
    let err = server.wait().await.unwrap_err();
    assert!(matches!(err, ConnError::KillConn));
}

#[tokio::test]
async fn handler_failure_stops_server() {
    let acceptor = TcpAcceptor::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = acceptor.addr();
    let server = Server::new(
        acceptor,
        |_token: CancellationToken, conn: ZConn| async move {
            let frame = conn.recv().await?;
            Err::<(), _>(ConnError::Handler(format!("rejected {} bytes", frame.len())))
        },
        ConnConfig::default(),
    )
    .unwrap();
    server.serve();

    let conn = client(addr).await;
    conn.send("bad").await.unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), server.wait())
        .await
        .expect("server should stop on its own")
        .unwrap_err();
    assert!(matches!(err, ConnError::Handler(msg) if msg == "rejected 3 bytes"));
}

#[tokio::test]
async fn shutdown_closes_idle_connections() {
    let (server, addr) = echo_server().await;
    let conn = client(addr).await;
    conn.send("warmup").await.unwrap();
    conn.recv().await.unwrap();

    server.shutdown();
    tokio::time::timeout(Duration::from_secs(5), server.wait())
        .await
        .expect("shutdown should finish")
        .expect("shutdown is not an error");

    let err = conn.recv().await.unwrap_err();
    assert!(err.is_disconnect());
}

#[tokio::test]
async fn handler_token_follows_server() {
    let acceptor = TcpAcceptor::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = acceptor.addr();
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_in_handler = Arc::clone(&seen);
    let server = Server::new(
        acceptor,
        move |token: CancellationToken, conn: ZConn| {
            let seen = Arc::clone(&seen_in_handler);
            async move {
                let _conn = conn;
                token.cancelled().await;
                seen.fetch_add(1, Ordering::SeqCst);
                ConnResult::Ok(())
            }
        },
        ConnConfig::default(),
    )
    .unwrap();
    server.serve();

    let _conn = client(addr).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    server.shutdown();
    server.wait().await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn echo_roundtrip_over_unix_socket() {
    use zconn_transport::UnixAcceptor;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("echo.sock");
    let acceptor = UnixAcceptor::bind(&path).expect("bind should succeed");
    let server = Server::new(
        acceptor,
        Echo {
            served: AtomicUsize::new(0),
        },
        ConnConfig::default(),
    )
    .unwrap();
    server.serve();

    let stream = UnixAcceptor::connect(&path).await.unwrap();
    let conn = ZConn::new(stream, ConnConfig::default()).unwrap();
    conn.send("over uds").await.unwrap();
    assert_eq!(conn.recv().await.unwrap().as_ref(), b"over uds");
    conn.close().await;

    server.shutdown();
    server.wait().await.unwrap();
}
