//! Loopback end-to-end tests: a real client peer and server peer joined by
//! an in-memory duplex standing in for the tunnel transport, exercising the
//! full-stack scenarios from the testable-properties list — open/echo/close,
//! dial failure, target EOF, tunnel loss with live streams, and a zero-length
//! DATA frame as a legal no-op. Strict priority ordering and mid-flight
//! bandwidth changes are exercised at the scheduler unit-test level in
//! `src/proto/client/scheduler.rs`, where the exact frame sequence on the
//! wire is directly inspectable.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use muxtun_proto::{client, server, AddressFormat};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const TUNNEL_BUF: usize = 64 * 1024;

#[ctor::ctor]
fn init_test_logging() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init()
        .ok();
}

/// Spawn a client peer and a server peer joined by an in-memory duplex.
/// Returns the client handle; the server task runs in the background for
/// the lifetime of the test.
fn spawn_pair() -> client::ClientMux {
    let (client_half, server_half) = tokio::io::duplex(TUNNEL_BUF);
    let (client_rx, client_tx) = tokio::io::split(client_half);
    let (mux, _scheduler_handle, _reader_handle) =
        client::connect(client_rx, client_tx, AddressFormat::Ascii);
    tokio::spawn(async move {
        let server = server::ServerMux::new(AddressFormat::Ascii);
        let _ = server.run(server_half).await;
    });
    mux
}

#[tokio::test]
async fn open_echo_close() {
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_addr = target.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut sock, _) = target.accept().await.unwrap();
        let (mut rx, mut tx) = sock.split();
        let _ = tokio::io::copy(&mut rx, &mut tx).await;
    });

    let mux = spawn_pair();
    let mut stream = mux.open(7, &format!("127.0.0.1:{}", target_addr.port())).unwrap();

    stream.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    stream.shutdown().await.unwrap();
}

#[tokio::test]
async fn target_eof_closes_stream() {
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_addr = target.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut sock, _) = target.accept().await.unwrap();
        sock.write_all(b"xyz").await.unwrap();
        // Dropping `sock` here closes the target connection, which the
        // return pump on the server side should observe as EOF.
    });

    let mux = spawn_pair();
    let mut stream = mux.open(5, &format!("127.0.0.1:{}", target_addr.port())).unwrap();

    let mut buf = [0u8; 3];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"xyz");

    // After target EOF the server sends CLOSE; the client surfaces this as
    // an end-of-stream read (zero bytes) to the upper layer.
    let mut tail = [0u8; 1];
    let n = stream.read(&mut tail).await.unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn dial_failure_surfaces_as_eof() {
    // Bind then drop a listener to get a port that refuses connections.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = listener.local_addr().unwrap().port();
    drop(listener);

    let mux = spawn_pair();
    let mut stream = mux.open(7, &format!("127.0.0.1:{dead_port}")).unwrap();

    let mut buf = [0u8; 1];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "dial failure should surface as end-of-stream, not data");
    assert!(!stream.is_open(), "a stream that never dialed should never observe OPEN-ACK");
}

#[tokio::test]
async fn tunnel_loss_closes_all_live_streams() {
    let mut targets = Vec::new();
    for _ in 0..5 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            // Hold the connection open; never send or close until dropped
            // with the test's tokio runtime.
            let mut buf = [0u8; 1];
            let _ = sock.read(&mut buf).await;
        });
        targets.push(addr);
    }

    let (client_half, server_half) = tokio::io::duplex(TUNNEL_BUF);
    let (client_rx, client_tx) = tokio::io::split(client_half);
    let (mux, _scheduler_handle, _reader_handle) =
        client::connect(client_rx, client_tx, AddressFormat::Ascii);
    let server_task = tokio::spawn(async move {
        let server = server::ServerMux::new(AddressFormat::Ascii);
        let _ = server.run(server_half).await;
    });

    let mut streams = Vec::new();
    for addr in &targets {
        streams.push(mux.open(7, &format!("127.0.0.1:{}", addr.port())).unwrap());
    }
    // Give the scheduler a couple of ticks to actually write the OPENs.
    tokio::time::sleep(muxtun_proto::config::TICK_INTERVAL * 2).await;

    // Killing the tunnel: abort the server peer's task outright, which drops
    // its half of the duplex and makes the client's reader observe peer-gone.
    server_task.abort();

    for mut stream in streams {
        let mut buf = [0u8; 1];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "every live stream must surface end-of-stream once the tunnel is gone");
    }
}

#[tokio::test]
async fn zero_length_data_frame_is_a_legal_no_op() {
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_addr = target.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut sock, _) = target.accept().await.unwrap();
        let (mut rx, mut tx) = sock.split();
        let _ = tokio::io::copy(&mut rx, &mut tx).await;
    });

    let mux = spawn_pair();
    let mut stream = mux.open(3, &format!("127.0.0.1:{}", target_addr.port())).unwrap();
    // A single-shot `write` with an empty buffer still reaches `poll_write`
    // (unlike `write_all`, which short-circuits on an empty slice) and
    // enqueues a zero-length DATA frame; it must not upset the target or the
    // framing that follows.
    stream.write(b"").await.unwrap();
    stream.write_all(b"after-empty").await.unwrap();
    let mut buf = [0u8; "after-empty".len()];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"after-empty");
    let _ = stream.shutdown().await;
}
