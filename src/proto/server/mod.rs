//! Server peer (responder): accepts one tunnel connection, dials a target
//! per OPEN, and pumps bytes back as DATA frames.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

mod dialer;
mod pump;

use crate::addr::AddressFormat;
use crate::dupe::Dupe;
use crate::error::{Error, Result};
use crate::frame::{Frame, MsgType};
use crate::locked_sink::LockedSink;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Per-stream bookkeeping owned exclusively by the tunnel reader loop.
struct StreamState {
    target_tx: WriteHalf<TcpStream>,
    closed: Arc<AtomicBool>,
    cancel_tx: Option<oneshot::Sender<()>>,
    pump_handle: tokio::task::JoinHandle<()>,
}

/// The server peer. Stateless beyond which OPEN-payload encoding to expect;
/// cheap to copy per accepted connection.
#[derive(Debug, Clone, Copy)]
pub struct ServerMux {
    format: AddressFormat,
}

impl ServerMux {
    /// Build a server peer expecting OPEN payloads in `format`.
    pub fn new(format: AddressFormat) -> Self {
        Self { format }
    }

    /// Run the responder side of one tunnel connection to completion.
    /// Returns once the tunnel is gone or a protocol violation is observed;
    /// every still-live stream is torn down before returning. Generic over
    /// the tunnel transport so it can run over a real `TcpStream` or, in
    /// tests, an in-memory duplex; target dialing (in [`dialer`]) is always
    /// real TCP regardless.
    #[tracing::instrument(skip_all)]
    pub async fn run<T>(&self, tunnel: T) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut tunnel_rx, tunnel_tx) = tokio::io::split(tunnel);
        let tunnel_tx = LockedSink::new(tunnel_tx);
        let mut streams: HashMap<u16, StreamState> = HashMap::new();
        let (pump_done_tx, mut pump_done_rx) = mpsc::unbounded_channel::<u16>();

        let result = loop {
            tokio::select! {
                biased;
                Some(stream_id) = pump_done_rx.recv() => {
                    close_stream(&mut streams, stream_id, None, &tunnel_tx).await;
                }
                frame = Frame::decode(&mut tunnel_rx) => {
                    match frame {
                        Ok(frame) => {
                            if let Err(e) = self
                                .process_frame(frame, &mut streams, &tunnel_tx, &pump_done_tx)
                                .await
                            {
                                break Err(e);
                            }
                        }
                        Err(Error::PeerGone) => break Ok(()),
                        Err(e) => {
                            warn!("protocol violation from peer: {e}");
                            break Err(e);
                        }
                    }
                }
            }
        };

        let ids: Vec<u16> = streams.keys().copied().collect();
        for id in ids {
            close_stream(&mut streams, id, None, &tunnel_tx).await;
        }
        tunnel_tx.shutdown().await.ok();
        result
    }

    async fn process_frame<W: AsyncWrite + Unpin>(
        &self,
        frame: Frame,
        streams: &mut HashMap<u16, StreamState>,
        tunnel_tx: &LockedSink<W>,
        pump_done_tx: &mpsc::UnboundedSender<u16>,
    ) -> Result<()> {
        match frame.msg_type {
            MsgType::Open => {
                if streams.contains_key(&frame.stream_id) {
                    return Err(Error::ProtocolViolation(format!(
                        "OPEN for already-live stream {}",
                        frame.stream_id
                    )));
                }
                match dialer::parse_and_dial(self.format, &frame.payload).await {
                    Ok((target, host, port)) => {
                        info!("stream {} -> {host}:{port}", frame.stream_id);
                        let (target_rx, target_tx) = tokio::io::split(target);
                        let closed = Arc::new(AtomicBool::new(false));
                        let (cancel_tx, cancel_rx) = oneshot::channel();
                        let pump_handle = tokio::spawn(pump::run(
                            frame.stream_id,
                            target_rx,
                            tunnel_tx.dupe(),
                            closed.dupe(),
                            cancel_rx,
                            pump_done_tx.dupe(),
                        ));
                        streams.insert(
                            frame.stream_id,
                            StreamState { target_tx, closed, cancel_tx: Some(cancel_tx), pump_handle },
                        );
                        tunnel_tx
                            .write_frame(Frame::open(0, frame.stream_id, Bytes::from_static(b"ok")).encode())
                            .await?;
                    }
                    Err(e) => {
                        warn!("OPEN failed for stream {}: {e}", frame.stream_id);
                        let reason = format!("open_failed:{e}");
                        tunnel_tx
                            .write_frame(Frame::close(0, frame.stream_id, reason).encode())
                            .await
                            .ok();
                    }
                }
            }
            MsgType::Data => {
                let write_failed = if let Some(state) = streams.get_mut(&frame.stream_id) {
                    state.target_tx.write_all(&frame.payload).await.is_err()
                } else {
                    false
                };
                if write_failed {
                    debug!("target write failed for stream {}", frame.stream_id);
                    close_stream(
                        streams,
                        frame.stream_id,
                        Some(Bytes::from_static(b"target_write_failed")),
                        tunnel_tx,
                    )
                    .await;
                }
            }
            MsgType::Close => {
                // Unknown stream_id is silently ignored: `close_stream` is a
                // no-op when the table has no entry for it.
                close_stream(streams, frame.stream_id, None, tunnel_tx).await;
            }
        }
        Ok(())
    }
}

/// Idempotent close procedure. Removing the table entry up front both
/// answers "is this stream already closed" (table representation: absent
/// means closed) and prevents re-entry from a concurrent CLOSE and a
/// pump-done signal racing for the same stream_id.
async fn close_stream<W: AsyncWrite + Unpin>(
    streams: &mut HashMap<u16, StreamState>,
    stream_id: u16,
    close_reason: Option<Bytes>,
    tunnel_tx: &LockedSink<W>,
) {
    let Some(mut state) = streams.remove(&stream_id) else { return };
    state.closed.store(true, Ordering::Release);
    if let Some(cancel_tx) = state.cancel_tx.take() {
        let _ = cancel_tx.send(());
    }
    let _ = state.pump_handle.await;
    let _ = state.target_tx.shutdown().await;
    if let Some(reason) = close_reason {
        tunnel_tx.write_frame(Frame::close(0, stream_id, reason).encode()).await.ok();
    }
    debug!("stream {stream_id} closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn open_echo_close_round_trip() {
        let target_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = target_listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = target_listener.accept().await.unwrap();
            let (mut rx, mut tx) = sock.split();
            let _ = tokio::io::copy(&mut rx, &mut tx).await;
        });

        let (mut client_side, server_side) = tokio::io::duplex(4096);
        let mux = ServerMux::new(AddressFormat::Ascii);
        let server_task = tokio::spawn(async move { mux.run(server_side).await });

        let target_payload = format!("127.0.0.1:{}", target_addr.port());
        client_side
            .write_all(&Frame::open(0, 1, Bytes::from(target_payload.into_bytes())).encode())
            .await
            .unwrap();
        let ack = Frame::decode(&mut client_side).await.unwrap();
        assert_eq!(ack.msg_type, MsgType::Open);
        assert_eq!(ack.stream_id, 1);

        client_side
            .write_all(&Frame::data(0, 1, Bytes::from_static(b"hello")).encode())
            .await
            .unwrap();
        let echoed = Frame::decode(&mut client_side).await.unwrap();
        assert_eq!(echoed.msg_type, MsgType::Data);
        assert_eq!(echoed.payload, Bytes::from_static(b"hello"));

        client_side.write_all(&Frame::close(0, 1, Bytes::new()).encode()).await.unwrap();
        drop(client_side);
        let _ = server_task.await;
    }

    #[tokio::test]
    async fn close_for_unknown_stream_is_ignored() {
        let mut streams: HashMap<u16, StreamState> = HashMap::new();
        let (_rx, tx) = tokio::io::split(tokio::io::duplex(64).1);
        let tunnel_tx = LockedSink::new(tx);
        close_stream(&mut streams, 99, None, &tunnel_tx).await;
        assert!(streams.is_empty());
    }

    #[tokio::test]
    async fn open_for_live_stream_is_protocol_violation() {
        let mux = ServerMux::new(AddressFormat::Ascii);
        let mut streams: HashMap<u16, StreamState> = HashMap::new();
        let (_rx, tx) = tokio::io::split(tokio::io::duplex(64).1);
        let tunnel_tx = LockedSink::new(tx);
        let (pump_done_tx, _pump_done_rx) = mpsc::unbounded_channel();

        let target_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = target_listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = target_listener.accept().await;
        });
        let payload = format!("127.0.0.1:{}", target_addr.port());
        let open1 = Frame::open(0, 5, Bytes::from(payload.clone().into_bytes()));
        mux.process_frame(open1, &mut streams, &tunnel_tx, &pump_done_tx).await.unwrap();
        let open2 = Frame::open(0, 5, Bytes::from(payload.into_bytes()));
        let err = mux
            .process_frame(open2, &mut streams, &tunnel_tx, &pump_done_tx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));

        close_stream(&mut streams, 5, None, &tunnel_tx).await;
    }
}
