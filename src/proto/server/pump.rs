//! Server-side return pump: reads from the dialed target and republishes the
//! bytes as DATA frames on the tunnel.
//!
//! Cancellation is cooperative, checked only between reads and right before
//! a write is issued, never by forcibly aborting a write in flight. That is
//! what guarantees a cancelled pump never leaves a half-encoded frame on the
//! wire: once a write starts, it always runs to completion.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use crate::config::BUFFER_SIZE;
use crate::frame::Frame;
use crate::locked_sink::LockedSink;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

/// Run the pump for `stream_id` until cancellation, target EOF, or a read or
/// tunnel-write error. Reports its own stream_id on `pump_done_tx` when it
/// exits so the owning reader loop can run the close procedure.
pub async fn run<R, W>(
    stream_id: u16,
    mut target_rx: R,
    tunnel_tx: LockedSink<W>,
    closed: Arc<AtomicBool>,
    mut cancel_rx: oneshot::Receiver<()>,
    pump_done_tx: mpsc::UnboundedSender<u16>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        tokio::select! {
            biased;
            _ = &mut cancel_rx => {
                trace!("stream {stream_id} pump cancelled");
                break;
            }
            result = target_rx.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        debug!("stream {stream_id} target EOF");
                        send_best_effort_close(&tunnel_tx, stream_id, &closed, "eof").await;
                        break;
                    }
                    Ok(n) => {
                        if closed.load(Ordering::Acquire) {
                            // Lost the race with a concurrent close; drop this chunk.
                            break;
                        }
                        let frame = Frame::data(0, stream_id, Bytes::copy_from_slice(&buf[..n]));
                        if tunnel_tx.write_frame(frame.encode()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("stream {stream_id} target read error: {e}");
                        send_best_effort_close(&tunnel_tx, stream_id, &closed, "target_read_error").await;
                        break;
                    }
                }
            }
        }
    }
    pump_done_tx.send(stream_id).ok();
}

async fn send_best_effort_close<W: AsyncWrite + Unpin>(
    tunnel_tx: &LockedSink<W>,
    stream_id: u16,
    closed: &Arc<AtomicBool>,
    reason: &str,
) {
    if closed.load(Ordering::Acquire) {
        return;
    }
    let frame = Frame::close(0, stream_id, Bytes::copy_from_slice(reason.as_bytes()));
    tunnel_tx.write_frame(frame.encode()).await.ok();
}
