//! Client peer (initiator): runs the egress scheduler and the ingress
//! reader loop for one tunnel connection, and exposes the public API upper
//! layers (e.g. the SOCKS5 adapter) open streams through.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

mod handle;
pub mod scheduler;

pub use handle::ClientStream;
pub use scheduler::EgressHandle;

use crate::addr::{self, AddressFormat};
use crate::config;
use crate::dupe::Dupe;
use crate::error::{Error, Result};
use crate::frame::{Frame, MsgType};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Per-stream state owned exclusively by the ingress reader loop, used to
/// dispatch DATA/CLOSE frames to the stream's upper-layer handle.
#[derive(Debug)]
struct LocalStream {
    data_tx: mpsc::Sender<Bytes>,
    opened: Arc<AtomicBool>,
}

/// Cheaply-cloneable client-side multiplexor handle.
#[derive(Debug)]
pub struct ClientMux {
    egress: EgressHandle,
    streams: Arc<RwLock<HashMap<u16, LocalStream>>>,
    next_id: Arc<AtomicU16>,
    format: AddressFormat,
    running: Arc<AtomicBool>,
}

impl Dupe for ClientMux {
    fn dupe(&self) -> Self {
        Self {
            egress: self.egress.dupe(),
            streams: self.streams.dupe(),
            next_id: self.next_id.dupe(),
            format: self.format,
            running: self.running.dupe(),
        }
    }
}

/// Spawn the scheduler and reader-loop tasks for one tunnel connection.
/// Returns a [`ClientMux`] handle for opening streams, plus the join handles
/// of the two background tasks so a caller can wait on either to notice the
/// tunnel has gone away.
pub fn connect<R, W>(
    tunnel_rx: R,
    tunnel_tx: W,
    format: AddressFormat,
) -> (ClientMux, tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (scheduler, egress, running) = scheduler::EgressScheduler::new(tunnel_tx);
    let scheduler_handle = tokio::spawn(scheduler.run());
    let streams = Arc::new(RwLock::new(HashMap::new()));
    let mux = ClientMux {
        egress,
        streams: streams.dupe(),
        next_id: Arc::new(AtomicU16::new(1)),
        format,
        running,
    };
    let reader_handle = tokio::spawn(reader_loop(tunnel_rx, streams));
    (mux, scheduler_handle, reader_handle)
}

impl ClientMux {
    /// Access the egress scheduler handle directly, e.g. to call
    /// [`EgressHandle::set_link_bandwidth`] from the CLI layer.
    pub fn egress(&self) -> &EgressHandle {
        &self.egress
    }

    /// Allocate the next `stream_id`: a monotonically increasing counter
    /// that wraps and, on wraparound, skips any id still live in the table.
    /// Stream ids are not recycled eagerly.
    fn allocate_id(&self) -> Result<u16> {
        let streams = self.streams.read();
        for _ in 0..=u16::MAX {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 && !streams.contains_key(&id) {
                return Ok(id);
            }
        }
        Err(Error::Closed)
    }

    /// Open a new stream to `target` ("host:port", bracketed for IPv6) at
    /// `priority`. Sends OPEN immediately and returns a handle; the handle
    /// transitions from OPENING to OPEN if and when the peer's OPEN-ACK
    /// arrives, but nothing gates on that ack.
    pub fn open(&self, priority: u8, target: &str) -> Result<ClientStream> {
        let (host, port) = addr::split_host_port(target)?;
        let stream_id = self.allocate_id()?;
        let payload = addr::encode_target(self.format, &host, port);
        let (data_tx, data_rx) = mpsc::channel(64);
        let opened = Arc::new(AtomicBool::new(false));
        self.streams
            .write()
            .insert(stream_id, LocalStream { data_tx, opened: opened.dupe() });
        self.egress
            .enqueue(priority, Frame::open(priority, stream_id, payload).encode());
        Ok(ClientStream::new(
            stream_id,
            priority,
            self.egress.dupe(),
            data_rx,
            opened,
            self.streams.dupe(),
        ))
    }

    /// Shut the multiplexor down: enqueue a final CLOSE for every stream
    /// still registered, wait a couple of ticks for them to reach the wire,
    /// then stop the scheduler.
    pub async fn shutdown(&self) {
        let ids: Vec<u16> = self.streams.read().keys().copied().collect();
        for id in ids {
            self.egress.enqueue(config::MAX_PRIORITY, Frame::close(config::MAX_PRIORITY, id, Bytes::new()).encode());
        }
        tokio::time::sleep(config::TICK_INTERVAL * 2).await;
        self.running.store(false, Ordering::Relaxed);
    }
}

/// Ingress reader loop: decode frames off the tunnel and dispatch by type.
/// The sole writer of the client-side stream table.
async fn reader_loop<R>(mut tunnel_rx: R, streams: Arc<RwLock<HashMap<u16, LocalStream>>>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match Frame::decode(&mut tunnel_rx).await {
            Ok(frame) => dispatch(frame, &streams).await,
            Err(Error::PeerGone) => {
                debug!("tunnel peer gone");
                break;
            }
            Err(e) => {
                warn!("protocol violation from peer, tearing tunnel down: {e}");
                break;
            }
        }
    }
    // Flush an EOF marker to every stream still registered so upper-layer
    // readers observe end-of-stream instead of hanging forever. Drain the
    // table into a local Vec first so the lock is never held across the
    // subsequent `.await`s.
    let drained: Vec<LocalStream> = streams.write().drain().map(|(_, local)| local).collect();
    for local in drained {
        local.data_tx.send(Bytes::new()).await.ok();
    }
}

async fn dispatch(frame: Frame, streams: &Arc<RwLock<HashMap<u16, LocalStream>>>) {
    match frame.msg_type {
        MsgType::Open => {
            // OPEN-ACK: complete OPENING -> OPEN, or drop if the stream is
            // already gone.
            if let Some(local) = streams.read().get(&frame.stream_id) {
                local.opened.store(true, Ordering::Release);
            }
        }
        MsgType::Data => {
            let sender = streams.read().get(&frame.stream_id).map(|s| s.data_tx.dupe());
            if let Some(sender) = sender {
                if sender.send(frame.payload).await.is_err() {
                    trace!("stream {} handle dropped, discarding DATA", frame.stream_id);
                }
            }
        }
        MsgType::Close => {
            let removed = streams.write().remove(&frame.stream_id);
            if let Some(local) = removed {
                local.data_tx.send(Bytes::new()).await.ok();
            }
        }
    }
}
