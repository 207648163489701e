//! The per-stream handle handed to the upper layer (e.g. the SOCKS5
//! adapter). Implements `AsyncRead`/`AsyncWrite` so it drops straight into
//! `tokio::io::copy`-style pipes.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use crate::config::{BUFFER_SIZE, HEADER_LEN};
use crate::frame::Frame;
use bytes::{Buf, Bytes};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

use super::scheduler::EgressHandle;
use super::LocalStream;

/// One multiplexed stream, from the client's perspective.
#[derive(Debug)]
pub struct ClientStream {
    stream_id: u16,
    priority: u8,
    egress: EgressHandle,
    data_rx: mpsc::Receiver<Bytes>,
    opened: Arc<AtomicBool>,
    streams: Arc<RwLock<HashMap<u16, LocalStream>>>,
    read_buf: Bytes,
    eof: bool,
}

impl ClientStream {
    pub(super) fn new(
        stream_id: u16,
        priority: u8,
        egress: EgressHandle,
        data_rx: mpsc::Receiver<Bytes>,
        opened: Arc<AtomicBool>,
        streams: Arc<RwLock<HashMap<u16, LocalStream>>>,
    ) -> Self {
        Self {
            stream_id,
            priority,
            egress,
            data_rx,
            opened,
            streams,
            read_buf: Bytes::new(),
            eof: false,
        }
    }

    /// The stream_id this handle was opened with.
    pub fn stream_id(&self) -> u16 {
        self.stream_id
    }

    /// Whether the peer's OPEN-ACK has been observed. Advisory only: nothing
    /// blocks on it, neither reads nor writes.
    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }
}

impl AsyncRead for ClientStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.read_buf.is_empty() {
                let n = this.read_buf.len().min(buf.remaining());
                buf.put_slice(&this.read_buf[..n]);
                this.read_buf.advance(n);
                return Poll::Ready(Ok(()));
            }
            if this.eof {
                return Poll::Ready(Ok(()));
            }
            match this.data_rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => {
                    if chunk.is_empty() {
                        // Empty chunk is the reader loop's internal EOF/CLOSE marker.
                        this.eof = true;
                        return Poll::Ready(Ok(()));
                    }
                    this.read_buf = chunk;
                }
                Poll::Ready(None) => {
                    this.eof = true;
                    return Poll::Ready(Ok(()));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl AsyncWrite for ClientStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        // Chunk to the current egress budget so one write can never stall
        // the link for a whole tick.
        let this = self.get_mut();
        let chunk_size = (this.egress.bytes_per_tick() as usize)
            .saturating_sub(HEADER_LEN)
            .min(BUFFER_SIZE)
            .max(1);
        let n = buf.len().min(chunk_size);
        let frame = Frame::data(this.priority, this.stream_id, Bytes::copy_from_slice(&buf[..n]));
        this.egress.enqueue(this.priority, frame.encode());
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        // Enqueue is non-blocking and the scheduler flushes every tick; there
        // is nothing additional to flush here.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let frame = Frame::close(this.priority, this.stream_id, Bytes::new());
        this.egress.enqueue(this.priority, frame.encode());
        this.streams.write().remove(&this.stream_id);
        Poll::Ready(Ok(()))
    }
}
