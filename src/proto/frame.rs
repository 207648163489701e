//! Wire framing: a fixed 8-octet header followed by the payload.
//!
//! ```text
//! msg_type(1) priority(1) stream_id(2) payload_len(4) payload(payload_len)
//! ```
//!
//! All multi-octet integers are big-endian.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use crate::config::HEADER_LEN;
use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// The three message types this protocol knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    /// Request (client) or acknowledge (server) a new stream.
    Open = 1,
    /// Carry a chunk of stream payload.
    Data = 2,
    /// Tear a stream down, in either direction.
    Close = 3,
}

impl MsgType {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            1 => Ok(Self::Open),
            2 => Ok(Self::Data),
            3 => Ok(Self::Close),
            other => Err(Error::ProtocolViolation(format!("unknown msg_type {other}"))),
        }
    }
}

/// A single decoded (or about-to-be-encoded) frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Message type.
    pub msg_type: MsgType,
    /// Priority level, `0..=7`.
    pub priority: u8,
    /// Stream this frame belongs to.
    pub stream_id: u16,
    /// Frame payload. Empty for a bare CLOSE.
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame, clamping `priority` to the valid range.
    pub fn new(msg_type: MsgType, priority: u8, stream_id: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            msg_type,
            priority: priority.min(crate::config::MAX_PRIORITY),
            stream_id,
            payload: payload.into(),
        }
    }

    /// Build an OPEN frame carrying the target address payload.
    pub fn open(priority: u8, stream_id: u16, target_payload: impl Into<Bytes>) -> Self {
        Self::new(MsgType::Open, priority, stream_id, target_payload)
    }

    /// Build a DATA frame carrying `chunk`.
    pub fn data(priority: u8, stream_id: u16, chunk: impl Into<Bytes>) -> Self {
        Self::new(MsgType::Data, priority, stream_id, chunk)
    }

    /// Build a CLOSE frame, optionally carrying a diagnostic reason.
    pub fn close(priority: u8, stream_id: u16, reason: impl Into<Bytes>) -> Self {
        Self::new(MsgType::Close, priority, stream_id, reason)
    }

    /// Serialize this frame to wire bytes, ready to hand to the egress queue.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u8(self.msg_type as u8);
        buf.put_u8(self.priority);
        buf.put_u16(self.stream_id);
        buf.put_u32(self.payload.len() as u32);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Read and decode exactly one frame from `r`.
    ///
    /// Any end of transport, whether at a header boundary or mid-payload, is
    /// reported as [`Error::PeerGone`] rather than as a truncated-frame
    /// protocol violation.
    pub async fn decode<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        let mut hdr = [0u8; HEADER_LEN];
        read_exact_or_gone(r, &mut hdr).await?;
        let mut hdr = &hdr[..];
        let msg_type = MsgType::from_u8(hdr.get_u8())?;
        let priority = hdr.get_u8();
        let stream_id = hdr.get_u16();
        let payload_len = hdr.get_u32() as usize;
        let payload = if payload_len == 0 {
            Bytes::new()
        } else {
            let mut buf = vec![0u8; payload_len];
            read_exact_or_gone(r, &mut buf).await?;
            Bytes::from(buf)
        };
        Ok(Self { msg_type, priority, stream_id, payload })
    }
}

async fn read_exact_or_gone<R: AsyncRead + Unpin>(r: &mut R, buf: &mut [u8]) -> Result<()> {
    match r.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(Error::PeerGone),
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe
            ) =>
        {
            Err(Error::PeerGone)
        }
        Err(e) => Err(e.into()),
    }
}
