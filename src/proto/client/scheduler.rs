//! Priority-scheduled, token-bucket-shaped egress engine: the client's sole
//! writer to the tunnel.
//!
//! Eight lock-free MPSC queues, one per priority level, feed a single
//! scheduling loop. Every tick, it drains queues from priority 7 down to 0,
//! spending from a per-tick byte budget. A frame that would overrun the
//! remaining budget defers not just its own level but every lower level too
//! for the rest of the tick, so a large high-priority frame can never be
//! overtaken by a smaller low-priority one within the same tick.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use crate::config::{DEFAULT_BYTES_PER_TICK, MIN_BYTES_PER_TICK, TICK_INTERVAL};
use crate::dupe::Dupe;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{trace, warn};

const LEVELS: usize = crate::config::PRIORITY_LEVELS;

/// Cheaply-cloneable handle for enqueuing already-encoded frames and reading
/// or changing the current egress budget.
#[derive(Clone, Debug)]
pub struct EgressHandle {
    senders: [mpsc::UnboundedSender<Bytes>; LEVELS],
    bytes_per_tick: Arc<AtomicU32>,
}

impl Dupe for EgressHandle {
    fn dupe(&self) -> Self {
        self.clone()
    }
}

impl EgressHandle {
    /// Enqueue an already-framed message at `priority` (clamped to `0..=7`).
    /// Non-blocking: returns before the frame reaches the wire.
    pub fn enqueue(&self, priority: u8, frame: Bytes) {
        let level = (priority as usize).min(LEVELS - 1);
        if self.senders[level].send(frame).is_err() {
            trace!("scheduler gone, dropping frame at priority {level}");
        }
    }

    /// Current egress budget, in encoded bytes per tick. Producers that
    /// chunk large writes read this to size each chunk.
    pub fn bytes_per_tick(&self) -> u32 {
        self.bytes_per_tick.load(Ordering::Relaxed)
    }

    /// Change the link bandwidth. The floor of [`MIN_BYTES_PER_TICK`] is
    /// enforced so the scheduler always makes forward progress. Takes effect
    /// from the next tick onward.
    pub fn set_link_bandwidth(&self, bytes_per_tick: u32) {
        self.bytes_per_tick
            .store(bytes_per_tick.max(MIN_BYTES_PER_TICK), Ordering::Relaxed);
    }
}

/// The scheduler itself. Owns the tunnel's write half; nothing else may
/// write to it.
pub struct EgressScheduler<W> {
    receivers: [mpsc::UnboundedReceiver<Bytes>; LEVELS],
    pending: [Option<Bytes>; LEVELS],
    writer: W,
    bytes_per_tick: Arc<AtomicU32>,
    running: Arc<AtomicBool>,
}

impl<W: AsyncWrite + Unpin> EgressScheduler<W> {
    /// Build a scheduler over `writer`, returning it alongside the handle
    /// producers enqueue through and the flag that stops [`Self::run`].
    pub fn new(writer: W) -> (Self, EgressHandle, Arc<AtomicBool>) {
        let mut senders = Vec::with_capacity(LEVELS);
        let mut receivers = Vec::with_capacity(LEVELS);
        for _ in 0..LEVELS {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            receivers.push(rx);
        }
        let senders: [mpsc::UnboundedSender<Bytes>; LEVELS] =
            senders.try_into().unwrap_or_else(|_| panic!("LEVELS mismatch"));
        let receivers: [mpsc::UnboundedReceiver<Bytes>; LEVELS] = receivers
            .try_into()
            .unwrap_or_else(|_| panic!("LEVELS mismatch"));
        let bytes_per_tick = Arc::new(AtomicU32::new(DEFAULT_BYTES_PER_TICK));
        let running = Arc::new(AtomicBool::new(true));
        let handle = EgressHandle { senders, bytes_per_tick: bytes_per_tick.dupe() };
        let scheduler = Self {
            receivers,
            pending: std::array::from_fn(|_| None),
            writer,
            bytes_per_tick,
            running: running.dupe(),
        };
        (scheduler, handle, running)
    }

    /// Run the scheduling cycle until the shared `running` flag is cleared.
    /// Does not drain remaining queues on exit; callers that need a clean
    /// shutdown enqueue final CLOSE frames and wait at least one tick first.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        while self.running.load(Ordering::Relaxed) {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                warn!("egress scheduler write error, stopping: {e}");
                break;
            }
        }
    }

    /// One scheduling tick.
    async fn tick(&mut self) -> std::io::Result<()> {
        let mut remaining = self.bytes_per_tick.load(Ordering::Relaxed);
        let mut wrote_any = false;
        'levels: for level in (0..LEVELS).rev() {
            loop {
                if self.pending[level].is_none() {
                    match self.receivers[level].try_recv() {
                        Ok(frame) => self.pending[level] = Some(frame),
                        Err(_) => break,
                    }
                }
                let Some(frame) = self.pending[level].as_ref() else { break };
                let frame_len = frame.len() as u32;
                if frame_len > remaining {
                    // Strict head-of-line: stop the whole scan, not just this level.
                    break 'levels;
                }
                let frame = self.pending[level].take().expect("checked above");
                self.writer.write_all(&frame).await?;
                wrote_any = true;
                remaining -= frame_len;
            }
        }
        if wrote_any {
            self.writer.flush().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    async fn drain_all(writer: &mut Vec<u8>) -> Vec<Frame> {
        let mut cursor = std::io::Cursor::new(std::mem::take(writer));
        let mut out = Vec::new();
        loop {
            match Frame::decode(&mut cursor).await {
                Ok(f) => out.push(f),
                Err(_) => break,
            }
        }
        out
    }

    #[tokio::test]
    async fn higher_priority_drains_first_within_budget() {
        let (mut sched, handle, _running) = EgressScheduler::new(Vec::<u8>::new());
        handle.enqueue(1, Frame::data(1, 1, Bytes::from_static(b"low")).encode());
        handle.enqueue(7, Frame::data(7, 2, Bytes::from_static(b"high")).encode());
        sched.tick().await.unwrap();
        let frames = drain_all(&mut sched.writer).await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].stream_id, 2);
        assert_eq!(frames[1].stream_id, 1);
    }

    #[tokio::test]
    async fn oversized_high_priority_frame_defers_lower_levels_too() {
        let (mut sched, handle, _running) = EgressScheduler::new(Vec::<u8>::new());
        handle.set_link_bandwidth(20);
        let big = vec![0u8; 64];
        handle.enqueue(7, Frame::data(7, 1, Bytes::from(big)).encode());
        handle.enqueue(0, Frame::data(0, 2, Bytes::from_static(b"x")).encode());
        sched.tick().await.unwrap();
        let frames = drain_all(&mut sched.writer).await;
        assert!(frames.is_empty(), "oversized high-priority frame should block the whole tick");
    }

    #[tokio::test]
    async fn set_link_bandwidth_enforces_floor() {
        let (_sched, handle, _running) = EgressScheduler::new(Vec::<u8>::new());
        handle.set_link_bandwidth(1);
        assert_eq!(handle.bytes_per_tick(), MIN_BYTES_PER_TICK);
    }

    #[tokio::test]
    async fn two_streams_strict_priority_across_many_ticks() {
        let (mut sched, handle, _running) = EgressScheduler::new(Vec::<u8>::new());
        // 2 frames of 108 bytes (8-octet header + 100-byte payload) fit in
        // one 220-byte tick; a third would not, so this also exercises the
        // scheduler pulling from more than one priority level per tick.
        handle.set_link_bandwidth(220);
        for i in 0..10u8 {
            handle.enqueue(7, Frame::data(7, 1, Bytes::from(vec![i; 100])).encode());
        }
        for i in 0..10u8 {
            handle.enqueue(1, Frame::data(1, 2, Bytes::from(vec![i; 100])).encode());
        }
        for _ in 0..10 {
            sched.tick().await.unwrap();
        }
        let frames = drain_all(&mut sched.writer).await;
        let last_a = frames.iter().rposition(|f| f.stream_id == 1).unwrap();
        let first_b = frames.iter().position(|f| f.stream_id == 2).unwrap();
        assert!(last_a < first_b, "all stream-A DATA frames must precede any stream-B DATA frame");
        assert_eq!(frames.iter().filter(|f| f.stream_id == 1).count(), 10);
        assert_eq!(frames.iter().filter(|f| f.stream_id == 2).count(), 10);
    }

    #[tokio::test]
    async fn bandwidth_change_mid_flight_changes_frames_per_tick() {
        let (mut sched, handle, _running) = EgressScheduler::new(Vec::<u8>::new());
        handle.set_link_bandwidth(250);
        for i in 0..20u8 {
            handle.enqueue(0, Frame::data(0, 9, Bytes::from(vec![i; 100])).encode());
        }
        let frame_size = crate::config::HEADER_LEN + 100;
        let mut frames_per_tick = Vec::new();
        for tick in 0..10 {
            if tick == 5 {
                handle.set_link_bandwidth(120);
            }
            let before = sched.writer.len();
            sched.tick().await.unwrap();
            frames_per_tick.push((sched.writer.len() - before) / frame_size);
        }
        assert_eq!(&frames_per_tick[0..5], &[2, 2, 2, 2, 2], "first 5 ticks at 250 B/tick deliver 2 frames each");
        assert_eq!(&frames_per_tick[5..], &[1, 1, 1, 1, 1], "ticks after the change to 120 B/tick deliver 1 frame each");
    }
}
