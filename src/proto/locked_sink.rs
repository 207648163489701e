//! A cheaply-cloneable, mutex-guarded async writer, shared between the
//! server's tunnel reader loop and every return pump so "single writer to
//! the tunnel" has one reusable implementation instead of being reinvented
//! per call site.
//!
//! Adapted from the teacher's `LockedWebSocket`: that type guards a `Sink`
//! whose `poll_ready`/`start_send` never suspend across the lock, so a sync
//! `parking_lot::Mutex` is safe there. Here the guarded operation is a plain
//! `AsyncWrite::write_all`, which does suspend while held, so the mutex must
//! be async-aware.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use crate::dupe::Dupe;
use crate::error::Result;
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// A shared, lockable half of an async writer.
#[derive(Debug)]
pub struct LockedSink<W>(Arc<Mutex<W>>);

impl<W> LockedSink<W> {
    /// Wrap `inner` for sharing between tasks.
    pub fn new(inner: W) -> Self {
        Self(Arc::new(Mutex::new(inner)))
    }
}

impl<W> Dupe for LockedSink<W> {
    #[inline]
    fn dupe(&self) -> Self {
        Self(self.0.dupe())
    }
}

impl<W: AsyncWrite + Unpin> LockedSink<W> {
    /// Write an already-encoded frame and return once it is fully written.
    pub async fn write_frame(&self, encoded: Bytes) -> Result<()> {
        let mut w = self.0.lock().await;
        w.write_all(&encoded).await?;
        Ok(())
    }

    /// Shut the underlying writer down.
    pub async fn shutdown(&self) -> Result<()> {
        let mut w = self.0.lock().await;
        w.shutdown().await?;
        Ok(())
    }
}
