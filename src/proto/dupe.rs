//! Cheap-clone abstraction: a `Clone` look-alike for handles that are cheap to
//! duplicate (reference counts, channel senders), so call sites make that
//! cost explicit instead of riding on `Clone`'s unknown one.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use std::sync::Arc;
use tokio::sync::mpsc;

/// Implemented by handles that are cheap (O(1), no deep copy) to duplicate.
pub trait Dupe {
    /// Duplicate `self`. Never does a deep copy.
    fn dupe(&self) -> Self;
}

impl<T> Dupe for Arc<T> {
    #[inline]
    fn dupe(&self) -> Self {
        Arc::clone(self)
    }
}

impl<T> Dupe for mpsc::Sender<T> {
    #[inline]
    fn dupe(&self) -> Self {
        self.clone()
    }
}

impl<T> Dupe for mpsc::UnboundedSender<T> {
    #[inline]
    fn dupe(&self) -> Self {
        self.clone()
    }
}
