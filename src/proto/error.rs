//! Error types shared across the protocol engine.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use thiserror::Error;

/// Errors surfaced by the framing, stream lifecycle, and peer implementations.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying transport ended, or failed in a way indistinguishable
    /// from ending, while a frame was being read.
    #[error("transport peer is gone")]
    PeerGone,

    /// The peer sent something the protocol forbids. Fatal to the whole
    /// tunnel: the caller should stop the reader loop and tear down every
    /// stream.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Dialing the OPEN target failed. Scoped to a single stream; the tunnel
    /// stays up.
    #[error("dial failed: {0}")]
    DialFailed(String),

    /// The multiplexor is shutting down and cannot take new work.
    #[error("multiplexor is shutting down")]
    Closed,

    /// Any I/O error not otherwise classified above.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience alias for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
