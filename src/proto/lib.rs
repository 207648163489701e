//! Protocol engine for the stream-multiplexing transport tunnel: wire
//! framing, per-stream lifecycle, a priority/token-bucket egress scheduler,
//! and the client and server peer implementations built on top of them.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
#![forbid(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod addr;
pub mod client;
pub mod config;
pub mod dupe;
pub mod error;
pub mod frame;
pub mod locked_sink;
pub mod server;

pub use addr::AddressFormat;
pub use dupe::Dupe;
pub use error::{Error, Result};
pub use frame::{Frame, MsgType};
