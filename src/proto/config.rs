//! Tunable constants shared by the codec, scheduler, and dialer.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use std::time::Duration;

/// Highest priority level accepted on the wire and from the enqueue API.
/// Priority values outside `0..=MAX_PRIORITY` passed to the API are clamped;
/// values read off the wire are trusted as-is.
pub const MAX_PRIORITY: u8 = 7;

/// Number of distinct priority levels (`0..=MAX_PRIORITY`).
pub const PRIORITY_LEVELS: usize = MAX_PRIORITY as usize + 1;

/// Size of the fixed frame header: `msg_type(1) priority(1) stream_id(2) payload_len(4)`.
pub const HEADER_LEN: usize = 8;

/// Scheduler tick interval.
pub const TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Default egress budget per tick, in bytes, before any `set_link_bandwidth` call.
pub const DEFAULT_BYTES_PER_TICK: u32 = 65536;

/// Floor applied to any `set_link_bandwidth` call, guaranteeing forward
/// progress for at least a minimally sized frame every tick.
pub const MIN_BYTES_PER_TICK: u32 = 50;

/// Chunk size used by stream writers and the server-side return pump when the
/// current egress budget does not otherwise constrain them.
pub const BUFFER_SIZE: usize = 64 * 1024;

/// Recommended timeout for the server's outbound dial on OPEN.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
