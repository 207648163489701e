//! Logging setup.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use tracing_subscriber::{filter, fmt, prelude::*};

const QUIET_QUIET_LOG_LEVEL: filter::LevelFilter = filter::LevelFilter::ERROR;
const QUIET_LOG_LEVEL: filter::LevelFilter = filter::LevelFilter::WARN;
const DEFAULT_LOG_LEVEL: filter::LevelFilter = filter::LevelFilter::INFO;
const VERBOSE_LOG_LEVEL: filter::LevelFilter = filter::LevelFilter::DEBUG;
const VERBOSE_VERBOSE_LOG_LEVEL: filter::LevelFilter = filter::LevelFilter::TRACE;

/// Initialize the global subscriber at a level derived from `-v`/`-q` counts.
pub fn init(verbose: u8, quiet: u8) {
    let level = match verbose as i16 - quiet as i16 {
        n if n <= -2 => QUIET_QUIET_LOG_LEVEL,
        -1 => QUIET_LOG_LEVEL,
        0 => DEFAULT_LOG_LEVEL,
        1 => VERBOSE_LOG_LEVEL,
        _ => VERBOSE_VERBOSE_LOG_LEVEL,
    };
    let fmt_layer = fmt::Layer::default()
        .compact()
        .with_timer(fmt::time::time())
        .with_writer(std::io::stderr);
    tracing_subscriber::registry().with(level).with(fmt_layer).init();
}
