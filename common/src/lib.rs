/*
 * Copyright 2023 Oxide Computer Company
 */

use slog::{o, Drain, Logger};

/**
 * Construct the standard bunyan-formatted logger used by every binary in
 * this workspace.  Output goes to stdout so that it can be collected by
 * whatever process supervisor is running the service.
 */
pub fn make_log(name: &str) -> Logger {
    let dec = slog_term::PlainSyncDecorator::new(std::io::stdout());
    let drain = slog_bunyan::with_name(name, dec).build().fuse();
    Logger::root(drain, o!())
}

/**
 * Current time as an integer count of seconds since the epoch, used for
 * job id generation and record timestamps. `i64` matches the range and
 * signedness `chrono` itself uses for this quantity.
 */
pub fn unix_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}
