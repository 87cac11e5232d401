// src/core/clock.rs

//! Process-wide clock helpers for connection bookkeeping and feed stamps.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Seconds elapsed since this clock was first read. Monotonic, cheap to
/// load, and safe to compare across threads; backs `age`/`idle` accounting.
pub fn monotonic_secs() -> u64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_secs()
}

/// Wall-clock `(seconds, microseconds)` since the unix epoch, for the
/// human-facing monitor feed lines.
pub fn wall_clock_micros() -> (u64, u32) {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_secs(), d.subsec_micros()),
        Err(_) => (0, 0),
    }
}
