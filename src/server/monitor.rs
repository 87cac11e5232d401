// src/server/monitor.rs

//! Monitor feed composition and visibility.
//!
//! The monitor channel has no state of its own: it is a view over every
//! worker's monitor table. This module holds the pieces shared by the
//! per-worker feed loops — the line format and the namespace filter.

use crate::core::clock::wall_clock_micros;
use crate::core::DEFAULT_NAMESPACE;
use bytes::Bytes;
use std::fmt::Write;

/// Composes one feed line: `<sec>.<usec> [0 <addr>] "tok1" "tok2" ...`.
pub fn format_feed_line(addr: &str, tokens: &[Bytes]) -> String {
    let (secs, micros) = wall_clock_micros();
    let mut line = String::with_capacity(48 + tokens.len() * 8);
    let _ = write!(line, "{secs}.{micros} [0 {addr}]");
    for token in tokens {
        let _ = write!(line, " \"{}\"", String::from_utf8_lossy(token));
    }
    line
}

/// Whether a monitor in `monitor_namespace` may observe traffic from
/// `source_namespace`. Monitors in the default namespace see everything.
pub fn visible_to(monitor_namespace: &str, source_namespace: &str) -> bool {
    monitor_namespace == source_namespace || monitor_namespace == DEFAULT_NAMESPACE
}
