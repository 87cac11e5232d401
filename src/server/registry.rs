// src/server/registry.rs

//! Process-wide client accounting shared by every worker.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Three counters with relaxed ordering: id allocation only needs
/// uniqueness, and the client counts are advisory (admission may briefly
/// over-count by at most the pool size under concurrent accepts).
#[derive(Debug)]
pub struct ClientRegistry {
    next_id: AtomicU64,
    clients: AtomicI64,
    monitor_clients: AtomicI64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            clients: AtomicI64::new(0),
            monitor_clients: AtomicI64::new(0),
        }
    }

    /// Allocates the next connection id. Ids are never reused.
    pub fn next_client_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Increments the live-client count and returns the new value, for the
    /// increment-then-compare admission check.
    pub fn incr_clients(&self) -> i64 {
        self.clients.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn decr_clients(&self) {
        self.clients.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn clients(&self) -> i64 {
        self.clients.load(Ordering::Relaxed)
    }

    pub fn incr_monitor_clients(&self) {
        self.monitor_clients.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decr_monitor_clients(&self) {
        self.monitor_clients.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn monitor_clients(&self) -> i64 {
        self.monitor_clients.load(Ordering::Relaxed)
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
