// src/server/guard.rs

//! RAII removal guard for connection tasks.

use crate::server::connection::Connection;
use std::sync::Arc;

/// Ensures a connection leaves its worker's tables exactly once, whether
/// the task returns, errors out, or is aborted during worker shutdown.
/// Removal matches on `(fd, id)` so a recycled fd belonging to a newer
/// connection is never evicted by a stale guard.
pub(crate) struct ConnectionGuard {
    conn: Arc<Connection>,
}

impl ConnectionGuard {
    pub(crate) fn new(conn: Arc<Connection>) -> Self {
        Self { conn }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(worker) = self.conn.owner().upgrade() {
            worker.remove_if_id(self.conn.fd(), self.conn.id());
        }
    }
}
