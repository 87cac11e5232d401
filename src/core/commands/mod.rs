// src/core/commands/mod.rs

//! The command layer: the dispatcher seam between the connection front end
//! and command execution, plus the supported command set.

pub mod client;
pub mod router;
pub mod string;

pub use router::CommandRouter;

use crate::core::protocol::RespFrame;
use crate::server::Connection;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Anything that can take an encoded reply. Command executors write through
/// this capability rather than touching sockets, so replies produced from
/// any thread land in the right output buffer.
pub trait ReplySink: Send + Sync {
    fn reply(&self, frame: RespFrame);
}

impl ReplySink for Connection {
    fn reply(&self, frame: RespFrame) {
        self.write_frame(frame);
    }
}

/// The inward interface of the connection core: one call per framed
/// command. Implementations must not block the worker thread unboundedly;
/// long-running work is offloaded and completed later through
/// `Worker::reply` + `Worker::enable_write`.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, conn: &Arc<Connection>, namespace: &str, tokens: Vec<Bytes>);
}

/// Uppercased command name for case-insensitive routing.
pub(crate) fn command_name(token: &Bytes) -> String {
    String::from_utf8_lossy(token).to_ascii_uppercase()
}

pub(crate) fn token_str(token: &Bytes) -> String {
    String::from_utf8_lossy(token).into_owned()
}
