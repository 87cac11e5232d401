// src/server/pool.rs

//! The fixed worker set and its fan-out admin operations.

use crate::config::Config;
use crate::core::commands::Dispatcher;
use crate::core::StrataError;
use crate::server::connection::Connection;
use crate::server::monitor::format_feed_line;
use crate::server::registry::ClientRegistry;
use crate::server::worker::{KillFilter, Worker, WorkerCore};
use bytes::Bytes;
use std::sync::Arc;
use tracing::info;

/// The shared half of the pool: every worker's core, visible to admin
/// commands and the monitor bus. The pool never inspects a worker's tables
/// directly; cross-cutting operations fan out through each worker's own
/// public operations.
pub struct PoolCore {
    workers: Vec<Arc<WorkerCore>>,
}

impl PoolCore {
    pub fn workers(&self) -> &[Arc<WorkerCore>] {
        &self.workers
    }

    /// Pool-wide `CLIENT LIST`: each worker's listing, concatenated.
    pub fn list_clients(&self) -> String {
        let mut listing = String::new();
        for worker in &self.workers {
            listing.push_str(&worker.list_clients());
        }
        listing
    }

    /// Pool-wide `CLIENT KILL`; returns the total match count.
    pub fn kill_clients(&self, filter: &KillFilter, self_id: u64) -> i64 {
        self.workers
            .iter()
            .map(|worker| worker.kill(filter, self_id))
            .sum()
    }

    /// Broadcasts one command to every monitor in the pool that may see the
    /// source's namespace. The line is composed once; each worker applies
    /// the self-skip and namespace filters under its own table lock.
    pub fn feed_monitors(&self, source: &Connection, tokens: &[Bytes]) {
        let line = format_feed_line(source.addr(), tokens);
        let namespace = source.namespace();
        for worker in &self.workers {
            worker.feed_monitors(source.id(), &namespace, &line);
        }
    }
}

/// Owns the worker threads: `workers_n` normal workers plus
/// `repl_workers_n` replication workers, each bound to its own thread.
pub struct WorkerPool {
    core: Arc<PoolCore>,
    workers: Vec<Worker>,
}

impl WorkerPool {
    pub fn new(config: &Arc<Config>, registry: &Arc<ClientRegistry>) -> Self {
        let mut cores = Vec::with_capacity(config.workers + config.repl_workers);
        let mut workers = Vec::with_capacity(config.workers + config.repl_workers);
        for _ in 0..config.workers {
            let core = WorkerCore::new(false, registry.clone(), config.clone());
            cores.push(core.clone());
            workers.push(Worker::new(core));
        }
        for _ in 0..config.repl_workers {
            let core = WorkerCore::new(true, registry.clone(), config.clone());
            cores.push(core.clone());
            workers.push(Worker::new(core));
        }
        Self {
            core: Arc::new(PoolCore { workers: cores }),
            workers,
        }
    }

    pub fn core(&self) -> Arc<PoolCore> {
        self.core.clone()
    }

    /// Binds and launches every worker. Any listen failure aborts startup.
    pub fn start(&mut self, dispatcher: Arc<dyn Dispatcher>) -> Result<(), StrataError> {
        for worker in &mut self.workers {
            worker.start(dispatcher.clone())?;
        }
        info!(workers = self.workers.len(), "worker pool started");
        Ok(())
    }

    pub fn stop_all(&self) {
        for worker in &self.workers {
            worker.stop();
        }
    }

    pub fn join_all(&mut self) {
        for worker in &mut self.workers {
            worker.join();
        }
    }
}
