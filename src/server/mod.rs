// src/server/mod.rs

//! Server orchestration: wiring configuration, storage, the client
//! registry, the worker pool, and the command router together, then
//! holding the process open until a shutdown signal.

use crate::config::Config;
use crate::core::commands::{CommandRouter, Dispatcher};
use crate::core::storage::Storage;
use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub mod connection;
mod guard;
pub mod monitor;
pub mod pool;
pub mod registry;
pub mod worker;

pub use connection::{ConnFlags, Connection};
pub use pool::{PoolCore, WorkerPool};
pub use registry::ClientRegistry;
pub use worker::{KillFilter, Worker, WorkerCore};

/// Waits for a shutdown signal: SIGINT or SIGTERM.
#[cfg(unix)]
async fn await_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to create SIGINT stream");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to create SIGTERM stream");
    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received, shutting down."),
        _ = sigterm.recv() => info!("SIGTERM received, shutting down."),
    }
}

/// Waits for a shutdown signal: Ctrl+C.
#[cfg(windows)]
async fn await_shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Ctrl-C received, shutting down.");
    }
}

/// SO_REUSEPORT means a second instance on the same port would bind
/// without complaint, so probe the ports with a connect before starting.
async fn ensure_ports_free(config: &Config) -> Result<()> {
    let mut ports = vec![config.port];
    if config.repl_workers > 0 {
        ports.push(config.repl_port);
    }
    for port in ports {
        let probe = tokio::time::timeout(
            Duration::from_millis(200),
            tokio::net::TcpStream::connect(("127.0.0.1", port)),
        )
        .await;
        if let Ok(Ok(_)) = probe {
            bail!("port {port} is already in use");
        }
    }
    Ok(())
}

/// The main server startup function; runs until a shutdown signal arrives.
pub async fn run(config: Config) -> Result<()> {
    let config = Arc::new(config);
    config.validate()?;
    ensure_ports_free(&config).await?;

    let storage = Arc::new(Storage::open(&config.storage.dir)?);
    info!(dir = %config.storage.dir, "storage opened");

    let registry = Arc::new(ClientRegistry::new());
    let mut pool = WorkerPool::new(&config, &registry);
    let router: Arc<dyn Dispatcher> = Arc::new(CommandRouter::new(
        pool.core(),
        storage.clone(),
        registry.clone(),
        config.clone(),
    ));
    pool.start(router)?;
    info!(port = config.port, "stratadb ready to accept connections");

    await_shutdown_signal().await;

    pool.stop_all();
    tokio::task::spawn_blocking(move || {
        let mut pool = pool;
        pool.join_all();
    })
    .await?;
    storage.flush()?;
    info!("server shutdown complete");
    Ok(())
}
