// tests/integration/fixtures.rs

//! Shared scaffolding: spins up a real worker pool on a free loopback port
//! and offers small RESP client helpers.

use std::sync::Arc;
use std::time::Duration;
use stratadb::config::Config;
use stratadb::core::commands::{CommandRouter, Dispatcher};
use stratadb::core::storage::Storage;
use stratadb::server::{ClientRegistry, WorkerPool};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub struct TestServer {
    pool: WorkerPool,
    pub port: u16,
    pub registry: Arc<ClientRegistry>,
    _data_dir: tempfile::TempDir,
}

impl TestServer {
    /// Builds and starts a pool with test-friendly defaults; `configure`
    /// tweaks the config before launch.
    pub fn start(configure: impl FnOnce(&mut Config)) -> Self {
        let data_dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::default();
        config.port = free_port();
        config.workers = 2;
        config.max_clients = 100;
        config.storage.dir = data_dir
            .path()
            .join("db")
            .to_string_lossy()
            .into_owned();
        configure(&mut config);
        config.validate().expect("valid test config");

        let config = Arc::new(config);
        let registry = Arc::new(ClientRegistry::new());
        let storage = Arc::new(Storage::open(&config.storage.dir).expect("storage"));
        let mut pool = WorkerPool::new(&config, &registry);
        let router: Arc<dyn Dispatcher> = Arc::new(CommandRouter::new(
            pool.core(),
            storage,
            registry.clone(),
            config.clone(),
        ));
        pool.start(router).expect("pool start");

        Self {
            pool,
            port: config.port,
            registry,
            _data_dir: data_dir,
        }
    }

    /// Connects to the pool, retrying while the listeners come up.
    pub async fn connect(&self) -> TcpStream {
        for _ in 0..40 {
            if let Ok(stream) = TcpStream::connect(("127.0.0.1", self.port)).await {
                return stream;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("could not connect to test server on port {}", self.port);
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.pool.stop_all();
        self.pool.join_all();
    }
}

/// Grabs a currently-free loopback port by binding port 0 and dropping the
/// listener.
fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("probe bind");
    listener.local_addr().expect("probe addr").port()
}

pub async fn send(stream: &mut TcpStream, data: &str) {
    stream.write_all(data.as_bytes()).await.expect("send");
}

/// Collects whatever the server writes within `window` of quiet time.
pub async fn read_for(stream: &mut TcpStream, window: Duration) -> String {
    let mut collected = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match tokio::time::timeout(window, stream.read(&mut chunk)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => collected.extend_from_slice(&chunk[..n]),
            Ok(Err(_)) | Err(_) => break,
        }
    }
    String::from_utf8_lossy(&collected).into_owned()
}

pub async fn read_reply(stream: &mut TcpStream) -> String {
    read_for(stream, Duration::from_millis(400)).await
}

/// True once the peer has closed the stream (read returns 0).
pub async fn reached_eof(stream: &mut TcpStream) -> bool {
    let mut chunk = [0u8; 256];
    for _ in 0..20 {
        match tokio::time::timeout(Duration::from_millis(100), stream.read(&mut chunk)).await {
            Ok(Ok(0)) => return true,
            Ok(Ok(_)) => continue,
            Ok(Err(_)) => return true,
            Err(_) => continue,
        }
    }
    false
}

/// Polls `cond` for up to five seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached within timeout");
}
