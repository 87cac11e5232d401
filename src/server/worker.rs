// src/server/worker.rs

//! Event-loop workers.
//!
//! Each worker is one OS thread running a single-threaded tokio runtime: it
//! binds its own listeners (SO_REUSEPORT lets the whole pool share a port),
//! owns a table of connections keyed by fd, runs the idle-eviction cron,
//! and serializes admin operations against its tables behind one mutex.
//! Connection I/O itself never takes that mutex.

use crate::config::Config;
use crate::core::commands::Dispatcher;
use crate::core::protocol::RespFrame;
use crate::core::{StrataError, DEFAULT_NAMESPACE};
use crate::server::connection::{ConnFlags, Connection};
use crate::server::monitor::visible_to;
use crate::server::registry::ClientRegistry;
use bytes::BytesMut;
use parking_lot::Mutex;
use socket2::{SockRef, TcpKeepalive};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::ops::Bound;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Cadence of the per-worker cron driving idle eviction.
pub const CRON_INTERVAL: Duration = Duration::from_secs(10);
/// Upper bound on connections visited per idle-eviction tick.
pub const IDLE_SCAN_BATCH: usize = 50;

const ACCEPT_QUEUE: usize = 64;

/// Selection criteria for `CLIENT KILL`: a connection matches on address
/// or on id (whichever is present).
#[derive(Debug, Clone, PartialEq)]
pub struct KillFilter {
    pub id: Option<u64>,
    pub addr: Option<String>,
    /// Spare the issuing connection itself.
    pub skipme: bool,
}

impl Default for KillFilter {
    fn default() -> Self {
        Self {
            id: None,
            addr: None,
            skipme: true,
        }
    }
}

impl KillFilter {
    fn matches(&self, conn: &Connection) -> bool {
        let by_addr = self.addr.as_deref() == Some(conn.addr());
        let by_id = self.id == Some(conn.id());
        by_addr || by_id
    }
}

/// The two fd-keyed tables plus the idle-scan cursor, guarded together.
/// A connection lives in exactly one of the tables until removal.
struct ConnTables {
    conns: BTreeMap<RawFd, Arc<Connection>>,
    monitors: BTreeMap<RawFd, Arc<Connection>>,
    cursor_fd: RawFd,
}

/// Shared half of a worker: everything admin operations and connection
/// tasks need, independent of the thread driving the event loop.
pub struct WorkerCore {
    repl: bool,
    tables: Mutex<ConnTables>,
    registry: Arc<ClientRegistry>,
    config: Arc<Config>,
    stop_tx: broadcast::Sender<()>,
}

impl WorkerCore {
    pub fn new(repl: bool, registry: Arc<ClientRegistry>, config: Arc<Config>) -> Arc<Self> {
        let (stop_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            repl,
            tables: Mutex::new(ConnTables {
                conns: BTreeMap::new(),
                monitors: BTreeMap::new(),
                cursor_fd: 0,
            }),
            registry,
            config,
            stop_tx,
        })
    }

    pub fn is_repl(&self) -> bool {
        self.repl
    }

    /// Breaks the event loop; listeners close and the thread winds down.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(());
    }

    fn subscribe_stop(&self) -> broadcast::Receiver<()> {
        self.stop_tx.subscribe()
    }

    /// Admits a connection: duplicate-fd check, cap check, id assignment,
    /// table insertion — all under the table lock. The id is assigned
    /// before insertion so no admin operation ever sees an id-less client.
    pub fn admit(&self, conn: &Arc<Connection>) -> Result<(), StrataError> {
        let mut tables = self.tables.lock();
        if tables.conns.contains_key(&conn.fd()) || tables.monitors.contains_key(&conn.fd()) {
            return Err(StrataError::AcceptRejected(
                "connection already exists".to_string(),
            ));
        }
        if self.registry.incr_clients() > self.config.max_clients {
            self.registry.decr_clients();
            return Err(StrataError::AcceptRejected(
                "max number of clients reached".to_string(),
            ));
        }
        conn.set_id(self.registry.next_client_id());
        tables.conns.insert(conn.fd(), conn.clone());
        Ok(())
    }

    /// Removes whichever table holds `fd`, adjusts the counters, and
    /// signals the connection's task to exit (closing the socket).
    pub fn remove(&self, fd: RawFd) {
        let evicted = {
            let mut tables = self.tables.lock();
            if let Some(conn) = tables.conns.remove(&fd) {
                self.registry.decr_clients();
                Some(conn)
            } else if let Some(conn) = tables.monitors.remove(&fd) {
                self.registry.decr_clients();
                self.registry.decr_monitor_clients();
                Some(conn)
            } else {
                None
            }
        };
        if let Some(conn) = evicted {
            debug!(fd, client = conn.id(), "connection removed");
            conn.begin_close();
        }
    }

    /// `remove`, but only when the resident connection still carries `id`.
    /// Shields scheduled kills from fd reuse.
    pub fn remove_if_id(&self, fd: RawFd, id: u64) {
        let evicted = {
            let mut tables = self.tables.lock();
            let matches = |table: &BTreeMap<RawFd, Arc<Connection>>| {
                table.get(&fd).is_some_and(|c| c.id() == id)
            };
            if matches(&tables.conns) {
                let conn = tables.conns.remove(&fd);
                self.registry.decr_clients();
                conn
            } else if matches(&tables.monitors) {
                let conn = tables.monitors.remove(&fd);
                self.registry.decr_clients();
                self.registry.decr_monitor_clients();
                conn
            } else {
                None
            }
        };
        if let Some(conn) = evicted {
            debug!(fd, client = id, "connection removed");
            conn.begin_close();
        }
    }

    /// Arms the writable event on a connection; for handlers that produced
    /// output from a non-owning thread.
    pub fn enable_write(&self, fd: RawFd) -> Result<(), StrataError> {
        let tables = self.tables.lock();
        match tables.conns.get(&fd) {
            Some(conn) => {
                conn.wake_write();
                Ok(())
            }
            None => Err(StrataError::ConnectionGone),
        }
    }

    /// Appends reply bytes to a connection's output buffer and arms the
    /// writable event; the offload completion path.
    pub fn reply(&self, fd: RawFd, bytes: &[u8]) -> Result<(), StrataError> {
        let tables = self.tables.lock();
        match tables.conns.get(&fd) {
            Some(conn) => {
                conn.write_reply(bytes);
                Ok(())
            }
            None => Err(StrataError::ConnectionGone),
        }
    }

    /// Moves a connection from the normal table into the monitor table.
    /// The count only moves on an actual transition, so a repeated MONITOR
    /// is harmless.
    pub fn promote_to_monitor(&self, conn: &Arc<Connection>) {
        let promoted = {
            let mut tables = self.tables.lock();
            match tables.conns.remove(&conn.fd()) {
                Some(resident) => {
                    tables.monitors.insert(conn.fd(), resident);
                    true
                }
                None => false,
            }
        };
        if promoted {
            self.registry.incr_monitor_clients();
            debug!(client = conn.id(), addr = %conn.addr(), "promoted to monitor");
        }
        conn.enable_flag(ConnFlags::MONITOR);
    }

    /// Delivers a composed feed line to every local monitor the source is
    /// visible to, skipping the source itself.
    pub fn feed_monitors(&self, source_id: u64, source_namespace: &str, line: &str) {
        let tables = self.tables.lock();
        for monitor in tables.monitors.values() {
            if monitor.id() == source_id {
                continue;
            }
            if visible_to(&monitor.namespace(), source_namespace) {
                monitor.write_frame(RespFrame::SimpleString(line.to_string()));
            }
        }
    }

    /// One `CLIENT LIST` line per connection in the normal table.
    pub fn list_clients(&self) -> String {
        let tables = self.tables.lock();
        let mut listing = String::new();
        for conn in tables.conns.values() {
            listing.push_str(&conn.describe());
        }
        listing
    }

    /// Flags every matching connection to close once its replies drain and
    /// arms its writable event so the removal happens promptly. Returns the
    /// match count.
    pub fn kill(&self, filter: &KillFilter, self_id: u64) -> i64 {
        let tables = self.tables.lock();
        let mut killed = 0;
        for conn in tables.conns.values() {
            if filter.skipme && conn.id() == self_id {
                continue;
            }
            if filter.matches(conn) {
                conn.enable_flag(ConnFlags::CLOSE_AFTER_REPLY);
                conn.wake_write();
                killed += 1;
            }
        }
        killed
    }

    /// Bounded idle eviction: visits at most `IDLE_SCAN_BATCH` connections
    /// starting strictly after the cursor (wrapping), collects the stale
    /// ones, and removes them outside the lock via `remove_if_id`. A table
    /// that fits in one batch is scanned fully and the cursor reset.
    pub fn kick_idle_clients(&self, timeout_secs: u64) {
        if timeout_secs == 0 {
            return;
        }
        let mut stale = Vec::new();
        {
            let mut tables = self.tables.lock();
            if tables.conns.is_empty() {
                tables.cursor_fd = 0;
                return;
            }
            let budget = tables.conns.len().min(IDLE_SCAN_BATCH);
            let full_scan = budget == tables.conns.len();
            let cursor = tables.cursor_fd;
            let mut last_visited = cursor;
            let after = tables
                .conns
                .range((Bound::Excluded(cursor), Bound::Unbounded));
            let wrapped = tables.conns.range(..=cursor);
            for (&fd, conn) in after.chain(wrapped).take(budget) {
                if conn.idle() >= timeout_secs {
                    stale.push((fd, conn.id()));
                }
                last_visited = fd;
            }
            tables.cursor_fd = if full_scan { 0 } else { last_visited };
        }
        if !stale.is_empty() {
            debug!(count = stale.len(), repl = self.repl, "evicting idle clients");
        }
        for (fd, id) in stale {
            self.remove_if_id(fd, id);
        }
    }

    /// Empties both tables, signalling every connection's task. Runs when
    /// the event loop exits; pending replies are lost best-effort.
    fn purge_connections(&self) {
        let fds: Vec<RawFd> = {
            let tables = self.tables.lock();
            tables
                .conns
                .keys()
                .chain(tables.monitors.keys())
                .copied()
                .collect()
        };
        for fd in fds {
            self.remove(fd);
        }
    }

    /// Creates, configures, and binds this worker's listening sockets.
    /// SO_REUSEADDR and SO_REUSEPORT are both required: the latter lets
    /// every worker in the pool bind the same port and have the kernel
    /// spread accepts across them.
    fn bind_listeners(&self) -> Result<Vec<TcpSocket>, StrataError> {
        let (port, binds) = if self.repl {
            (self.config.repl_port, &self.config.repl_binds)
        } else {
            (self.config.port, &self.config.binds)
        };
        let mut sockets = Vec::with_capacity(binds.len());
        for bind in binds {
            let addr: SocketAddr = format!("{bind}:{port}")
                .parse()
                .map_err(|e| StrataError::ListenFailed(format!("{bind}:{port}: {e}")))?;
            let socket = if addr.is_ipv4() {
                TcpSocket::new_v4()
            } else {
                TcpSocket::new_v6()
            }
            .map_err(|e| StrataError::ListenFailed(format!("{addr}: {e}")))?;
            socket
                .set_reuseaddr(true)
                .map_err(|e| StrataError::ListenFailed(format!("{addr}: {e}")))?;
            #[cfg(unix)]
            socket
                .set_reuseport(true)
                .map_err(|e| StrataError::ListenFailed(format!("{addr}: {e}")))?;
            socket
                .bind(addr)
                .map_err(|e| StrataError::ListenFailed(format!("{addr}: {e}")))?;
            sockets.push(socket);
        }
        Ok(sockets)
    }

    /// The worker's event loop: funnels accepts from every listener, runs
    /// the cron, and reaps finished connection tasks until stopped.
    async fn event_loop(self: Arc<Self>, sockets: Vec<TcpSocket>, dispatcher: Arc<dyn Dispatcher>) {
        let mut stop_rx = self.subscribe_stop();
        let (accept_tx, mut accept_rx) = mpsc::channel::<(TcpStream, SocketAddr)>(ACCEPT_QUEUE);
        let mut acceptors = JoinSet::new();

        for socket in sockets {
            let listener = match socket.listen(self.config.backlog) {
                Ok(listener) => listener,
                Err(e) => {
                    error!("failed to listen: {e}");
                    std::process::exit(1);
                }
            };
            if let Ok(local) = listener.local_addr() {
                info!(addr = %local, repl = self.repl, "worker listening");
            }
            let tx = accept_tx.clone();
            let mut acceptor_stop = self.subscribe_stop();
            acceptors.spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        _ = acceptor_stop.recv() => break,
                        accepted = listener.accept() => match accepted {
                            Ok(pair) => {
                                if tx.send(pair).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("accept error: {e}"),
                        }
                    }
                }
            });
        }
        drop(accept_tx);

        let mut cron = tokio::time::interval(CRON_INTERVAL);
        let mut sessions: JoinSet<()> = JoinSet::new();
        loop {
            tokio::select! {
                biased;
                _ = stop_rx.recv() => break,
                _ = cron.tick() => {
                    self.kick_idle_clients(self.config.timeout_seconds);
                }
                accepted = accept_rx.recv() => match accepted {
                    Some((stream, peer)) => {
                        Self::handle_accept(&self, stream, peer, &dispatcher, &mut sessions).await;
                    }
                    None => break,
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("connection task panicked: {e:?}");
                        }
                    }
                }
            }
        }

        acceptors.shutdown().await;
        self.purge_connections();
        sessions.shutdown().await;
        debug!(repl = self.repl, "worker event loop stopped");
    }

    /// Wraps an accepted socket in a `Connection` and admits it. Rejections
    /// get exactly one RESP error before the socket closes.
    async fn handle_accept(
        core: &Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
        dispatcher: &Arc<dyn Dispatcher>,
        sessions: &mut JoinSet<()>,
    ) {
        let keepalive = TcpKeepalive::new()
            .with_time(Duration::from_secs(60))
            .with_interval(Duration::from_secs(10));
        if let Err(e) = SockRef::from(&stream).set_tcp_keepalive(&keepalive) {
            warn!(addr = %peer, "failed to set tcp keep-alive: {e}");
            return;
        }

        let fd = stream.as_raw_fd();
        let namespace = if core.config.requirepass.is_some() {
            String::new()
        } else {
            DEFAULT_NAMESPACE.to_string()
        };
        let conn = Arc::new(Connection::new(
            fd,
            peer.to_string(),
            namespace,
            Arc::downgrade(core),
        ));
        debug!(fd, addr = %peer, repl = core.repl, "new connection");

        match core.admit(&conn) {
            Ok(()) => {
                let stop_rx = core.subscribe_stop();
                sessions.spawn(conn.serve(stream, dispatcher.clone(), stop_rx));
            }
            Err(e) => {
                let mut buf = BytesMut::new();
                RespFrame::Error(e.to_string()).write_to(&mut buf);
                let mut stream = stream;
                let _ = stream.write_all(&buf).await;
                debug!(fd, addr = %peer, "connection rejected: {e}");
            }
        }
    }
}

/// One worker: a shared core plus the thread that drives its event loop.
pub struct Worker {
    core: Arc<WorkerCore>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Worker {
    pub fn new(core: Arc<WorkerCore>) -> Self {
        Self { core, thread: None }
    }

    pub fn core(&self) -> &Arc<WorkerCore> {
        &self.core
    }

    /// Binds the listeners (failures here are fatal to startup) and spawns
    /// the event-loop thread.
    pub fn start(&mut self, dispatcher: Arc<dyn Dispatcher>) -> Result<(), StrataError> {
        let core = self.core.clone();
        let sockets = core.bind_listeners()?;
        let name = if core.is_repl() { "repl-worker" } else { "worker" };
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("failed to build worker runtime: {e}");
                        std::process::exit(1);
                    }
                };
                runtime.block_on(core.event_loop(sockets, dispatcher));
            })
            .map_err(StrataError::Io)?;
        info!(name, "worker thread started");
        self.thread = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.core.stop();
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}
