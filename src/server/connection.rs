// src/server/connection.rs

//! Per-client state and the connection task.
//!
//! A `Connection` is created at accept time, admitted into its worker's
//! table, and driven by `serve`: a select loop over the socket, the write
//! wake, and the close/stop signals. Everything but `flags`, the output
//! buffer, and the externally readable gauges is mutated on the owning
//! worker's thread.

use crate::core::clock::monotonic_secs;
use crate::core::commands::Dispatcher;
use crate::core::protocol::{parse_request, RespFrame};
use crate::server::guard::ConnectionGuard;
use crate::server::worker::WorkerCore;
use bitflags::bitflags;
use bytes::BytesMut;
use parking_lot::Mutex;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Notify};
use tracing::debug;

const READ_CHUNK: usize = 16 * 1024;

bitflags! {
    /// Connection flag bits. Stored in an atomic so admin threads (kill)
    /// never race the owning worker's reads.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConnFlags: u8 {
        /// Promoted into the monitor table.
        const MONITOR = 1 << 0;
        /// Tear down once the output buffer drains.
        const CLOSE_AFTER_REPLY = 1 << 1;
    }
}

/// One accepted TCP client and its server-side state.
pub struct Connection {
    fd: RawFd,
    /// Assigned at admission, before the connection is visible to any admin
    /// operation; unique process-wide, never reused.
    id: AtomicU64,
    addr: String,
    name: Mutex<String>,
    namespace: Mutex<String>,
    created_at: Instant,
    /// Monotonic seconds of the last framed command (or admission).
    last_interaction: AtomicU64,
    flags: AtomicU8,
    last_cmd: Mutex<String>,
    input: Mutex<BytesMut>,
    output: Mutex<BytesMut>,
    /// The "writable event": arming it wakes the task to drain `output`.
    write_wake: Notify,
    /// Removal signal; the serving task exits when it fires.
    close_tx: broadcast::Sender<()>,
    owner: Weak<WorkerCore>,
}

impl Connection {
    pub fn new(fd: RawFd, addr: String, namespace: String, owner: Weak<WorkerCore>) -> Self {
        let (close_tx, _) = broadcast::channel(1);
        Self {
            fd,
            id: AtomicU64::new(0),
            addr,
            name: Mutex::new(String::new()),
            namespace: Mutex::new(namespace),
            created_at: Instant::now(),
            last_interaction: AtomicU64::new(monotonic_secs()),
            flags: AtomicU8::new(ConnFlags::empty().bits()),
            last_cmd: Mutex::new(String::new()),
            input: Mutex::new(BytesMut::new()),
            output: Mutex::new(BytesMut::new()),
            write_wake: Notify::new(),
            close_tx,
            owner,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn id(&self) -> u64 {
        self.id.load(Ordering::Relaxed)
    }

    pub(crate) fn set_id(&self, id: u64) {
        self.id.store(id, Ordering::Relaxed);
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.lock() = name.to_string();
    }

    pub fn namespace(&self) -> String {
        self.namespace.lock().clone()
    }

    pub fn set_namespace(&self, namespace: &str) {
        *self.namespace.lock() = namespace.to_string();
    }

    pub fn last_cmd(&self) -> String {
        self.last_cmd.lock().clone()
    }

    /// Seconds since the connection was accepted.
    pub fn age(&self) -> u64 {
        self.created_at.elapsed().as_secs()
    }

    /// Seconds since the last framed command.
    pub fn idle(&self) -> u64 {
        monotonic_secs().saturating_sub(self.last_interaction.load(Ordering::Relaxed))
    }

    pub fn flags(&self) -> ConnFlags {
        ConnFlags::from_bits_truncate(self.flags.load(Ordering::Relaxed))
    }

    pub fn enable_flag(&self, flag: ConnFlags) {
        self.flags.fetch_or(flag.bits(), Ordering::Relaxed);
    }

    fn flags_str(&self) -> String {
        let flags = self.flags();
        let mut out = String::new();
        if flags.contains(ConnFlags::MONITOR) {
            out.push('M');
        }
        if flags.contains(ConnFlags::CLOSE_AFTER_REPLY) {
            out.push('c');
        }
        if out.is_empty() {
            out.push('N');
        }
        out
    }

    pub fn owner(&self) -> &Weak<WorkerCore> {
        &self.owner
    }

    /// Bytes waiting in the input/output queues; the `qbuf`/`obuf` gauges.
    pub fn queued_input(&self) -> usize {
        self.input.lock().len()
    }

    pub fn queued_output(&self) -> usize {
        self.output.lock().len()
    }

    /// Appends raw reply bytes and arms the writable event.
    pub fn write_reply(&self, bytes: &[u8]) {
        self.output.lock().extend_from_slice(bytes);
        self.write_wake.notify_one();
    }

    /// Encodes a frame straight into the output buffer and arms the
    /// writable event.
    pub fn write_frame(&self, frame: RespFrame) {
        {
            let mut output = self.output.lock();
            frame.write_to(&mut output);
        }
        self.write_wake.notify_one();
    }

    /// Arms the writable event without queueing anything new.
    pub fn wake_write(&self) {
        self.write_wake.notify_one();
    }

    /// Signals the serving task to exit; the socket closes when the task
    /// drops it. Called by the owning worker on removal.
    pub(crate) fn begin_close(&self) {
        let _ = self.close_tx.send(());
    }

    /// One `CLIENT LIST` line for this connection, newline-terminated.
    pub fn describe(&self) -> String {
        format!(
            "id={} addr={} fd={} name={} age={} idle={} flags={} namespace={} qbuf={} obuf={} cmd={}\n",
            self.id(),
            self.addr,
            self.fd,
            self.name.lock(),
            self.age(),
            self.idle(),
            self.flags_str(),
            self.namespace.lock(),
            self.queued_input(),
            self.queued_output(),
            self.last_cmd.lock(),
        )
    }

    fn close_requested(&self) -> bool {
        self.flags().contains(ConnFlags::CLOSE_AFTER_REPLY) && self.output.lock().is_empty()
    }

    /// The connection task: reads, frames, dispatches, and drains until the
    /// peer goes away, an admin removes us, or the worker stops.
    pub async fn serve(
        self: Arc<Self>,
        stream: TcpStream,
        dispatcher: Arc<dyn Dispatcher>,
        mut stop_rx: broadcast::Receiver<()>,
    ) {
        let _guard = ConnectionGuard::new(self.clone());
        let mut close_rx = self.close_tx.subscribe();
        let (mut reader, mut writer) = stream.into_split();
        let mut chunk = vec![0u8; READ_CHUNK];

        loop {
            tokio::select! {
                biased;
                _ = stop_rx.recv() => break,
                _ = close_rx.recv() => break,
                _ = self.write_wake.notified() => {
                    if self.flush_output(&mut writer).await.is_err() {
                        break;
                    }
                    if self.close_requested() {
                        break;
                    }
                }
                read = reader.read(&mut chunk) => {
                    match read {
                        Ok(0) => {
                            debug!(client = self.id(), addr = %self.addr, "peer closed");
                            break;
                        }
                        Ok(n) => {
                            self.input.lock().extend_from_slice(&chunk[..n]);
                            Self::drain_requests(&self, &dispatcher).await;
                            if self.flush_output(&mut writer).await.is_err() {
                                break;
                            }
                            if self.close_requested() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!(client = self.id(), addr = %self.addr, error = %e, "read error");
                            break;
                        }
                    }
                }
            }
        }
        // _guard removes us from the owner's table on the way out.
    }

    /// Frames and dispatches every complete command currently buffered.
    /// Framing errors are answered in-band and flag the connection to close
    /// once the error reply drains.
    async fn drain_requests(conn: &Arc<Self>, dispatcher: &Arc<dyn Dispatcher>) {
        loop {
            let parsed = {
                let mut input = conn.input.lock();
                parse_request(&mut input)
            };
            match parsed {
                Ok(Some(tokens)) => {
                    if tokens.is_empty() {
                        continue;
                    }
                    conn.last_interaction
                        .store(monotonic_secs(), Ordering::Relaxed);
                    *conn.last_cmd.lock() =
                        String::from_utf8_lossy(&tokens[0]).to_ascii_lowercase();
                    let namespace = conn.namespace();
                    dispatcher.dispatch(conn, &namespace, tokens).await;
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(client = conn.id(), addr = %conn.addr, error = %e, "protocol error");
                    conn.write_frame(RespFrame::Error(e.to_string()));
                    conn.enable_flag(ConnFlags::CLOSE_AFTER_REPLY);
                    break;
                }
            }
        }
    }

    /// Writes the output buffer to the socket. Bytes are taken out under
    /// the lock but written outside it, looping in case a reply lands while
    /// a previous batch is in flight.
    async fn flush_output(&self, writer: &mut OwnedWriteHalf) -> std::io::Result<()> {
        loop {
            let pending = {
                let mut output = self.output.lock();
                if output.is_empty() {
                    return Ok(());
                }
                output.split()
            };
            writer.write_all(&pending).await?;
        }
    }
}

#[cfg(test)]
impl Connection {
    /// Rewinds `last_interaction` so idle-kick tests need not sleep.
    pub(crate) fn force_idle(&self, secs: u64) {
        self.last_interaction
            .store(monotonic_secs().saturating_sub(secs), Ordering::Relaxed);
    }

    /// Drains the output buffer for inspection.
    pub(crate) fn take_output(&self) -> BytesMut {
        self.output.lock().split()
    }
}
