//! The master loop: a single thread multiplexes the listening socket, the
//! shutdown self-pipe, and every connected client with `libc::poll`,
//! handing each readable client off to the worker pool and waiting to hear
//! back over a second self-pipe before re-arming it. This is the direct
//! translation of `server.c`'s `select()` loop — same three-way fan-in,
//! same remove-from-set/submit-task/re-add-on-reply protocol — with
//! `poll` standing in for `select` and OS threads blocking on I/O standing
//! in for the cooperative tasks an async runtime would use, per this
//! project's choice to keep the concurrency model thread-per-request
//! rather than adopt one of the teacher's async executors.

use std::collections::HashMap;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use storage_core::{ConnectionId, Storage};
use tracing::{Level, event};

use crate::audit_log::AuditLog;
use crate::connections::Connections;
use crate::handlers::{self, PipeSignal};
use crate::signals::{ShutdownKind, SignalChannel};
use crate::worker_pool::WorkerPool;

/// Tag byte identifying a [`PipeSignal`] variant on the worker→master pipe.
const TAG_READY: u8 = 0;
const TAG_DROPPED: u8 = 1;
const FRAME_LEN: usize = 9; // 1 tag byte + 8 little-endian id bytes.

fn encode(signal: PipeSignal) -> [u8; FRAME_LEN] {
    let (tag, id) = match signal {
        PipeSignal::Ready(conn) => (TAG_READY, conn.0),
        PipeSignal::Dropped(conn) => (TAG_DROPPED, conn.0),
    };
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = tag;
    frame[1..].copy_from_slice(&id.to_le_bytes());
    frame
}

struct WorkerPipe {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl WorkerPipe {
    fn new() -> std::io::Result<Self> {
        let mut fds = [0i32; 2];
        // SAFETY: `fds` is a valid 2-element buffer for `pipe` to fill.
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Self { read_fd: fds[0], write_fd: fds[1] })
    }

    /// Drains every complete frame currently queued, decoding each back
    /// into a [`PipeSignal`]. The read end is non-blocking so this returns
    /// as soon as the pipe is empty instead of waiting for more.
    fn drain(&self) -> Vec<PipeSignal> {
        let mut signals = Vec::new();
        let mut buf = [0u8; FRAME_LEN];
        loop {
            // SAFETY: `buf` is a valid `FRAME_LEN`-byte buffer.
            let n = unsafe { libc::read(self.read_fd, buf.as_mut_ptr().cast(), FRAME_LEN) };
            if n != FRAME_LEN as isize {
                break;
            }
            let id = ConnectionId(u64::from_le_bytes(buf[1..].try_into().expect("8 bytes")));
            signals.push(match buf[0] {
                TAG_READY => PipeSignal::Ready(id),
                _ => PipeSignal::Dropped(id),
            });
        }
        signals
    }
}

impl Drop for WorkerPipe {
    fn drop(&mut self) {
        // SAFETY: both fds are owned exclusively by this struct.
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

fn set_nonblocking(fd: RawFd) {
    // SAFETY: `fd` is a valid, open file descriptor for the lifetime of this call.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
    }
}

/// Drives the accept/serve loop until a hard shutdown is requested (or a
/// soft shutdown drains to zero connected clients).
pub struct Dispatcher {
    listener: UnixListener,
    signals: SignalChannel,
    storage: Arc<Storage>,
    connections: Arc<Connections>,
    audit: Arc<AuditLog>,
    pool: WorkerPool,
    worker_pipe: WorkerPipe,
    next_conn_id: AtomicU64,
    /// Every live connection's fd, kept for the connection's whole lifetime
    /// regardless of whether it is currently registered for polling.
    conn_fds: HashMap<ConnectionId, RawFd>,
    fd_to_conn: HashMap<RawFd, ConnectionId>,
    /// The subset of `conn_fds` currently armed in the poll set; a
    /// connection is removed from here while a worker is serving it.
    polled: HashMap<ConnectionId, RawFd>,
    connected_clients: usize,
}

impl Dispatcher {
    pub fn new(listener: UnixListener, signals: SignalChannel, storage: Arc<Storage>, connections: Arc<Connections>, audit: Arc<AuditLog>, pool: WorkerPool) -> std::io::Result<Self> {
        set_nonblocking(listener.as_raw_fd());
        let worker_pipe = WorkerPipe::new()?;
        set_nonblocking(worker_pipe.read_fd);
        Ok(Self {
            listener,
            signals,
            storage,
            connections,
            audit,
            pool,
            worker_pipe,
            next_conn_id: AtomicU64::new(1),
            conn_fds: HashMap::new(),
            fd_to_conn: HashMap::new(),
            polled: HashMap::new(),
            connected_clients: 0,
        })
    }

    pub fn run(&mut self) {
        let mut listener_open = true;
        let mut poll_fds: Vec<libc::pollfd> = Vec::new();

        loop {
            poll_fds.clear();
            if listener_open {
                poll_fds.push(pollfd_for(self.listener.as_raw_fd()));
            }
            poll_fds.push(pollfd_for(self.signals.read_fd));
            poll_fds.push(pollfd_for(self.worker_pipe.read_fd));
            for &fd in self.polled.values() {
                poll_fds.push(pollfd_for(fd));
            }

            // SAFETY: `poll_fds` is a valid array of `pollfd` for its length;
            // a negative timeout blocks until at least one fd is ready.
            let ready = unsafe { libc::poll(poll_fds.as_mut_ptr(), poll_fds.len() as libc::nfds_t, -1) };
            if ready < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                event!(Level::ERROR, message = "poll failed", error = %err);
                return;
            }

            for entry in &poll_fds {
                if entry.revents == 0 {
                    continue;
                }
                if listener_open && entry.fd == self.listener.as_raw_fd() {
                    self.accept_all();
                } else if entry.fd == self.signals.read_fd {
                    match self.signals.recv() {
                        Ok(ShutdownKind::Hard) => return,
                        Ok(ShutdownKind::Soft) => {
                            listener_open = false;
                            event!(Level::INFO, message = "soft shutdown requested, no longer accepting connections");
                            if self.connected_clients == 0 {
                                return;
                            }
                        }
                        Err(err) => event!(Level::WARN, message = "failed to read shutdown signal", error = %err),
                    }
                } else if entry.fd == self.worker_pipe.read_fd {
                    self.apply_worker_signals();
                } else {
                    self.dispatch_client(entry.fd);
                }
            }

            if !listener_open && self.connected_clients == 0 {
                return;
            }
        }
    }

    fn accept_all(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    let conn = ConnectionId(self.next_conn_id.fetch_add(1, Ordering::Relaxed));
                    let fd = stream.as_raw_fd();
                    self.storage.register_client(conn);
                    self.connections.insert(conn, stream);
                    self.conn_fds.insert(conn, fd);
                    self.fd_to_conn.insert(fd, conn);
                    self.polled.insert(conn, fd);
                    self.connected_clients += 1;
                    event!(Level::DEBUG, message = "accepted connection", conn = conn.0);
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    event!(Level::WARN, message = "accept failed", error = %err);
                    break;
                }
            }
        }
    }

    fn dispatch_client(&mut self, fd: RawFd) {
        let Some(&conn) = self.fd_to_conn.get(&fd) else {
            return;
        };
        // Stop polling this connection until the worker reports back,
        // mirroring the original clearing the fd from its `select` set.
        self.polled.remove(&conn);

        let storage = Arc::clone(&self.storage);
        let connections = Arc::clone(&self.connections);
        let audit = Arc::clone(&self.audit);
        let reply_write_fd = self.worker_pipe.write_fd;

        let submitted = self.pool.try_submit(move || {
            let signals = handlers::handle_one(&storage, &connections, &audit, conn);
            let pipe = BorrowedWriteEnd { fd: reply_write_fd };
            for signal in signals {
                let _ = pipe.send(signal);
            }
        });

        if submitted.is_err() {
            // Worker pool saturated: serve this one request inline with
            // TEMPORARILY_UNAVAILABLE, the same fallback `threadpool_add`
            // returning 1 triggers in the original.
            if let Some(stream) = self.connections.get(conn) {
                let mut guard = stream.lock();
                if handlers::reject_overloaded(&mut *guard).is_err() {
                    drop(guard);
                    self.finish_dropped(conn);
                    return;
                }
            }
            self.polled.insert(conn, fd);
        }
    }

    fn apply_worker_signals(&mut self) {
        for signal in self.worker_pipe.drain() {
            match signal {
                PipeSignal::Ready(conn) => {
                    if let Some(&fd) = self.conn_fds.get(&conn) {
                        self.polled.insert(conn, fd);
                    }
                }
                PipeSignal::Dropped(conn) => self.finish_dropped(conn),
            }
        }
    }

    fn finish_dropped(&mut self, conn: ConnectionId) {
        self.polled.remove(&conn);
        if let Some(fd) = self.conn_fds.remove(&conn) {
            self.fd_to_conn.remove(&fd);
        }
        self.connected_clients = self.connected_clients.saturating_sub(1);
    }
}

fn pollfd_for(fd: RawFd) -> libc::pollfd {
    libc::pollfd { fd, events: libc::POLLIN, revents: 0 }
}

/// A plain `write(2)` over a raw fd the worker closure owns for its
/// lifetime; it does not own (and must not close) the fd itself, which
/// belongs to [`WorkerPipe`].
struct BorrowedWriteEnd {
    fd: RawFd,
}

impl BorrowedWriteEnd {
    fn send(&self, signal: PipeSignal) -> std::io::Result<()> {
        let frame = encode(signal);
        // SAFETY: `frame` is a valid, fully-initialized `FRAME_LEN`-byte
        // buffer; the fd outlives this call because `WorkerPipe` is not
        // dropped while any submitted job can still run.
        let n = unsafe { libc::write(self.fd, frame.as_ptr().cast(), FRAME_LEN) };
        if n as usize != FRAME_LEN {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }
}
