//! Bridges the wire protocol (`storage-wire`) to the storage engine
//! (`storage-core`): reads one request off a connection's socket, drives
//! `Storage`, writes the response, and delivers any notifications the
//! operation produced to other connections' sockets.
//!
//! `storage-core` has no notion of response codes or sockets; this module is
//! where `StorageError` becomes a `ResponseCode` and where a `Notification`
//! becomes a frame written to someone else's stream.

use std::collections::VecDeque;
use std::os::unix::net::UnixStream;

use storage_core::{ConnectionId, Notification, OpOutcome, OpResult, OpenMode, Storage, StorageError, StorageResult, Success};
use storage_wire::{FileBlob, OkBody, Opcode, Request, ResponseCode, WireResult, codec};
use tracing::{Level, event};

use crate::audit_log::{AuditLog, LogRecord};
use crate::connections::Connections;

/// What a worker reports back to the dispatcher after handling one request
/// (and any notifications it triggered), mirroring the positive/negative
/// integers the original writes into the worker→master pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeSignal {
    /// Re-arm this connection's socket for the next request.
    Ready(ConnectionId),
    /// This connection is gone; the master should decrement its count.
    Dropped(ConnectionId),
}

/// Serves exactly one request for `conn`. Always returns at least one
/// signal for `conn` itself (`Ready` or `Dropped`), plus one signal per
/// other connection whose pending lock/notification was resolved as a
/// side effect.
pub fn handle_one(storage: &Storage, connections: &Connections, audit: &AuditLog, conn: ConnectionId) -> Vec<PipeSignal> {
    let Some(stream) = connections.get(conn) else {
        return Vec::new();
    };

    let read_result = {
        let mut guard = stream.lock();
        codec::read_request(&mut *guard)
    };

    let (opcode, request) = match read_result {
        Ok(pair) => pair,
        Err(storage_wire::WireError::UnrecognizedOpcode(byte)) => {
            event!(Level::WARN, message = "unrecognized opcode, closing connection", conn = conn.0, byte);
            let mut guard = stream.lock();
            let _ = codec::write_response(&mut *guard, ResponseCode::NotRecognizedOp, &OkBody::Empty);
            drop(guard);
            return drop_connection(storage, connections, audit, conn);
        }
        Err(_) => return drop_connection(storage, connections, audit, conn),
    };

    let outcome = dispatch(storage, conn, &request);
    let mut signals = Vec::new();

    match outcome {
        Ok(OpResult { outcome: OpOutcome::Ok(success), notifications }) => {
            log_success(audit, storage, conn, &request);
            let body = ok_body(opcode, success);
            let write_result = {
                let mut guard = stream.lock();
                codec::write_response(&mut *guard, ResponseCode::Ok, &body)
            };
            signals.push(outcome_signal(storage, connections, audit, conn, write_result));
            signals.extend(deliver(storage, connections, audit, notifications));
        }
        Ok(OpResult { outcome: OpOutcome::Deferred, notifications }) => {
            event!(Level::DEBUG, message = "request deferred pending lock hand-off", conn = conn.0, path = request.path());
            audit.record(
                thread_id(),
                &LogRecord { operation: operation_name(&request).to_owned(), outcome: "WAITING".to_owned(), client_id: conn.0.to_string(), file: request.path().unwrap_or_default().to_owned(), ..Default::default() },
            );
            // No response is sent: the socket stays unregistered until hand-off writes one.
            signals.extend(deliver(storage, connections, audit, notifications));
        }
        Err(err) => {
            let code = response_code_for(&err);
            event!(Level::DEBUG, message = "request rejected", conn = conn.0, error = %err);
            audit.record(
                thread_id(),
                &LogRecord { operation: operation_name(&request).to_owned(), outcome: format!("{code:?}"), client_id: conn.0.to_string(), file: request.path().unwrap_or_default().to_owned(), ..Default::default() },
            );
            let write_result = {
                let mut guard = stream.lock();
                codec::write_response(&mut *guard, code, &OkBody::Empty)
            };
            signals.push(outcome_signal(storage, connections, audit, conn, write_result));
        }
    }

    signals
}

fn dispatch(storage: &Storage, conn: ConnectionId, request: &Request) -> StorageResult<OpResult> {
    match request {
        Request::Open { path, create, lock } => storage.open(conn, path, open_mode(*create, *lock)),
        Request::Write { path, content } => storage.write(conn, path, content.clone()),
        Request::Append { path, content } => storage.append(conn, path, content.clone()),
        Request::Read { path } => storage.read(conn, path),
        Request::ReadMany { count } => storage.read_many(conn, *count),
        Request::Lock { path } => storage.lock(conn, path),
        Request::Unlock { path } => storage.unlock(conn, path),
        Request::Remove { path } => storage.remove(conn, path),
        Request::Close { path } => storage.close(conn, path),
    }
}

fn open_mode(create: bool, lock: bool) -> OpenMode {
    match (create, lock) {
        (false, false) => OpenMode::Plain,
        (true, false) => OpenMode::Create,
        (false, true) => OpenMode::Lock,
        (true, true) => OpenMode::CreateLock,
    }
}

fn ok_body(opcode: Opcode, success: Success) -> OkBody {
    match success {
        Success::Empty => OkBody::Empty,
        Success::Content(bytes) => OkBody::Content(bytes),
        Success::Many(files) => OkBody::Many(files.into_iter().map(|(path, content)| FileBlob::new(path, content)).collect()),
        Success::Written { evicted } => {
            debug_assert!(matches!(opcode, Opcode::Write | Opcode::Append));
            OkBody::Evicted(evicted.into_iter().map(|file| FileBlob::new(file.path, file.content)).collect())
        }
    }
}

pub fn response_code_for(err: &StorageError) -> ResponseCode {
    match err {
        StorageError::InvalidPath(_) => ResponseCode::InvalidPath,
        StorageError::TooLongPath(_) => ResponseCode::TooLongPath,
        StorageError::FileAlreadyExists(_) => ResponseCode::FileAlreadyExists,
        StorageError::FileNotExists(_) => ResponseCode::FileNotExists,
        StorageError::FileAlreadyOpen(_) => ResponseCode::FileAlreadyOpen,
        StorageError::FileAlreadyLocked(_) => ResponseCode::FileAlreadyLocked,
        StorageError::OperationNotPermitted(_) => ResponseCode::OperationNotPermitted,
        StorageError::TooLongContent { .. } => ResponseCode::TooLongContent,
        StorageError::CouldNotEvict(_) => ResponseCode::CouldNotEvict,
        // `StorageError` is `#[non_exhaustive]`; any future variant still needs a code.
        _ => ResponseCode::OperationNotPermitted,
    }
}

/// Turns the result of writing `conn`'s own response into the signal the
/// dispatcher needs, running disconnect recovery on write failure.
fn outcome_signal(storage: &Storage, connections: &Connections, audit: &AuditLog, conn: ConnectionId, write_result: WireResult<()>) -> PipeSignal {
    if write_result.is_ok() {
        return PipeSignal::Ready(conn);
    }
    let extra = drop_connection(storage, connections, audit, conn);
    debug_assert!(extra.iter().any(|s| *s == PipeSignal::Dropped(conn)));
    PipeSignal::Dropped(conn)
}

/// Removes `conn` from the connection table and runs `Storage::disconnect`,
/// delivering any hand-off notifications it produces. Returns every signal
/// this triggered, `conn`'s own `Dropped` included.
fn drop_connection(storage: &Storage, connections: &Connections, audit: &AuditLog, conn: ConnectionId) -> Vec<PipeSignal> {
    connections.remove(conn);
    event!(Level::DEBUG, message = "connection disconnected", conn = conn.0);
    audit.record(thread_id(), &LogRecord { operation: "DISCONNECT".to_owned(), outcome: "CLOSED_CONNECTION".to_owned(), client_id: conn.0.to_string(), ..Default::default() });
    let notifications = storage.disconnect(conn);
    let mut signals = vec![PipeSignal::Dropped(conn)];
    signals.extend(deliver(storage, connections, audit, notifications));
    signals
}

/// Delivers a batch of notifications, following failed deliveries into
/// recursive disconnects via an explicit work-list rather than the call
/// stack (an unbounded chain of hand-offs must never grow native frames).
fn deliver(storage: &Storage, connections: &Connections, audit: &AuditLog, notifications: Vec<Notification>) -> Vec<PipeSignal> {
    let mut pending: VecDeque<Notification> = notifications.into();
    let mut signals = Vec::new();

    while let Some(notification) = pending.pop_front() {
        let (target, code) = match notification {
            Notification::LockGranted(target, _) => (target, ResponseCode::Ok),
            Notification::FileGone(target, _) => (target, ResponseCode::FileNotExists),
        };
        let Some(stream) = connections.get(target) else {
            // Already gone; nothing to notify, nothing new to disconnect.
            continue;
        };
        let write_result = {
            let mut guard = stream.lock();
            codec::write_response(&mut *guard, code, &OkBody::Empty)
        };
        if write_result.is_ok() {
            signals.push(PipeSignal::Ready(target));
        } else {
            connections.remove(target);
            event!(Level::DEBUG, message = "notification delivery failed, disconnecting", conn = target.0);
            signals.push(PipeSignal::Dropped(target));
            pending.extend(storage.disconnect(target));
        }
    }

    signals
}

fn log_success(audit: &AuditLog, storage: &Storage, conn: ConnectionId, request: &Request) {
    let stats = storage.stats();
    let bytes = match request {
        Request::Write { content, .. } | Request::Append { content, .. } => content.len().to_string(),
        _ => String::new(),
    };
    audit.record(
        thread_id(),
        &LogRecord {
            operation: operation_name(request).to_owned(),
            outcome: "OK".to_owned(),
            client_id: conn.0.to_string(),
            file: request.path().unwrap_or_default().to_owned(),
            bytes_processed: bytes,
            curr_files: stats.cur_files.to_string(),
            curr_bytes: stats.cur_bytes.to_string(),
            curr_clients: stats.connected_clients.to_string(),
        },
    );
}

fn operation_name(request: &Request) -> &'static str {
    match request {
        Request::Open { create, lock, .. } => match (create, lock) {
            (false, false) => "OPEN",
            (true, false) => "OPEN_CREATE",
            (false, true) => "OPEN_LOCK",
            (true, true) => "OPEN_CREATE_LOCK",
        },
        Request::Write { .. } => "WRITE",
        Request::Append { .. } => "APPEND",
        Request::Read { .. } => "READ",
        Request::ReadMany { .. } => "READ_N",
        Request::Lock { .. } => "LOCK",
        Request::Unlock { .. } => "UNLOCK",
        Request::Remove { .. } => "REMOVE",
        Request::Close { .. } => "CLOSE",
    }
}

/// Best-effort thread identifier for the CSV log's `THREAD_ID` column; the
/// original uses the OS thread id, which Rust has no stable portable
/// equivalent for, so this hashes `std::thread::current().id()` instead.
fn thread_id() -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}

/// Writes `TEMPORARILY_UNAVAILABLE` for the one request the master itself
/// reads inline when the worker pool is saturated (spec §4.8). This never
/// touches `Storage` at all — the request is rejected before it would have
/// been dispatched to a worker.
pub fn reject_overloaded(stream: &mut UnixStream) -> WireResult<()> {
    let (_opcode, _request) = codec::read_request(stream)?;
    codec::write_response(stream, ResponseCode::TemporarilyUnavailable, &OkBody::Empty)
}
