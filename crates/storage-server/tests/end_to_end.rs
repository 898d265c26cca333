//! Drives a real [`Dispatcher`] over a Unix-domain socket and exercises the
//! end-to-end scenarios this server is expected to satisfy: round trip,
//! lock hand-off, eviction, remove-notifies-waiters, and overload
//! backpressure. Each test starts its own server on its own socket path so
//! they can run concurrently.

use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use storage_core::{EvictionPolicy, Limits, Storage};
use storage_server::{AuditLog, Connections, Dispatcher, SignalChannel, WorkerPool};
use storage_wire::{OkBody, Opcode, Request, ResponseCode, codec};

static SOCKET_COUNTER: AtomicUsize = AtomicUsize::new(0);

struct TestConfig {
    max_files: usize,
    max_bytes: usize,
    n_workers: usize,
    dim_workers_queue: usize,
    policy: EvictionPolicy,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self { max_files: 16, max_bytes: 1 << 20, n_workers: 4, dim_workers_queue: 64, policy: EvictionPolicy::Fifo }
    }
}

/// Starts a dispatcher on a fresh socket path and leaks its thread: the
/// test process exits (or moves on to the next test) without a graceful
/// shutdown handshake, which is fine since nothing outlives the test binary.
fn spawn_server(config: TestConfig) -> String {
    let socket_path = std::env::temp_dir().join(format!("storage-server-test-{}-{}.sock", std::process::id(), SOCKET_COUNTER.fetch_add(1, Ordering::Relaxed))).to_str().unwrap().to_owned();
    let log_path = format!("{socket_path}.log.csv");

    let _ = std::fs::remove_file(&socket_path);
    let audit = Arc::new(AuditLog::create(&log_path).expect("create audit log"));
    let signals = SignalChannel::install().expect("install signal channel");
    let pool = WorkerPool::new(config.n_workers, config.dim_workers_queue);
    let storage = Arc::new(Storage::new(Limits { max_files: config.max_files, max_bytes: config.max_bytes }, config.policy, 4, 4));
    let connections = Arc::new(Connections::new());
    let listener = std::os::unix::net::UnixListener::bind(&socket_path).expect("bind");

    let mut dispatcher = Dispatcher::new(listener, signals, storage, connections, audit, pool).expect("build dispatcher");
    std::thread::spawn(move || dispatcher.run());

    // Give the dispatcher thread a moment to enter its poll loop before the
    // first connection attempt.
    std::thread::sleep(Duration::from_millis(50));
    socket_path
}

fn connect(socket_path: &str) -> UnixStream {
    UnixStream::connect(socket_path).expect("connect")
}

fn roundtrip(stream: &mut UnixStream, opcode: Opcode, request: &Request) -> (ResponseCode, OkBody) {
    codec::write_request(stream, opcode, request).expect("write request");
    codec::read_response(stream, opcode).expect("read response")
}

#[test]
fn single_file_round_trip() {
    let socket_path = spawn_server(TestConfig::default());

    let mut a = connect(&socket_path);
    let (code, _) = roundtrip(&mut a, Opcode::OpenCreateLock, &Request::Open { path: "/a".into(), create: true, lock: true });
    assert_eq!(code, ResponseCode::Ok);

    let (code, body) = roundtrip(&mut a, Opcode::Write, &Request::Write { path: "/a".into(), content: b"hello".to_vec() });
    assert_eq!(code, ResponseCode::Ok);
    assert_eq!(body, OkBody::Evicted(vec![]));

    let (code, _) = roundtrip(&mut a, Opcode::Close, &Request::Close { path: "/a".into() });
    assert_eq!(code, ResponseCode::Ok);

    let mut b = connect(&socket_path);
    let (code, _) = roundtrip(&mut b, Opcode::OpenNoFlags, &Request::Open { path: "/a".into(), create: false, lock: false });
    assert_eq!(code, ResponseCode::Ok);

    let (code, body) = roundtrip(&mut b, Opcode::Read, &Request::Read { path: "/a".into() });
    assert_eq!(code, ResponseCode::Ok);
    assert_eq!(body, OkBody::Content(b"hello".to_vec()));
}

#[test]
fn lock_hand_off_between_connections() {
    let socket_path = spawn_server(TestConfig::default());

    let mut a = connect(&socket_path);
    let (code, _) = roundtrip(&mut a, Opcode::OpenCreateLock, &Request::Open { path: "/a".into(), create: true, lock: true });
    assert_eq!(code, ResponseCode::Ok);

    let mut b = connect(&socket_path);
    let (code, _) = roundtrip(&mut b, Opcode::OpenNoFlags, &Request::Open { path: "/a".into(), create: false, lock: false });
    assert_eq!(code, ResponseCode::Ok);

    // B's lock request is deferred: write it but do not block reading the
    // response on this thread, since no response arrives until A unlocks.
    codec::write_request(&mut b, Opcode::Lock, &Request::Lock { path: "/a".into() }).expect("write lock");

    std::thread::sleep(Duration::from_millis(50));
    let (code, _) = roundtrip(&mut a, Opcode::Unlock, &Request::Unlock { path: "/a".into() });
    assert_eq!(code, ResponseCode::Ok);

    let (code, _) = codec::read_response(&mut b, Opcode::Lock).expect("b's deferred lock response");
    assert_eq!(code, ResponseCode::Ok);
}

#[test]
fn eviction_under_write_fifo_policy() {
    let socket_path = spawn_server(TestConfig { max_files: 2, max_bytes: 10, ..TestConfig::default() });
    let mut a = connect(&socket_path);

    for (path, bytes) in [("/x", &b"abcdef"[..]), ("/y", &b"ghi"[..])] {
        let (code, _) = roundtrip(&mut a, Opcode::OpenCreateLock, &Request::Open { path: path.into(), create: true, lock: true });
        assert_eq!(code, ResponseCode::Ok);
        let (code, _) = roundtrip(&mut a, Opcode::Write, &Request::Write { path: path.into(), content: bytes.to_vec() });
        assert_eq!(code, ResponseCode::Ok);
        let (code, _) = roundtrip(&mut a, Opcode::Close, &Request::Close { path: path.into() });
        assert_eq!(code, ResponseCode::Ok);
    }

    let (code, _) = roundtrip(&mut a, Opcode::OpenCreateLock, &Request::Open { path: "/z".into(), create: true, lock: true });
    assert_eq!(code, ResponseCode::Ok);

    let (code, body) = roundtrip(&mut a, Opcode::Write, &Request::Write { path: "/z".into(), content: b"jklm".to_vec() });
    assert_eq!(code, ResponseCode::Ok);
    match body {
        OkBody::Evicted(files) => {
            assert_eq!(files.len(), 1);
            assert_eq!(files[0].path, "/x");
            assert_eq!(files[0].content, b"abcdef");
        }
        other => panic!("expected an eviction list, got {other:?}"),
    }
}

#[test]
fn remove_notifies_waiting_lock_requesters() {
    let socket_path = spawn_server(TestConfig::default());

    let mut a = connect(&socket_path);
    let (code, _) = roundtrip(&mut a, Opcode::OpenCreateLock, &Request::Open { path: "/a".into(), create: true, lock: true });
    assert_eq!(code, ResponseCode::Ok);

    let mut b = connect(&socket_path);
    let (code, _) = roundtrip(&mut b, Opcode::OpenNoFlags, &Request::Open { path: "/a".into(), create: false, lock: false });
    assert_eq!(code, ResponseCode::Ok);
    codec::write_request(&mut b, Opcode::Lock, &Request::Lock { path: "/a".into() }).expect("write lock");
    std::thread::sleep(Duration::from_millis(50));

    let (code, _) = roundtrip(&mut a, Opcode::Remove, &Request::Remove { path: "/a".into() });
    assert_eq!(code, ResponseCode::Ok);

    let (code, _) = codec::read_response(&mut b, Opcode::Lock).expect("b's deferred response after remove");
    assert_eq!(code, ResponseCode::FileNotExists);
}

#[test]
fn overload_backpressure_serves_third_request_inline() {
    // A single worker with a one-slot queue: the third concurrently issued
    // request must be rejected inline while the first two still succeed.
    let socket_path = spawn_server(TestConfig { n_workers: 1, dim_workers_queue: 1, ..TestConfig::default() });

    let mut a = connect(&socket_path);
    let mut b = connect(&socket_path);
    let mut c = connect(&socket_path);

    codec::write_request(&mut a, Opcode::OpenCreateLock, &Request::Open { path: "/a".into(), create: true, lock: true }).unwrap();
    codec::write_request(&mut b, Opcode::OpenCreateLock, &Request::Open { path: "/b".into(), create: true, lock: true }).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    codec::write_request(&mut c, Opcode::OpenCreateLock, &Request::Open { path: "/c".into(), create: true, lock: true }).unwrap();

    let (code_a, _) = codec::read_response(&mut a, Opcode::OpenCreateLock).unwrap();
    let (code_b, _) = codec::read_response(&mut b, Opcode::OpenCreateLock).unwrap();
    let (code_c, _) = codec::read_response(&mut c, Opcode::OpenCreateLock).unwrap();

    assert_eq!(code_a, ResponseCode::Ok);
    assert_eq!(code_b, ResponseCode::Ok);
    assert_eq!(code_c, ResponseCode::TemporarilyUnavailable);

    // The server must still be live afterwards.
    let (code, _) = roundtrip(&mut a, Opcode::Close, &Request::Close { path: "/a".into() });
    assert_eq!(code, ResponseCode::Ok);
}
