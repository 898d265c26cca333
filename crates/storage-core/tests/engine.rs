use storage_core::{ConnectionId, EvictionPolicy, Limits, Notification, OpOutcome, OpenMode, Storage, StorageError, Success};

fn storage(max_files: usize, max_bytes: usize, policy: EvictionPolicy) -> Storage {
    Storage::new(Limits { max_files, max_bytes }, policy, 4, 4)
}

#[test]
fn single_file_round_trip_scenario() {
    let s = storage(10, 1024, EvictionPolicy::Fifo);
    let client_a = ConnectionId(1);
    let client_b = ConnectionId(2);
    s.register_client(client_a);
    s.register_client(client_b);

    s.open(client_a, "/a", OpenMode::CreateLock).unwrap();
    let write = s.write(client_a, "/a", b"hello".to_vec()).unwrap();
    match write.outcome {
        OpOutcome::Ok(Success::Written { evicted }) => assert!(evicted.is_empty()),
        other => panic!("unexpected: {other:?}"),
    }
    s.close(client_a, "/a").unwrap();

    s.open(client_b, "/a", OpenMode::Plain).unwrap();
    let read = s.read(client_b, "/a").unwrap();
    match read.outcome {
        OpOutcome::Ok(Success::Content(bytes)) => assert_eq!(bytes, b"hello"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn lock_hand_off_scenario() {
    let s = storage(10, 1024, EvictionPolicy::Fifo);
    let client_a = ConnectionId(1);
    let client_b = ConnectionId(2);
    s.register_client(client_a);
    s.register_client(client_b);

    s.open(client_a, "/a", OpenMode::CreateLock).unwrap();
    s.open(client_b, "/a", OpenMode::Plain).unwrap();
    let deferred = s.lock(client_b, "/a").unwrap();
    assert!(matches!(deferred.outcome, OpOutcome::Deferred));

    let unlock = s.unlock(client_a, "/a").unwrap();
    assert!(matches!(
        unlock.notifications.as_slice(),
        [Notification::LockGranted(conn, path)] if *conn == client_b && path == "/a"
    ));

    // A now waits behind nobody (B owns it); A's lock request should defer.
    let a_waits = s.lock(client_a, "/a").unwrap();
    assert!(matches!(a_waits.outcome, OpOutcome::Deferred));

    let close = s.close(client_b, "/a").unwrap();
    assert!(matches!(
        close.notifications.as_slice(),
        [Notification::LockGranted(conn, path)] if *conn == client_a && path == "/a"
    ));
}

#[test]
fn eviction_under_write_fifo_scenario() {
    let s = storage(2, 10, EvictionPolicy::Fifo);
    let client = ConnectionId(1);
    s.register_client(client);

    s.open(client, "/x", OpenMode::CreateLock).unwrap();
    s.write(client, "/x", vec![0u8; 6]).unwrap();
    s.close(client, "/x").unwrap();

    s.open(client, "/y", OpenMode::CreateLock).unwrap();
    s.write(client, "/y", vec![0u8; 3]).unwrap();
    s.close(client, "/y").unwrap();

    s.open(client, "/z", OpenMode::CreateLock).unwrap();
    let result = s.write(client, "/z", vec![0u8; 4]).unwrap();
    match result.outcome {
        OpOutcome::Ok(Success::Written { evicted }) => {
            assert_eq!(evicted.len(), 1);
            assert_eq!(evicted[0].path, "/x");
            assert_eq!(evicted[0].content.len(), 6);
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(s.stats().cur_files, 2);
}

#[test]
fn remove_notifies_waiters_scenario() {
    let s = storage(10, 1024, EvictionPolicy::Fifo);
    let client_a = ConnectionId(1);
    let client_b = ConnectionId(2);
    s.register_client(client_a);
    s.register_client(client_b);

    s.open(client_a, "/a", OpenMode::CreateLock).unwrap();
    s.open(client_b, "/a", OpenMode::Plain).unwrap();
    s.lock(client_b, "/a").unwrap();

    let remove = s.remove(client_a, "/a").unwrap();
    assert!(matches!(
        remove.notifications.as_slice(),
        [Notification::FileGone(conn, path)] if *conn == client_b && path == "/a"
    ));
    assert!(s.open(client_a, "/a", OpenMode::Plain).is_err());
}

#[test]
fn disconnect_hand_off_scenario() {
    let s = storage(10, 1024, EvictionPolicy::Fifo);
    let client_a = ConnectionId(1);
    let client_b = ConnectionId(2);
    s.register_client(client_a);
    s.register_client(client_b);

    s.open(client_a, "/a", OpenMode::CreateLock).unwrap();
    s.open(client_b, "/a", OpenMode::Plain).unwrap();
    s.lock(client_b, "/a").unwrap();

    let notifications = s.disconnect(client_a);
    assert!(matches!(
        notifications.as_slice(),
        [Notification::LockGranted(conn, path)] if *conn == client_b && path == "/a"
    ));

    // B now owns the lock and may write.
    s.write(client_b, "/a", b"ok".to_vec()).unwrap();
}

#[test]
fn could_not_evict_when_every_candidate_is_protected_or_empty() {
    let s = storage(1, 4, EvictionPolicy::Fifo);
    let client = ConnectionId(1);
    s.register_client(client);

    s.open(client, "/a", OpenMode::CreateLock).unwrap();
    // /a is the only file and is the one being written to: it can never
    // evict itself (invariant F4), and there is nothing else to pick.
    let err = s.write(client, "/a", vec![0u8; 5]).unwrap_err();
    assert!(matches!(err, StorageError::TooLongContent { .. }));
}

#[test]
fn accounting_matches_live_content_sizes() {
    let s = storage(10, 1024, EvictionPolicy::Lru);
    let client = ConnectionId(1);
    s.register_client(client);

    s.open(client, "/a", OpenMode::CreateLock).unwrap();
    s.write(client, "/a", vec![1, 2, 3, 4]).unwrap();
    s.open(client, "/b", OpenMode::CreateLock).unwrap();
    s.write(client, "/b", vec![1, 2]).unwrap();

    let stats = s.stats();
    assert_eq!(stats.cur_files, 2);
    assert_eq!(stats.cur_bytes, 6);
}

#[test]
fn second_open_by_same_connection_is_rejected() {
    let s = storage(10, 1024, EvictionPolicy::Fifo);
    let client = ConnectionId(1);
    s.register_client(client);
    s.open(client, "/a", OpenMode::Create).unwrap();
    let err = s.open(client, "/a", OpenMode::Plain).unwrap_err();
    assert!(matches!(err, StorageError::FileAlreadyOpen(_)));
}

#[test]
fn write_without_permit_is_not_permitted() {
    let s = storage(10, 1024, EvictionPolicy::Fifo);
    let owner = ConnectionId(1);
    let other = ConnectionId(2);
    s.register_client(owner);
    s.register_client(other);

    s.open(owner, "/a", OpenMode::CreateLock).unwrap();
    s.open(other, "/a", OpenMode::Plain).unwrap();
    let err = s.write(other, "/a", b"nope".to_vec()).unwrap_err();
    assert!(matches!(err, StorageError::OperationNotPermitted(_)));
}

#[test]
fn write_permit_is_single_shot_and_consumed_after_use() {
    let s = storage(10, 1024, EvictionPolicy::Fifo);
    let client = ConnectionId(1);
    s.register_client(client);
    s.open(client, "/a", OpenMode::CreateLock).unwrap();
    s.write(client, "/a", b"first".to_vec()).unwrap();
    let err = s.write(client, "/a", b"second".to_vec()).unwrap_err();
    assert!(matches!(err, StorageError::OperationNotPermitted(_)));
}
