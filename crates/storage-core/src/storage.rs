//! The engine: capacity accounting, the live-file order, and the handlers
//! for every client-facing operation.
//!
//! Locking discipline follows a simple rule: operations that change
//! `cur_files`, `cur_bytes`, or the creation-order sequence take the
//! storage-global mutex for their whole duration; operations that only
//! touch one file's metadata (read, lock, unlock, close, plain open) take
//! only that file's shard lock. A handler never holds two shards of the
//! same kind (two path-shards, or two client-shards) at once — hand-off
//! moves ownership between two clients' entries one shard at a time,
//! dropping the first guard before taking the second.
//!
//! A single connection never has two requests in flight at once (the
//! dispatcher only re-arms a socket for reading after the previous request
//! has been fully answered), so a connection's own [`ClientEntry`] is never
//! mutated by two call stacks at the same time — that is what makes it safe
//! to drop the path-shard/global lock before touching client bookkeeping
//! below, rather than holding every lock for the whole handler.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{Level, event};

use crate::client_entry::ClientEntry;
use crate::error::{StorageError, StorageResult};
use crate::eviction::{self, UsageEvent};
use crate::file_entry::FileEntry;
use crate::ids::ConnectionId;
use crate::policy::EvictionPolicy;
use crate::shard::ShardedMap;
use crate::validation::validate_path;

/// Hard caps taken from configuration.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_files: usize,
    pub max_bytes: usize,
}

/// Live totals and monotonic counters, guarded by the storage-global mutex.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub cur_files: usize,
    pub cur_bytes: usize,
    pub peak_files: usize,
    pub peak_bytes: usize,
    pub evictions_count: u64,
    pub connected_clients: usize,
}

#[derive(Debug, Default)]
struct GlobalState {
    stats: Stats,
    files_in_order: VecDeque<String>,
}

/// The open mode a client requested, decoded from the wire opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Plain,
    Create,
    Lock,
    CreateLock,
}

impl OpenMode {
    pub fn wants_create(self) -> bool {
        matches!(self, Self::Create | Self::CreateLock)
    }

    pub fn wants_lock(self) -> bool {
        matches!(self, Self::Lock | Self::CreateLock)
    }
}

/// One file freed by eviction, carried back to the requester that triggered it.
#[derive(Debug, Clone)]
pub struct EvictedFile {
    pub path: String,
    pub content: Vec<u8>,
}

/// The payload half of a successful operation's response.
#[derive(Debug, Clone)]
pub enum Success {
    Empty,
    Content(Vec<u8>),
    Many(Vec<(String, Vec<u8>)>),
    Written { evicted: Vec<EvictedFile> },
}

/// A side effect aimed at a connection other than the one that issued the
/// request that produced it.
#[derive(Debug, Clone)]
pub enum Notification {
    /// Lock hand-off: `conn` now owns `path` and should receive `OK` for the
    /// `open`/`lock` request it has been waiting on.
    LockGranted(ConnectionId, String),
    /// `conn` was waiting on `path` and it is gone (removed or evicted); it
    /// should receive `FILE_NOT_EXISTS`.
    FileGone(ConnectionId, String),
}

/// Whether a request is answered immediately or parked pending hand-off.
#[derive(Debug, Clone)]
pub enum OpOutcome {
    Ok(Success),
    /// The caller joined `pending_lock`; no response is sent now. A
    /// [`Notification::LockGranted`] addressed to this same connection will
    /// arrive later, once the file is released to it.
    Deferred,
}

#[derive(Debug, Clone)]
pub struct OpResult {
    pub outcome: OpOutcome,
    pub notifications: Vec<Notification>,
}

impl OpResult {
    fn ok(success: Success) -> Self {
        Self { outcome: OpOutcome::Ok(success), notifications: Vec::new() }
    }

    fn ok_with(success: Success, notifications: Vec<Notification>) -> Self {
        Self { outcome: OpOutcome::Ok(success), notifications }
    }

    fn deferred(notifications: Vec<Notification>) -> Self {
        Self { outcome: OpOutcome::Deferred, notifications }
    }
}

struct EvictionEffect {
    notifications: Vec<Notification>,
    file: Option<EvictedFile>,
}

pub struct Storage {
    files: ShardedMap<String, FileEntry>,
    clients: ShardedMap<ConnectionId, ClientEntry>,
    global: Mutex<GlobalState>,
    tick: AtomicU64,
    limits: Limits,
    policy: EvictionPolicy,
}

impl Storage {
    pub fn new(limits: Limits, policy: EvictionPolicy, file_shards: usize, client_shards: usize) -> Self {
        Self {
            files: ShardedMap::new(file_shards),
            clients: ShardedMap::new(client_shards),
            global: Mutex::new(GlobalState::default()),
            tick: AtomicU64::new(0),
            limits,
            policy,
        }
    }

    pub fn stats(&self) -> Stats {
        self.global.lock().stats
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a freshly-accepted connection. Idempotent in the sense that
    /// a connection id is never reused while still live.
    pub fn register_client(&self, conn: ConnectionId) {
        self.clients.insert_atomic(conn, ClientEntry::new());
        self.global.lock().stats.connected_clients += 1;
    }

    // -- client-shard helpers, always touching exactly one client at a time --

    fn client_mark_opened(&self, conn: ConnectionId, path: &str) {
        let mut guard = self.clients.lock_shard(&conn);
        guard.entry(conn).or_insert_with(ClientEntry::new).mark_opened(path);
    }

    fn client_mark_closed(&self, conn: ConnectionId, path: &str) {
        let mut guard = self.clients.lock_shard(&conn);
        if let Some(entry) = guard.get_mut(&conn) {
            entry.mark_closed(path);
        }
    }

    fn client_mark_locked(&self, conn: ConnectionId, path: &str) {
        let mut guard = self.clients.lock_shard(&conn);
        guard.entry(conn).or_insert_with(ClientEntry::new).mark_locked(path);
    }

    fn client_mark_unlocked(&self, conn: ConnectionId, path: &str) {
        let mut guard = self.clients.lock_shard(&conn);
        if let Some(entry) = guard.get_mut(&conn) {
            entry.mark_unlocked(path);
        }
    }

    /// Removes one eviction victim, updating global accounting, the
    /// creation-order sequence, and every opener's `ClientEntry`, and
    /// returning the notifications owed to its waiters plus its freed
    /// content.
    ///
    /// `held_shard` is the caller's already-locked path shard (for the
    /// request's own path, at `held_index`); if the victim happens to land
    /// in that same shard (a hash collision with a different path), it is
    /// removed straight from `held_shard` instead of re-locking the shard —
    /// parking_lot's mutex is not reentrant, and the storage-global mutex
    /// (held by the caller for the whole operation) already rules out any
    /// other thread racing this removal.
    fn evict_path(
        &self,
        global: &mut GlobalState,
        held_index: usize,
        held_shard: &mut HashMap<String, FileEntry>,
        victim_path: &str,
    ) -> EvictionEffect {
        let victim_index = self.files.shard_index_for(&victim_path.to_owned());
        let removed = if victim_index == held_index {
            held_shard.remove(victim_path)
        } else {
            self.files.lock_shard_at(victim_index).remove(victim_path)
        };
        let Some(entry) = removed else {
            return EvictionEffect { notifications: Vec::new(), file: None };
        };

        global.stats.cur_files -= 1;
        global.stats.cur_bytes -= entry.size();
        global.stats.evictions_count += 1;
        global.files_in_order.retain(|p| p != victim_path);
        event!(Level::DEBUG, message = "evicted file", path = victim_path, policy = ?self.policy, freed_bytes = entry.size());

        for opener in entry.open_by() {
            self.client_mark_closed(*opener, victim_path);
        }

        let notifications = entry
            .pending_lock()
            .iter()
            .copied()
            .map(|conn| Notification::FileGone(conn, victim_path.to_owned()))
            .collect();

        EvictionEffect {
            notifications,
            file: Some(EvictedFile { path: victim_path.to_owned(), content: entry.content().to_vec() }),
        }
    }

    pub fn open(&self, conn: ConnectionId, path: &str, mode: OpenMode) -> StorageResult<OpResult> {
        validate_path(path)?;
        if mode.wants_create() {
            self.open_create(conn, path, mode)
        } else {
            self.open_existing(conn, path, mode)
        }
    }

    fn open_create(&self, conn: ConnectionId, path: &str, mode: OpenMode) -> StorageResult<OpResult> {
        let mut global = self.global.lock();
        let key = path.to_owned();
        let held_index = self.files.shard_index_for(&key);
        let mut shard = self.files.lock_shard_at(held_index);

        if shard.contains_key(path) {
            return Err(StorageError::FileAlreadyExists(path.to_owned()));
        }

        let mut notifications = Vec::new();
        if global.stats.cur_files >= self.limits.max_files {
            let order: Vec<String> = global.files_in_order.iter().cloned().collect();
            eviction::halve_if_near_overflow(&self.files, held_index, &mut shard, &order);
            let victim = eviction::select_victim(&self.files, held_index, &shard, &order, self.policy, path, true);
            match victim {
                Some(victim_path) => {
                    let effect = self.evict_path(&mut global, held_index, &mut shard, &victim_path);
                    notifications.extend(effect.notifications);
                }
                None => return Err(StorageError::CouldNotEvict(path.to_owned())),
            }
        }

        let tick = self.next_tick();
        let mut entry = FileEntry::new(path, tick);
        entry.add_opener(conn);
        if mode.wants_lock() {
            entry.set_owner(Some(conn));
            entry.set_write_permit(Some(conn));
        }
        eviction::apply_usage_event(&mut entry, self.policy, UsageEvent::OpenCreate, tick);
        shard.insert(key.clone(), entry);

        global.files_in_order.push_back(key);
        global.stats.cur_files += 1;
        global.stats.peak_files = global.stats.peak_files.max(global.stats.cur_files);

        drop(shard);
        drop(global);

        self.client_mark_opened(conn, path);
        if mode.wants_lock() {
            self.client_mark_locked(conn, path);
        }

        Ok(OpResult::ok_with(Success::Empty, notifications))
    }

    fn open_existing(&self, conn: ConnectionId, path: &str, mode: OpenMode) -> StorageResult<OpResult> {
        let mut shard = self.files.lock_shard(&path.to_owned());
        let entry = shard.get_mut(path).ok_or_else(|| StorageError::FileNotExists(path.to_owned()))?;
        if entry.is_opened_by(conn) {
            return Err(StorageError::FileAlreadyOpen(path.to_owned()));
        }

        entry.add_opener(conn);
        let tick = self.next_tick();

        if !mode.wants_lock() {
            eviction::apply_usage_event(entry, self.policy, UsageEvent::OpenPlain, tick);
            drop(shard);
            self.client_mark_opened(conn, path);
            return Ok(OpResult::ok(Success::Empty));
        }

        if entry.owner_of_lock().is_none() {
            entry.set_owner(Some(conn));
            entry.set_write_permit(Some(conn));
            eviction::apply_usage_event(entry, self.policy, UsageEvent::OpenLock, tick);
            drop(shard);
            self.client_mark_opened(conn, path);
            self.client_mark_locked(conn, path);
            Ok(OpResult::ok(Success::Empty))
        } else {
            entry.push_waiter(conn);
            eviction::apply_usage_event(entry, self.policy, UsageEvent::OpenLock, tick);
            drop(shard);
            self.client_mark_opened(conn, path);
            Ok(OpResult::deferred(Vec::new()))
        }
    }

    pub fn write(&self, conn: ConnectionId, path: &str, bytes: Vec<u8>) -> StorageResult<OpResult> {
        validate_path(path)?;

        let mut global = self.global.lock();
        let key = path.to_owned();
        let held_index = self.files.shard_index_for(&key);
        let mut shard = self.files.lock_shard_at(held_index);

        let old_size = {
            let entry = shard.get(path).ok_or_else(|| StorageError::OperationNotPermitted(path.to_owned()))?;
            if entry.write_permit() != Some(conn) {
                return Err(StorageError::OperationNotPermitted(path.to_owned()));
            }
            entry.size()
        };

        if old_size + bytes.len() > self.limits.max_bytes {
            return Err(StorageError::TooLongContent { path: path.to_owned(), requested: bytes.len(), max: self.limits.max_bytes });
        }

        let mut notifications = Vec::new();
        let mut evicted = Vec::new();
        while global.stats.cur_bytes + bytes.len() > self.limits.max_bytes {
            let order: Vec<String> = global.files_in_order.iter().cloned().collect();
            eviction::halve_if_near_overflow(&self.files, held_index, &mut shard, &order);
            match eviction::select_victim(&self.files, held_index, &shard, &order, self.policy, path, false) {
                Some(victim_path) => {
                    let effect = self.evict_path(&mut global, held_index, &mut shard, &victim_path);
                    notifications.extend(effect.notifications);
                    evicted.extend(effect.file);
                }
                None => return Err(StorageError::CouldNotEvict(path.to_owned())),
            }
        }

        let tick = self.next_tick();
        let entry = shard.get_mut(path).expect("file present under its own held shard lock");
        global.stats.cur_bytes = global.stats.cur_bytes - entry.size() + bytes.len();
        global.stats.peak_bytes = global.stats.peak_bytes.max(global.stats.cur_bytes);
        entry.set_content(bytes);
        entry.set_write_permit(None);
        eviction::apply_usage_event(entry, self.policy, UsageEvent::Access, tick);

        Ok(OpResult::ok_with(Success::Written { evicted }, notifications))
    }

    pub fn append(&self, conn: ConnectionId, path: &str, bytes: Vec<u8>) -> StorageResult<OpResult> {
        validate_path(path)?;

        let mut global = self.global.lock();
        let key = path.to_owned();
        let held_index = self.files.shard_index_for(&key);
        let mut shard = self.files.lock_shard_at(held_index);

        let old_size = {
            let entry = shard.get(path).ok_or_else(|| StorageError::FileNotExists(path.to_owned()))?;
            if !entry.is_opened_by(conn) {
                return Err(StorageError::OperationNotPermitted(path.to_owned()));
            }
            if entry.owner_of_lock().is_some_and(|owner| owner != conn) {
                return Err(StorageError::OperationNotPermitted(path.to_owned()));
            }
            entry.size()
        };

        if old_size + bytes.len() > self.limits.max_bytes {
            return Err(StorageError::TooLongContent { path: path.to_owned(), requested: bytes.len(), max: self.limits.max_bytes });
        }

        let mut notifications = Vec::new();
        let mut evicted = Vec::new();
        while global.stats.cur_bytes + bytes.len() > self.limits.max_bytes {
            let order: Vec<String> = global.files_in_order.iter().cloned().collect();
            eviction::halve_if_near_overflow(&self.files, held_index, &mut shard, &order);
            match eviction::select_victim(&self.files, held_index, &shard, &order, self.policy, path, false) {
                Some(victim_path) => {
                    let effect = self.evict_path(&mut global, held_index, &mut shard, &victim_path);
                    notifications.extend(effect.notifications);
                    evicted.extend(effect.file);
                }
                None => return Err(StorageError::CouldNotEvict(path.to_owned())),
            }
        }

        let tick = self.next_tick();
        let entry = shard.get_mut(path).expect("file present under its own held shard lock");
        entry.append_content(&bytes);
        global.stats.cur_bytes += bytes.len();
        global.stats.peak_bytes = global.stats.peak_bytes.max(global.stats.cur_bytes);
        // Unconditional, matching the source's behavior for a zero-byte append.
        eviction::apply_usage_event(entry, self.policy, UsageEvent::Access, tick);

        Ok(OpResult::ok_with(Success::Written { evicted }, notifications))
    }

    pub fn read(&self, conn: ConnectionId, path: &str) -> StorageResult<OpResult> {
        validate_path(path)?;
        let mut shard = self.files.lock_shard(&path.to_owned());
        let entry = shard.get_mut(path).ok_or_else(|| StorageError::FileNotExists(path.to_owned()))?;
        if !entry.is_opened_by(conn) {
            return Err(StorageError::OperationNotPermitted(path.to_owned()));
        }
        if entry.owner_of_lock().is_some_and(|owner| owner != conn) {
            return Err(StorageError::OperationNotPermitted(path.to_owned()));
        }
        let tick = self.next_tick();
        eviction::apply_usage_event(entry, self.policy, UsageEvent::Access, tick);
        Ok(OpResult::ok(Success::Content(entry.content().to_vec())))
    }

    /// `n <= 0` means "every file the caller may read".
    pub fn read_many(&self, conn: ConnectionId, n: i32) -> StorageResult<OpResult> {
        let order: Vec<String> = {
            let global = self.global.lock();
            global.files_in_order.iter().cloned().collect()
        };
        let limit = if n <= 0 { usize::MAX } else { n as usize };

        let mut out = Vec::new();
        for path in order {
            if out.len() >= limit {
                break;
            }
            let mut shard = self.files.lock_shard(&path);
            if let Some(entry) = shard.get_mut(&path) {
                if entry.owner_of_lock().is_none() || entry.owner_of_lock() == Some(conn) {
                    let tick = self.next_tick();
                    eviction::apply_usage_event(entry, self.policy, UsageEvent::Access, tick);
                    out.push((path.clone(), entry.content().to_vec()));
                }
            }
        }
        Ok(OpResult::ok(Success::Many(out)))
    }

    pub fn lock(&self, conn: ConnectionId, path: &str) -> StorageResult<OpResult> {
        validate_path(path)?;
        let mut shard = self.files.lock_shard(&path.to_owned());
        let entry = shard.get_mut(path).ok_or_else(|| StorageError::FileNotExists(path.to_owned()))?;
        if !entry.is_opened_by(conn) {
            return Err(StorageError::OperationNotPermitted(path.to_owned()));
        }
        if entry.owner_of_lock() == Some(conn) {
            return Err(StorageError::FileAlreadyLocked(path.to_owned()));
        }

        let tick = self.next_tick();
        if entry.owner_of_lock().is_none() {
            entry.set_owner(Some(conn));
            entry.set_write_permit(Some(conn));
            eviction::apply_usage_event(entry, self.policy, UsageEvent::LockUnlock, tick);
            drop(shard);
            self.client_mark_locked(conn, path);
            Ok(OpResult::ok(Success::Empty))
        } else {
            entry.push_waiter(conn);
            eviction::apply_usage_event(entry, self.policy, UsageEvent::LockUnlock, tick);
            Ok(OpResult::deferred(Vec::new()))
        }
    }

    pub fn unlock(&self, conn: ConnectionId, path: &str) -> StorageResult<OpResult> {
        validate_path(path)?;
        let mut shard = self.files.lock_shard(&path.to_owned());
        let entry = shard.get_mut(path).ok_or_else(|| StorageError::FileNotExists(path.to_owned()))?;
        if entry.owner_of_lock() != Some(conn) {
            return Err(StorageError::OperationNotPermitted(path.to_owned()));
        }

        let tick = self.next_tick();
        eviction::apply_usage_event(entry, self.policy, UsageEvent::LockUnlock, tick);
        let handed_off = self.hand_off(entry);
        drop(shard);

        self.client_mark_unlocked(conn, path);
        if let Some(new_owner) = handed_off {
            self.client_mark_locked(new_owner, path);
        }

        let notifications = handed_off.into_iter().map(|new_owner| Notification::LockGranted(new_owner, path.to_owned())).collect();
        Ok(OpResult::ok_with(Success::Empty, notifications))
    }

    /// Releases the file's current ownership, handing it to the head of the
    /// waiter queue if one is present (invariant F1 requires the old owner,
    /// who just left `open_by` or is disconnecting, not stay `owner_of_lock`
    /// with nobody to claim it). Returns who (if anyone) was handed the
    /// lock; that connection's `ClientEntry` is updated by the caller, once
    /// it has dropped the path shard — `hand_off` only ever touches the
    /// file's own shard.
    fn hand_off(&self, entry: &mut FileEntry) -> Option<ConnectionId> {
        match entry.pop_waiter() {
            Some(new_owner) => {
                entry.set_owner(Some(new_owner));
                entry.set_write_permit(Some(new_owner));
                Some(new_owner)
            }
            None => {
                entry.set_owner(None);
                entry.set_write_permit(None);
                None
            }
        }
    }

    pub fn close(&self, conn: ConnectionId, path: &str) -> StorageResult<OpResult> {
        validate_path(path)?;
        let mut shard = self.files.lock_shard(&path.to_owned());
        let entry = shard.get_mut(path).ok_or_else(|| StorageError::FileNotExists(path.to_owned()))?;
        if !entry.is_opened_by(conn) {
            return Err(StorageError::OperationNotPermitted(path.to_owned()));
        }

        entry.remove_opener(conn);
        let was_owner = entry.owner_of_lock() == Some(conn);
        let mut handed_off = None;
        if was_owner {
            handed_off = self.hand_off(entry);
        }
        let tick = self.next_tick();
        eviction::apply_usage_event(entry, self.policy, UsageEvent::Close, tick);
        drop(shard);

        self.client_mark_closed(conn, path);
        if let Some(new_owner) = handed_off {
            self.client_mark_locked(new_owner, path);
        }

        let notifications = handed_off.into_iter().map(|new_owner| Notification::LockGranted(new_owner, path.to_owned())).collect();
        Ok(OpResult::ok_with(Success::Empty, notifications))
    }

    pub fn remove(&self, conn: ConnectionId, path: &str) -> StorageResult<OpResult> {
        validate_path(path)?;

        let mut global = self.global.lock();
        let key = path.to_owned();
        let held_index = self.files.shard_index_for(&key);
        let mut shard = self.files.lock_shard_at(held_index);

        {
            let entry = shard.get(path).ok_or_else(|| StorageError::FileNotExists(path.to_owned()))?;
            if entry.owner_of_lock() != Some(conn) {
                return Err(StorageError::OperationNotPermitted(path.to_owned()));
            }
        }

        let entry = shard.remove(path).expect("presence just checked under the same held lock");
        global.stats.cur_files -= 1;
        global.stats.cur_bytes -= entry.size();
        global.files_in_order.retain(|p| p != path);
        drop(shard);
        drop(global);

        for opener in entry.open_by() {
            self.client_mark_closed(*opener, path);
        }

        let notifications = entry.pending_lock().iter().copied().map(|waiter| Notification::FileGone(waiter, path.to_owned())).collect();

        Ok(OpResult::ok_with(Success::Empty, notifications))
    }

    /// External entry point from the dispatcher when a connection vanishes.
    /// Releases every lock the connection owned (handing each off to its
    /// next waiter) and detaches it from every file it had open, then drops
    /// its `ClientEntry`. Any hand-off target that itself turns out to be
    /// gone is reported back via `notifications` so the caller can recurse
    /// through a work-list instead of the call stack (unbounded waiter
    /// chains must never grow the native stack).
    pub fn disconnect(&self, conn: ConnectionId) -> Vec<Notification> {
        let owned = self.clients.delete_atomic(&conn);
        let Some(client) = owned else {
            return Vec::new();
        };
        event!(Level::DEBUG, message = "disconnecting client", conn = conn.0, open_count = client.opened().len());
        {
            let mut global = self.global.lock();
            global.stats.connected_clients = global.stats.connected_clients.saturating_sub(1);
        }

        let mut notifications = Vec::new();
        let paths: Vec<String> = client.opened().iter().cloned().collect();
        for path in paths {
            let global = self.global.lock();
            let held_index = self.files.shard_index_for(&path);
            let mut shard = self.files.lock_shard_at(held_index);
            let Some(entry) = shard.get_mut(&path) else { continue };

            entry.remove_opener(conn);
            let mut handed_off = None;
            if entry.owner_of_lock() == Some(conn) {
                handed_off = self.hand_off(entry);
            }
            drop(shard);
            drop(global);

            if let Some(new_owner) = handed_off {
                self.client_mark_locked(new_owner, &path);
                notifications.push(Notification::LockGranted(new_owner, path.clone()));
            }
        }

        notifications
    }
}
