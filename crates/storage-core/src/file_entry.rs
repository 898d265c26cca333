use std::collections::VecDeque;

use crate::ids::ConnectionId;

/// A single in-memory file and everything the engine tracks about it.
///
/// `creation_time` and `last_usage_time` are logical ticks handed out by
/// [`crate::storage::Storage`]'s monotonic counter, not wall-clock time —
/// FIFO/LRU/LFU/LW only ever need relative ordering between files, and a
/// logical counter makes that ordering deterministic to test.
#[derive(Debug, Clone)]
pub struct FileEntry {
    path: String,
    content: Vec<u8>,
    owner_of_lock: Option<ConnectionId>,
    write_permit: Option<ConnectionId>,
    open_by: Vec<ConnectionId>,
    pending_lock: VecDeque<ConnectionId>,
    creation_time: u64,
    last_usage_time: u64,
    usage_counter: u64,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, created_at: u64) -> Self {
        Self {
            path: path.into(),
            content: Vec::new(),
            owner_of_lock: None,
            write_permit: None,
            open_by: Vec::new(),
            pending_lock: VecDeque::new(),
            creation_time: created_at,
            last_usage_time: created_at,
            usage_counter: 0,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }

    pub fn set_content(&mut self, content: Vec<u8>) {
        self.content = content;
    }

    pub fn append_content(&mut self, bytes: &[u8]) {
        self.content.extend_from_slice(bytes);
    }

    pub fn owner_of_lock(&self) -> Option<ConnectionId> {
        self.owner_of_lock
    }

    /// Sets the owner and clears the write permit if ownership is changing
    /// away from whoever held the permit (invariant F3: the permit is
    /// consumed by any lock release).
    pub fn set_owner(&mut self, owner: Option<ConnectionId>) {
        self.owner_of_lock = owner;
    }

    pub fn write_permit(&self) -> Option<ConnectionId> {
        self.write_permit
    }

    pub fn set_write_permit(&mut self, permit: Option<ConnectionId>) {
        self.write_permit = permit;
    }

    /// Clears the write permit if it belongs to `conn` (invariant F3).
    pub fn clear_write_permit_if_owned_by(&mut self, conn: ConnectionId) {
        if self.write_permit == Some(conn) {
            self.write_permit = None;
        }
    }

    pub fn is_opened_by(&self, conn: ConnectionId) -> bool {
        self.open_by.contains(&conn)
    }

    pub fn open_by(&self) -> &[ConnectionId] {
        &self.open_by
    }

    pub fn add_opener(&mut self, conn: ConnectionId) {
        if !self.open_by.contains(&conn) {
            self.open_by.push(conn);
        }
    }

    pub fn remove_opener(&mut self, conn: ConnectionId) {
        self.open_by.retain(|c| *c != conn);
    }

    pub fn pending_lock(&self) -> &VecDeque<ConnectionId> {
        &self.pending_lock
    }

    pub fn is_waiting(&self, conn: ConnectionId) -> bool {
        self.pending_lock.contains(&conn)
    }

    pub fn push_waiter(&mut self, conn: ConnectionId) {
        debug_assert!(!self.is_waiting(conn), "a connection may wait on a file at most once");
        self.pending_lock.push_back(conn);
    }

    pub fn pop_waiter(&mut self) -> Option<ConnectionId> {
        self.pending_lock.pop_front()
    }

    pub fn creation_time(&self) -> u64 {
        self.creation_time
    }

    pub fn last_usage_time(&self) -> u64 {
        self.last_usage_time
    }

    pub fn usage_counter(&self) -> u64 {
        self.usage_counter
    }

    pub fn touch(&mut self, tick: u64) {
        self.last_usage_time = tick;
    }

    pub fn set_usage_counter(&mut self, value: u64) {
        self.usage_counter = value;
    }

    pub fn bump_usage_counter(&mut self, delta: i64) {
        self.usage_counter = self.usage_counter.saturating_add_signed(delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entry_has_no_owner_and_empty_content() {
        let entry = FileEntry::new("/a", 0);
        assert_eq!(entry.owner_of_lock(), None);
        assert_eq!(entry.content(), b"");
        assert_eq!(entry.size(), 0);
    }

    #[test]
    fn add_opener_is_idempotent() {
        let mut entry = FileEntry::new("/a", 0);
        let conn = ConnectionId(1);
        entry.add_opener(conn);
        entry.add_opener(conn);
        assert_eq!(entry.open_by(), &[conn]);
    }

    #[test]
    fn write_permit_clears_on_other_connections_release() {
        let mut entry = FileEntry::new("/a", 0);
        let conn = ConnectionId(1);
        entry.set_write_permit(Some(conn));
        entry.clear_write_permit_if_owned_by(ConnectionId(2));
        assert_eq!(entry.write_permit(), Some(conn));
        entry.clear_write_permit_if_owned_by(conn);
        assert_eq!(entry.write_permit(), None);
    }

    #[test]
    fn waiter_queue_is_fifo() {
        let mut entry = FileEntry::new("/a", 0);
        entry.push_waiter(ConnectionId(1));
        entry.push_waiter(ConnectionId(2));
        assert_eq!(entry.pop_waiter(), Some(ConnectionId(1)));
        assert_eq!(entry.pop_waiter(), Some(ConnectionId(2)));
        assert_eq!(entry.pop_waiter(), None);
    }

    #[test]
    fn bump_usage_counter_saturates_at_zero() {
        let mut entry = FileEntry::new("/a", 0);
        entry.bump_usage_counter(-5);
        assert_eq!(entry.usage_counter(), 0);
    }
}
