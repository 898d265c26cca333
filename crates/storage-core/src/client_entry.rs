use std::collections::HashSet;

use crate::ids::ConnectionId;

/// A connection's view of the files it has opened and locked.
///
/// Referenced by path, not by a direct pointer/reference into a
/// [`crate::file_entry::FileEntry`] — the file's shard owns the
/// authoritative entry, and this set exists purely to let `disconnect`
/// recover what a vanished client was holding without scanning every file.
#[derive(Debug, Clone, Default)]
pub struct ClientEntry {
    opened: HashSet<String>,
    locked: HashSet<String>,
}

impl ClientEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> &HashSet<String> {
        &self.opened
    }

    pub fn locked(&self) -> &HashSet<String> {
        &self.locked
    }

    pub fn has_opened(&self, path: &str) -> bool {
        self.opened.contains(path)
    }

    pub fn holds_lock_on(&self, path: &str) -> bool {
        self.locked.contains(path)
    }

    pub fn mark_opened(&mut self, path: impl Into<String>) {
        self.opened.insert(path.into());
    }

    pub fn mark_closed(&mut self, path: &str) {
        self.opened.remove(path);
        // A file that is no longer open cannot still be locked (C2 implies C1's
        // `locked ⊆ opened`), so closing always clears both sets together.
        self.locked.remove(path);
    }

    pub fn mark_locked(&mut self, path: impl Into<String>) {
        self.locked.insert(path.into());
    }

    pub fn mark_unlocked(&mut self, path: &str) {
        self.locked.remove(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marking_closed_also_clears_lock() {
        let mut client = ClientEntry::new();
        client.mark_opened("/a");
        client.mark_locked("/a");
        client.mark_closed("/a");
        assert!(!client.has_opened("/a"));
        assert!(!client.holds_lock_on("/a"));
    }

    #[test]
    fn locked_without_being_open_cannot_happen_via_api() {
        let mut client = ClientEntry::new();
        client.mark_locked("/a");
        // `locked` can technically be set without `opened` through direct API misuse;
        // callers in `storage-core` always call `mark_opened` first. This test documents
        // that the type itself does not enforce the `locked ⊆ opened` invariant (C1/C2
        // are `Storage`'s responsibility, not `ClientEntry`'s).
        assert!(client.holds_lock_on("/a"));
        assert!(!client.has_opened("/a"));
    }
}
