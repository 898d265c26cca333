//! The live connection table: every handler needs to reach sockets other
//! than its own to deliver lock hand-off and file-removal notifications
//! (spec-mandated: a write that frees a lock must notify whoever is waiting
//! on it, regardless of which connection's request triggered the release).

use std::collections::HashMap;
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use parking_lot::Mutex;
use storage_core::ConnectionId;

/// Maps live connections to their socket, guarded by its own mutex so a
/// handler can write a notification onto another connection's stream
/// without contending with the table itself once it has the entry.
#[derive(Debug, Default)]
pub struct Connections {
    streams: Mutex<HashMap<ConnectionId, Arc<Mutex<UnixStream>>>>,
}

impl Connections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, conn: ConnectionId, stream: UnixStream) {
        self.streams.lock().insert(conn, Arc::new(Mutex::new(stream)));
    }

    pub fn get(&self, conn: ConnectionId) -> Option<Arc<Mutex<UnixStream>>> {
        self.streams.lock().get(&conn).cloned()
    }

    pub fn remove(&self, conn: ConnectionId) -> Option<Arc<Mutex<UnixStream>>> {
        self.streams.lock().remove(&conn)
    }

    pub fn len(&self) -> usize {
        self.streams.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove_round_trip() {
        let connections = Connections::new();
        let (a, _b) = UnixStream::pair().unwrap();
        connections.insert(ConnectionId(1), a);
        assert!(connections.get(ConnectionId(1)).is_some());
        assert!(connections.remove(ConnectionId(1)).is_some());
        assert!(connections.get(ConnectionId(1)).is_none());
    }
}
