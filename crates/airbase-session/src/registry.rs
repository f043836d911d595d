use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use airbase_types::prelude::{now_ms, Id, Timestamp};

pub type ConnectionId = Id;

/// One live WebSocket connection. Created on upgrade, dropped on disconnect;
/// never persisted.
#[derive(Clone, Debug)]
pub struct ConnectionRecord {
    pub connection_id: ConnectionId,
    pub opened_at: Timestamp,
    pub messages_sent: u64,
}

/// Counters reset with the process. `total_connections` and `messages_sent`
/// are monotonic; `active_connections` tracks the live set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct WebSocketStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub messages_sent: u64,
}

#[derive(Default)]
pub struct SessionRegistry {
    connections: Mutex<HashMap<ConnectionId, ConnectionRecord>>,
    total_connections: AtomicU64,
    messages_sent: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> ConnectionId {
        let id = Id::new_random();
        let record = ConnectionRecord {
            connection_id: id.clone(),
            opened_at: Timestamp(now_ms()),
            messages_sent: 0,
        };
        self.connections.lock().insert(id.clone(), record);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        id
    }

    pub fn unregister(&self, connection_id: &ConnectionId) {
        self.connections.lock().remove(connection_id);
    }

    /// Counts one outbound message. A stale id (already unregistered) is a
    /// no-op so the global counter always matches delivered frames.
    pub fn record_message_sent(&self, connection_id: &ConnectionId) {
        let mut guard = self.connections.lock();
        if let Some(record) = guard.get_mut(connection_id) {
            record.messages_sent += 1;
            self.messages_sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> WebSocketStats {
        let active = self.connections.lock().len() as u64;
        WebSocketStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: active,
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
        }
    }
}
