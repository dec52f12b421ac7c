//! Authoritative set of live connections.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use parlor_core::{ConnectionId, UserId};
use tokio::sync::mpsc;
use tracing::debug;

use super::connection::Connection;

/// Live connections keyed by a process-unique [`ConnectionId`].
///
/// Ids are handed out in admission order, so iteration over the map is
/// admission order too. The lock is only held for map operations; callers
/// that do I/O work from a [`snapshot`](Self::snapshot).
pub struct ConnectionRegistry {
    connections: RwLock<BTreeMap<ConnectionId, Arc<Connection>>>,
    next_id: AtomicU64,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            max_send_queue: max_send_queue.max(1),
        }
    }

    /// Build a connection for `client_id` with a fresh id and a bounded
    /// outbound queue. The connection is not registered yet.
    pub fn create(&self, client_id: UserId) -> (Arc<Connection>, mpsc::Receiver<Arc<String>>) {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        (Arc::new(Connection::new(id, client_id, tx)), rx)
    }

    /// Create and register in one step.
    pub fn admit(&self, client_id: UserId) -> (Arc<Connection>, mpsc::Receiver<Arc<String>>) {
        let (conn, rx) = self.create(client_id);
        self.add(Arc::clone(&conn));
        (conn, rx)
    }

    /// Insert a connection. The same `client_id` may appear any number of times.
    pub fn add(&self, connection: Arc<Connection>) {
        debug!(conn_id = %connection.id, client_id = %connection.client_id, "connection registered");
        let _ = self.connections.write().insert(connection.id, connection);
    }

    /// Remove a connection. Absent ids are ignored.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let removed = self.connections.write().remove(&id);
        if removed.is_some() {
            debug!(conn_id = %id, "connection deregistered");
        }
        removed
    }

    /// Point-in-time copy of every live connection in admission order.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Live connections belonging to one identity.
    pub fn connections_for(&self, client_id: UserId) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .values()
            .filter(|c| c.client_id == client_id)
            .cloned()
            .collect()
    }
}
