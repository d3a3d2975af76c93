//! Registry of live connections, at most one per user.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use super::connection::{Connection, Delivery, OutboundFrame};
use super::events::ServerFrame;

/// Shared map from user id to that user's current connection.
///
/// Lookups take the shared lock; register and unregister take the exclusive
/// lock. No lock is held while frames are enqueued.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<i64, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Make `conn` the current connection for its user.
    ///
    /// A previous connection for the same user is closed and returned.
    pub fn register(&self, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        let previous = self.connections.write().insert(conn.user_id, conn);
        if let Some(old) = &previous {
            old.close();
        }
        previous
    }

    /// Remove the entry for `user_id` only if it is still `connection_id`.
    ///
    /// Returns `false` when a newer connection has replaced it, in which case
    /// the newer entry is left untouched.
    pub fn unregister(&self, user_id: i64, connection_id: &str) -> bool {
        let mut connections = self.connections.write();
        match connections.get(&user_id) {
            Some(current) if current.id == connection_id => {
                connections.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, user_id: i64) -> Option<Arc<Connection>> {
        self.connections.read().get(&user_id).cloned()
    }

    pub fn is_online(&self, user_id: i64) -> bool {
        self.connections.read().contains_key(&user_id)
    }

    /// All current connections, copied out so callers can enqueue without the lock.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Enqueue an already encoded frame for `user_id`, if connected.
    pub fn deliver(&self, user_id: i64, frame: OutboundFrame) -> Delivery {
        match self.get(user_id) {
            Some(conn) => conn.deliver(frame),
            None => Delivery::Closed,
        }
    }

    pub fn send(&self, user_id: i64, frame: &ServerFrame) -> Delivery {
        match self.get(user_id) {
            Some(conn) => conn.send(frame),
            None => Delivery::Closed,
        }
    }

    /// Enqueue an arbitrary JSON payload for `user_id`. Returns whether the
    /// user had a live connection that accepted (or deferred) the frame.
    pub fn send_json(&self, user_id: i64, payload: &Value) -> bool {
        let Some(frame) = OutboundFrame::from_json(payload) else {
            return false;
        };
        self.deliver(user_id, frame) != Delivery::Closed
    }

    /// Enqueue the same frame on every live connection.
    pub fn broadcast(&self, frame: &OutboundFrame) {
        for conn in self.connections() {
            conn.deliver(frame.clone());
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn connect(user_id: i64) -> (Arc<Connection>, tokio::sync::mpsc::Receiver<OutboundFrame>) {
        Connection::new(user_id, format!("user{user_id}"), 8, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = connect(1);
        assert!(registry.register(conn.clone()).is_none());
        assert_eq!(registry.get(1).unwrap().id, conn.id);
        assert!(registry.is_online(1));
        assert!(registry.get(2).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn second_registration_replaces_and_closes_first() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = connect(1);
        let (second, _rx2) = connect(1);
        registry.register(first.clone());

        let replaced = registry.register(second.clone()).unwrap();
        assert_eq!(replaced.id, first.id);
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(registry.get(1).unwrap().id, second.id);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn stale_unregister_leaves_newer_entry() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = connect(1);
        let (second, _rx2) = connect(1);
        registry.register(first.clone());
        registry.register(second.clone());

        assert!(!registry.unregister(1, &first.id));
        assert_eq!(registry.get(1).unwrap().id, second.id);

        assert!(registry.unregister(1, &second.id));
        assert!(registry.is_empty());
        assert!(!registry.unregister(1, &second.id));
    }

    #[tokio::test]
    async fn send_json_reaches_only_connected_users() {
        let registry = ConnectionRegistry::new();
        let (conn, mut rx) = connect(1);
        registry.register(conn);

        assert!(registry.send_json(1, &serde_json::json!({ "type": "ping" })));
        assert!(!registry.send_json(2, &serde_json::json!({ "type": "ping" })));
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.text.as_str(), r#"{"type":"ping"}"#);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connection() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = connect(1);
        let (b, mut rx_b) = connect(2);
        registry.register(a);
        registry.register(b);

        let frame = OutboundFrame::from_json(&serde_json::json!({ "type": "user_list" })).unwrap();
        registry.broadcast(&frame);
        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_churn_keeps_at_most_one_entry_per_user() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let (conn, _rx) = connect(7);
                    registry.register(conn.clone());
                    tokio::task::yield_now().await;
                    registry.unregister(7, &conn.id);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        // Whoever registered last also unregistered last.
        assert!(registry.is_empty());
    }
}
