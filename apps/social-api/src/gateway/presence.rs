//! Durable online flags and presence snapshots.
//!
//! The durable flag is written in the same order as registry mutations, so a
//! replaced connection tearing down late can never mark a connected user
//! offline.

use std::sync::Arc;

use crate::db::store::{PresenceRow, Store};
use crate::error::ApiError;

use super::connection::{Connection, OutboundFrame};
use super::events::{PresenceEntry, ServerFrame};
use super::registry::ConnectionRegistry;

pub struct PresenceTracker {
    store: Arc<dyn Store>,
    registry: Arc<ConnectionRegistry>,
    /// Serializes registry mutation together with the durable flag write.
    transitions: tokio::sync::Mutex<()>,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn Store>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            store,
            registry,
            transitions: tokio::sync::Mutex::new(()),
        }
    }

    /// Register a new connection, mark its user online, and broadcast.
    pub async fn connect(&self, conn: Arc<Connection>) {
        let user_id = conn.user_id;
        {
            let _guard = self.transitions.lock().await;
            if let Some(previous) = self.registry.register(conn.clone()) {
                tracing::info!(
                    user_id,
                    old_conn = %previous.id,
                    new_conn = %conn.id,
                    "connection replaced"
                );
            }
            if let Err(err) = self.store.set_online(user_id, true).await {
                tracing::error!(user_id, error = %err, "failed to mark user online");
            }
        }
        self.broadcast().await;
    }

    /// Tear down `conn`. Returns `true` if it was still the user's current
    /// connection, in which case the user is marked offline and a snapshot is
    /// broadcast. A replaced connection changes nothing.
    pub async fn disconnect(&self, conn: &Connection) -> bool {
        let user_id = conn.user_id;
        {
            let _guard = self.transitions.lock().await;
            if !self.registry.unregister(user_id, &conn.id) {
                tracing::debug!(user_id, conn_id = %conn.id, "stale connection closed");
                return false;
            }
            if let Err(err) = self.store.set_online(user_id, false).await {
                tracing::error!(user_id, error = %err, "failed to mark user offline");
            }
        }
        self.broadcast().await;
        true
    }

    /// Ordered presence list for every user.
    pub async fn snapshot(&self) -> Result<Vec<PresenceEntry>, ApiError> {
        let mut rows = self.store.presence_rows().await?;
        sort_presence(&mut rows);
        Ok(rows
            .into_iter()
            .map(|row| PresenceEntry {
                id: row.id.to_string(),
                nickname: row.nickname,
                avatar: row.avatar.unwrap_or_default(),
                is_online: row.is_online,
            })
            .collect())
    }

    /// Send the current snapshot to every connection. Failures are logged.
    pub async fn broadcast(&self) {
        let entries = match self.snapshot().await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::error!(error = %err, "failed to build presence snapshot");
                return;
            }
        };
        let content = match serde_json::to_string(&entries) {
            Ok(content) => content,
            Err(err) => {
                tracing::error!(error = %err, "failed to encode presence snapshot");
                return;
            }
        };
        if let Some(frame) = OutboundFrame::encode(&ServerFrame::UserList { content }) {
            tracing::debug!(
                users = entries.len(),
                connections = self.registry.len(),
                "broadcasting presence"
            );
            self.registry.broadcast(&frame);
        }
    }
}

/// Online first, then nickname ignoring case.
pub fn sort_presence(rows: &mut [PresenceRow]) {
    rows.sort_by(|a, b| {
        b.is_online
            .cmp(&a.is_online)
            .then_with(|| a.nickname.to_lowercase().cmp(&b.nickname.to_lowercase()))
            .then_with(|| a.id.cmp(&b.id))
    });
}
