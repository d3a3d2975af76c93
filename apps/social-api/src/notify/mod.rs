//! Notification bridge: persist a notification, then push a realtime copy
//! through the bus to the recipient if they are connected.

pub mod bus;

use std::sync::Arc;

use serde_json::Value;

use crate::db::store::Store;
use crate::gateway::connection::OutboundFrame;
use crate::gateway::events::ServerFrame;

use self::bus::{BusMessage, NotificationBus};

/// Notification type tags written by the relay.
pub mod kind {
    pub const NEW_MESSAGE: &str = "new_message";
    pub const GROUP_MESSAGE: &str = "group_message";
    pub const GROUP_MESSAGE_SENT: &str = "group_message_sent";
}

/// What happened to one [`Notifier::notify`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyOutcome {
    /// Id of the durable row, `None` if the write failed.
    pub persisted: Option<i64>,
    /// Whether the realtime copy was accepted by the bus.
    pub published: bool,
}

#[derive(Clone)]
pub struct Notifier {
    store: Arc<dyn Store>,
    bus: NotificationBus,
    public_url: Arc<str>,
}

impl Notifier {
    pub fn new(store: Arc<dyn Store>, bus: NotificationBus, public_url: &str) -> Self {
        Self {
            store,
            bus,
            public_url: Arc::from(public_url.trim_end_matches('/')),
        }
    }

    /// Persist and best-effort broadcast a notification.
    ///
    /// A failed durable write is logged and does not stop the realtime copy.
    /// `actor_id` of `None` (or `0`) marks a system notification.
    pub async fn notify(
        &self,
        recipient_id: i64,
        actor_id: Option<i64>,
        kind: &str,
        mut payload: Value,
    ) -> NotifyOutcome {
        let actor_id = actor_id.filter(|id| *id > 0);
        if let Some(actor_id) = actor_id {
            self.enrich(&mut payload, actor_id).await;
        }

        let persisted = match self
            .store
            .insert_notification(recipient_id, actor_id, kind, &payload)
            .await
        {
            Ok(row) => Some(row.id),
            Err(err) => {
                tracing::warn!(recipient_id, kind, error = %err, "failed to persist notification");
                None
            }
        };

        let frame = ServerFrame::Notification {
            id: persisted,
            notification_type: kind.to_string(),
            data: payload,
        };
        let published = match OutboundFrame::encode(&frame) {
            Some(frame) => self.bus.publish(BusMessage {
                recipient_id,
                frame,
            }),
            None => false,
        };

        NotifyOutcome {
            persisted,
            published,
        }
    }

    /// Adds `actor_nickname` and `actor_avatar` to an object payload.
    async fn enrich(&self, payload: &mut Value, actor_id: i64) {
        let Value::Object(map) = payload else {
            return;
        };
        match self.store.find_user(actor_id).await {
            Ok(Some(actor)) => {
                let avatar = absolute_url(&self.public_url, actor.avatar.as_deref().unwrap_or(""));
                map.insert("actor_nickname".to_string(), Value::String(actor.nickname));
                map.insert("actor_avatar".to_string(), Value::String(avatar));
            }
            Ok(None) => {}
            Err(err) => {
                tracing::debug!(actor_id, error = %err, "actor lookup failed, payload not enriched");
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.bus.dropped()
    }
}

/// Resolve a stored path against the public base URL. Empty stays empty and
/// absolute URLs are returned unchanged.
pub fn absolute_url(base: &str, path: &str) -> String {
    if path.is_empty() || path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::db::memory::MemoryStore;

    fn notifier(store: Arc<MemoryStore>, capacity: usize) -> (Notifier, tokio::sync::mpsc::Receiver<BusMessage>) {
        let (bus, rx) = NotificationBus::channel(capacity);
        (Notifier::new(store, bus, "http://social.test/"), rx)
    }

    #[test]
    fn absolute_url_joins_paths() {
        assert_eq!(absolute_url("http://x", "/a.png"), "http://x/a.png");
        assert_eq!(absolute_url("http://x/", "a.png"), "http://x/a.png");
        assert_eq!(absolute_url("http://x", ""), "");
        assert_eq!(absolute_url("http://x", "https://cdn/a.png"), "https://cdn/a.png");
    }

    #[tokio::test]
    async fn enriches_persists_and_publishes() {
        let store = Arc::new(MemoryStore::new());
        store.add_user(1, "amy", Some("/uploads/amy.png"));
        let (notifier, mut rx) = notifier(store.clone(), 4);

        let outcome = notifier
            .notify(2, Some(1), "follow_request", json!({ "url": "/profile/1" }))
            .await;
        assert!(outcome.persisted.is_some());
        assert!(outcome.published);

        let stored = store.notifications_for(2);
        assert_eq!(stored[0].data["actor_nickname"], "amy");
        assert_eq!(stored[0].data["actor_avatar"], "http://social.test/uploads/amy.png");

        let message = rx.recv().await.unwrap();
        assert_eq!(message.recipient_id, 2);
        let frame: Value = serde_json::from_str(message.frame.text.as_str()).unwrap();
        assert_eq!(frame["type"], "notification");
        assert_eq!(frame["id"], json!(outcome.persisted));
        assert_eq!(frame["notification_type"], "follow_request");
        assert_eq!(frame["data"]["url"], "/profile/1");
    }

    #[tokio::test]
    async fn system_notification_is_not_enriched() {
        let store = Arc::new(MemoryStore::new());
        let (notifier, _rx) = notifier(store.clone(), 4);

        notifier.notify(2, Some(0), "system", json!({ "text": "hi" })).await;
        let stored = store.notifications_for(2);
        assert_eq!(stored[0].actor_id, None);
        assert!(stored[0].data.get("actor_nickname").is_none());
    }

    #[tokio::test]
    async fn persistence_failure_still_publishes() {
        let store = Arc::new(MemoryStore::new());
        store.fail_notification_writes(true);
        let (notifier, mut rx) = notifier(store.clone(), 4);

        let outcome = notifier.notify(2, None, "system", json!({})).await;
        assert_eq!(outcome.persisted, None);
        assert!(outcome.published);

        let frame: Value = serde_json::from_str(rx.recv().await.unwrap().frame.text.as_str()).unwrap();
        assert_eq!(frame["id"], Value::Null);
        assert!(store.notifications_for(2).is_empty());
    }

    #[tokio::test]
    async fn full_bus_drops_without_blocking() {
        let store = Arc::new(MemoryStore::new());
        let (notifier, _rx) = notifier(store.clone(), 1);

        assert!(notifier.notify(2, None, "a", json!({})).await.published);
        let second = notifier.notify(2, None, "b", json!({})).await;
        assert!(!second.published);
        assert!(second.persisted.is_some());
        assert_eq!(notifier.dropped(), 1);
        assert_eq!(store.notifications_for(2).len(), 2);
    }
}
