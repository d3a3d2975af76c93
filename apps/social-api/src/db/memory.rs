//! In-process [`Store`] used by the test suites.
//!
//! Mirrors the Postgres semantics closely enough for the relay: ids are
//! assigned monotonically, sessions expire, and notification writes can be
//! made to fail on demand.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use crate::auth::tokens;
use crate::error::ApiError;
use crate::models::message::{DirectHistoryEntry, DirectMessage, GroupHistoryEntry, GroupMessage};
use crate::models::notification::Notification;
use crate::models::user::User;

use super::store::{PresenceRow, Store};

#[derive(Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    sessions: HashMap<String, (i64, DateTime<Utc>)>,
    /// (follower, followed)
    follows: BTreeSet<(i64, i64)>,
    /// (group, user)
    group_members: BTreeSet<(i64, i64)>,
    messages: Vec<DirectMessage>,
    group_messages: Vec<GroupMessage>,
    notifications: Vec<Notification>,
    next_id: i64,
    fail_notifications: bool,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, id: i64, nickname: &str, avatar: Option<&str>) {
        self.tables.lock().users.insert(
            id,
            User {
                id,
                nickname: nickname.to_string(),
                avatar: avatar.map(str::to_string),
                online_status: false,
                created_at: Utc::now(),
            },
        );
    }

    pub fn follow(&self, follower_id: i64, followed_id: i64) {
        self.tables.lock().follows.insert((follower_id, followed_id));
    }

    pub fn add_group_member(&self, group_id: i64, user_id: i64) {
        self.tables.lock().group_members.insert((group_id, user_id));
    }

    /// Create a session valid for one day and return its token.
    pub fn issue_session(&self, user_id: i64) -> String {
        let token = tokens::generate_session_token();
        self.insert_session(&token, user_id, Utc::now() + Duration::days(1));
        token
    }

    pub fn insert_session(&self, token: &str, user_id: i64, expiry: DateTime<Utc>) {
        self.tables
            .lock()
            .sessions
            .insert(token.to_string(), (user_id, expiry));
    }

    /// While set, every `insert_notification` call fails.
    pub fn fail_notification_writes(&self, fail: bool) {
        self.tables.lock().fail_notifications = fail;
    }

    pub fn direct_messages(&self) -> Vec<DirectMessage> {
        self.tables.lock().messages.clone()
    }

    pub fn group_messages(&self) -> Vec<GroupMessage> {
        self.tables.lock().group_messages.clone()
    }

    /// Notifications of one recipient in insertion order.
    pub fn notifications_for(&self, recipient_id: i64) -> Vec<Notification> {
        self.tables
            .lock()
            .notifications
            .iter()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect()
    }

    pub fn is_online(&self, user_id: i64) -> bool {
        self.tables
            .lock()
            .users
            .get(&user_id)
            .is_some_and(|u| u.online_status)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn session_user(&self, token: &str) -> Result<Option<i64>, ApiError> {
        let tables = self.tables.lock();
        Ok(tables
            .sessions
            .get(token)
            .filter(|(_, expiry)| *expiry > Utc::now())
            .map(|(user_id, _)| *user_id))
    }

    async fn find_user(&self, user_id: i64) -> Result<Option<User>, ApiError> {
        Ok(self.tables.lock().users.get(&user_id).cloned())
    }

    async fn are_related(&self, a: i64, b: i64) -> Result<bool, ApiError> {
        let tables = self.tables.lock();
        Ok(tables.follows.contains(&(a, b)) || tables.follows.contains(&(b, a)))
    }

    async fn is_group_member(&self, group_id: i64, user_id: i64) -> Result<bool, ApiError> {
        Ok(self.tables.lock().group_members.contains(&(group_id, user_id)))
    }

    async fn group_members_except(
        &self,
        group_id: i64,
        exclude: i64,
    ) -> Result<Vec<i64>, ApiError> {
        Ok(self
            .tables
            .lock()
            .group_members
            .range((group_id, i64::MIN)..=(group_id, i64::MAX))
            .map(|(_, user_id)| *user_id)
            .filter(|user_id| *user_id != exclude)
            .collect())
    }

    async fn insert_direct_message(
        &self,
        sender_id: i64,
        receiver_id: i64,
        content: &str,
    ) -> Result<DirectMessage, ApiError> {
        let mut tables = self.tables.lock();
        let message = DirectMessage {
            id: tables.next_id(),
            sender_id,
            receiver_id,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        tables.messages.push(message.clone());
        Ok(message)
    }

    async fn insert_group_message(
        &self,
        group_id: i64,
        sender_id: i64,
        content: &str,
    ) -> Result<GroupMessage, ApiError> {
        let mut tables = self.tables.lock();
        let message = GroupMessage {
            id: tables.next_id(),
            group_id,
            sender_id,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        tables.group_messages.push(message.clone());
        Ok(message)
    }

    async fn insert_notification(
        &self,
        recipient_id: i64,
        actor_id: Option<i64>,
        kind: &str,
        data: &Value,
    ) -> Result<Notification, ApiError> {
        let mut tables = self.tables.lock();
        if tables.fail_notifications {
            return Err(ApiError::internal("notification store unavailable"));
        }
        let notification = Notification {
            id: tables.next_id(),
            recipient_id,
            actor_id,
            type_: kind.to_string(),
            data: data.clone(),
            is_read: false,
            created_at: Utc::now(),
        };
        tables.notifications.push(notification.clone());
        Ok(notification)
    }

    async fn list_notifications(
        &self,
        recipient_id: i64,
        limit: i64,
    ) -> Result<Vec<Notification>, ApiError> {
        let tables = self.tables.lock();
        let mut rows: Vec<Notification> = tables
            .notifications
            .iter()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }

    async fn mark_notifications_read(
        &self,
        recipient_id: i64,
        id: Option<i64>,
    ) -> Result<usize, ApiError> {
        let mut tables = self.tables.lock();
        let mut touched = 0;
        for n in tables
            .notifications
            .iter_mut()
            .filter(|n| n.recipient_id == recipient_id && id.map_or(true, |id| n.id == id))
        {
            n.is_read = true;
            touched += 1;
        }
        Ok(touched)
    }

    async fn set_online(&self, user_id: i64, online: bool) -> Result<(), ApiError> {
        if let Some(user) = self.tables.lock().users.get_mut(&user_id) {
            user.online_status = online;
        }
        Ok(())
    }

    async fn presence_rows(&self) -> Result<Vec<PresenceRow>, ApiError> {
        Ok(self
            .tables
            .lock()
            .users
            .values()
            .map(|u| PresenceRow {
                id: u.id,
                nickname: u.nickname.clone(),
                avatar: u.avatar.clone(),
                is_online: u.online_status,
            })
            .collect())
    }

    async fn direct_history(
        &self,
        user_id: i64,
        other_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<DirectHistoryEntry>, ApiError> {
        let tables = self.tables.lock();
        let mut rows: Vec<&DirectMessage> = tables
            .messages
            .iter()
            .filter(|m| {
                (m.sender_id == user_id && m.receiver_id == other_id)
                    || (m.sender_id == other_id && m.receiver_id == user_id)
            })
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        Ok(rows
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .filter_map(|m| {
                let sender = tables.users.get(&m.sender_id)?;
                Some(DirectHistoryEntry {
                    id: m.id,
                    sender_id: m.sender_id,
                    sender_name: sender.nickname.clone(),
                    receiver_id: m.receiver_id,
                    content: m.content.clone(),
                    created_at: m.created_at,
                })
            })
            .collect())
    }

    async fn group_history(
        &self,
        group_id: i64,
        before_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<GroupHistoryEntry>, ApiError> {
        let tables = self.tables.lock();
        let mut rows: Vec<&GroupMessage> = tables
            .group_messages
            .iter()
            .filter(|m| m.group_id == group_id && before_id.map_or(true, |b| m.id < b))
            .collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));

        Ok(rows
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .filter_map(|m| {
                let sender = tables.users.get(&m.sender_id)?;
                Some(GroupHistoryEntry {
                    id: m.id,
                    group_id: m.group_id,
                    sender_id: m.sender_id,
                    sender_name: sender.nickname.clone(),
                    content: m.content.clone(),
                    created_at: m.created_at,
                })
            })
            .collect())
    }
}
