//! The durable collaborators the realtime core consumes.
//!
//! Every write is an independent, immediately committed statement: a message
//! insert and the notification inserts that follow it are not atomic together.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ApiError;
use crate::models::message::{DirectHistoryEntry, DirectMessage, GroupHistoryEntry, GroupMessage};
use crate::models::notification::Notification;
use crate::models::user::User;

/// One user as seen by the presence snapshot query.
///
/// The snapshot is the same for every viewer, so it carries no per-user
/// message activity.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceRow {
    pub id: i64,
    pub nickname: String,
    pub avatar: Option<String>,
    pub is_online: bool,
}

/// Persistence seen by the relay, the notification bridge and the HTTP routes.
///
/// Backed by Postgres in production ([`PgStore`](super::pg::PgStore)) and an
/// in-memory model in tests ([`MemoryStore`](super::memory::MemoryStore)).
#[async_trait]
pub trait Store: Send + Sync {
    /// Resolve a session token to its user, ignoring expired sessions.
    async fn session_user(&self, token: &str) -> Result<Option<i64>, ApiError>;

    async fn find_user(&self, user_id: i64) -> Result<Option<User>, ApiError>;

    /// True when either user follows the other.
    async fn are_related(&self, a: i64, b: i64) -> Result<bool, ApiError>;

    async fn is_group_member(&self, group_id: i64, user_id: i64) -> Result<bool, ApiError>;

    /// Members of `group_id` other than `exclude`.
    async fn group_members_except(&self, group_id: i64, exclude: i64)
        -> Result<Vec<i64>, ApiError>;

    async fn insert_direct_message(
        &self,
        sender_id: i64,
        receiver_id: i64,
        content: &str,
    ) -> Result<DirectMessage, ApiError>;

    async fn insert_group_message(
        &self,
        group_id: i64,
        sender_id: i64,
        content: &str,
    ) -> Result<GroupMessage, ApiError>;

    async fn insert_notification(
        &self,
        recipient_id: i64,
        actor_id: Option<i64>,
        kind: &str,
        data: &Value,
    ) -> Result<Notification, ApiError>;

    /// Newest first.
    async fn list_notifications(
        &self,
        recipient_id: i64,
        limit: i64,
    ) -> Result<Vec<Notification>, ApiError>;

    /// Marks one notification (when `id` is given and owned by `recipient_id`)
    /// or all of the recipient's notifications as read. Returns rows touched.
    async fn mark_notifications_read(
        &self,
        recipient_id: i64,
        id: Option<i64>,
    ) -> Result<usize, ApiError>;

    async fn set_online(&self, user_id: i64, online: bool) -> Result<(), ApiError>;

    /// Every user with their online flag and last direct-message time. Unordered.
    async fn presence_rows(&self) -> Result<Vec<PresenceRow>, ApiError>;

    /// Direct messages between the two users, newest first.
    async fn direct_history(
        &self,
        user_id: i64,
        other_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<DirectHistoryEntry>, ApiError>;

    /// Group messages with `id < before_id` (when given), newest first.
    async fn group_history(
        &self,
        group_id: i64,
        before_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<GroupHistoryEntry>, ApiError>;
}
