use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::schema::{group_messages, messages};

/// A persisted direct message.
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = messages)]
pub struct DirectMessage {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewDirectMessage<'a> {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: &'a str,
    pub created_at: DateTime<Utc>,
}

/// A persisted group message.
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = group_messages)]
pub struct GroupMessage {
    pub id: i64,
    pub group_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = group_messages)]
pub struct NewGroupMessage<'a> {
    pub id: i64,
    pub group_id: i64,
    pub sender_id: i64,
    pub content: &'a str,
    pub created_at: DateTime<Utc>,
}

/// A direct message joined with its sender's nickname, as served by the
/// history endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DirectHistoryEntry {
    pub id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub receiver_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A group message joined with its sender's nickname.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GroupHistoryEntry {
    pub id: i64,
    pub group_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
