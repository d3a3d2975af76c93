use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::db::schema::notifications;

/// A durable, per-recipient notification record.
///
/// `actor_id` is `None` for system-generated notifications. Only `is_read`
/// ever changes after insertion.
#[derive(Debug, Clone, Queryable, Selectable, Serialize, ToSchema)]
#[diesel(table_name = notifications)]
pub struct Notification {
    pub id: i64,
    pub recipient_id: i64,
    pub actor_id: Option<i64>,
    #[serde(rename = "type")]
    pub type_: String,
    #[schema(value_type = Object)]
    pub data: Value,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification<'a> {
    pub id: i64,
    pub recipient_id: i64,
    pub actor_id: Option<i64>,
    pub type_: &'a str,
    pub data: &'a Value,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}
