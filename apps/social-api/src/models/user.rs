use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;

use crate::db::schema::users;

/// A user row as the relay sees it: identity, display metadata and the
/// durable online flag.
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i64,
    pub nickname: String,
    pub avatar: Option<String>,
    pub online_status: bool,
    pub created_at: DateTime<Utc>,
}
