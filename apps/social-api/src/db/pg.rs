//! Postgres implementation of [`Store`] on top of diesel-async.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde_json::Value;
use social_common::SnowflakeGenerator;

use crate::db::pool::DbPool;
use crate::db::schema::{followers, group_members, group_messages, messages, notifications, sessions, users};
use crate::error::ApiError;
use crate::models::message::{
    DirectHistoryEntry, DirectMessage, GroupHistoryEntry, GroupMessage, NewDirectMessage,
    NewGroupMessage,
};
use crate::models::notification::{NewNotification, Notification};
use crate::models::user::User;

use super::store::{PresenceRow, Store};

pub struct PgStore {
    pool: DbPool,
    snowflake: Arc<SnowflakeGenerator>,
}

impl PgStore {
    pub fn new(pool: DbPool, snowflake: Arc<SnowflakeGenerator>) -> Self {
        Self { pool, snowflake }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn session_user(&self, token: &str) -> Result<Option<i64>, ApiError> {
        let mut conn = self.pool.get().await?;
        let row: Option<(i64, DateTime<Utc>)> = sessions::table
            .filter(sessions::cookie_token.eq(token))
            .select((sessions::user_id, sessions::expiry))
            .first(&mut conn)
            .await
            .optional()?;

        Ok(row
            .filter(|(_, expiry)| *expiry > Utc::now())
            .map(|(user_id, _)| user_id))
    }

    async fn find_user(&self, user_id: i64) -> Result<Option<User>, ApiError> {
        let mut conn = self.pool.get().await?;
        let user = users::table
            .find(user_id)
            .select(User::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(user)
    }

    async fn are_related(&self, a: i64, b: i64) -> Result<bool, ApiError> {
        let mut conn = self.pool.get().await?;
        let related = diesel::select(exists(
            followers::table.filter(
                (followers::follower_id.eq(a).and(followers::followed_id.eq(b)))
                    .or(followers::follower_id.eq(b).and(followers::followed_id.eq(a))),
            ),
        ))
        .get_result::<bool>(&mut conn)
        .await?;
        Ok(related)
    }

    async fn is_group_member(&self, group_id: i64, user_id: i64) -> Result<bool, ApiError> {
        let mut conn = self.pool.get().await?;
        let member = diesel::select(exists(
            group_members::table
                .filter(group_members::group_id.eq(group_id))
                .filter(group_members::user_id.eq(user_id)),
        ))
        .get_result::<bool>(&mut conn)
        .await?;
        Ok(member)
    }

    async fn group_members_except(
        &self,
        group_id: i64,
        exclude: i64,
    ) -> Result<Vec<i64>, ApiError> {
        let mut conn = self.pool.get().await?;
        let members = group_members::table
            .filter(group_members::group_id.eq(group_id))
            .filter(group_members::user_id.ne(exclude))
            .select(group_members::user_id)
            .distinct()
            .load::<i64>(&mut conn)
            .await?;
        Ok(members)
    }

    async fn insert_direct_message(
        &self,
        sender_id: i64,
        receiver_id: i64,
        content: &str,
    ) -> Result<DirectMessage, ApiError> {
        let mut conn = self.pool.get().await?;
        let message = diesel::insert_into(messages::table)
            .values(NewDirectMessage {
                id: self.snowflake.generate(),
                sender_id,
                receiver_id,
                content,
                created_at: Utc::now(),
            })
            .returning(DirectMessage::as_returning())
            .get_result(&mut conn)
            .await?;
        Ok(message)
    }

    async fn insert_group_message(
        &self,
        group_id: i64,
        sender_id: i64,
        content: &str,
    ) -> Result<GroupMessage, ApiError> {
        let mut conn = self.pool.get().await?;
        let message = diesel::insert_into(group_messages::table)
            .values(NewGroupMessage {
                id: self.snowflake.generate(),
                group_id,
                sender_id,
                content,
                created_at: Utc::now(),
            })
            .returning(GroupMessage::as_returning())
            .get_result(&mut conn)
            .await?;
        Ok(message)
    }

    async fn insert_notification(
        &self,
        recipient_id: i64,
        actor_id: Option<i64>,
        kind: &str,
        data: &Value,
    ) -> Result<Notification, ApiError> {
        let mut conn = self.pool.get().await?;
        let notification = diesel::insert_into(notifications::table)
            .values(NewNotification {
                id: self.snowflake.generate(),
                recipient_id,
                actor_id,
                type_: kind,
                data,
                is_read: false,
                created_at: Utc::now(),
            })
            .returning(Notification::as_returning())
            .get_result(&mut conn)
            .await?;
        Ok(notification)
    }

    async fn list_notifications(
        &self,
        recipient_id: i64,
        limit: i64,
    ) -> Result<Vec<Notification>, ApiError> {
        let mut conn = self.pool.get().await?;
        let rows = notifications::table
            .filter(notifications::recipient_id.eq(recipient_id))
            .order((notifications::created_at.desc(), notifications::id.desc()))
            .limit(limit)
            .select(Notification::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn mark_notifications_read(
        &self,
        recipient_id: i64,
        id: Option<i64>,
    ) -> Result<usize, ApiError> {
        let mut conn = self.pool.get().await?;
        let owned = notifications::table.filter(notifications::recipient_id.eq(recipient_id));
        let touched = match id {
            Some(id) => {
                diesel::update(owned.filter(notifications::id.eq(id)))
                    .set(notifications::is_read.eq(true))
                    .execute(&mut conn)
                    .await?
            }
            None => {
                diesel::update(owned)
                    .set(notifications::is_read.eq(true))
                    .execute(&mut conn)
                    .await?
            }
        };
        Ok(touched)
    }

    async fn set_online(&self, user_id: i64, online: bool) -> Result<(), ApiError> {
        let mut conn = self.pool.get().await?;
        diesel::update(users::table.find(user_id))
            .set(users::online_status.eq(online))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn presence_rows(&self) -> Result<Vec<PresenceRow>, ApiError> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<(i64, String, Option<String>, bool)> = users::table
            .select((users::id, users::nickname, users::avatar, users::online_status))
            .load(&mut conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(id, nickname, avatar, is_online)| PresenceRow {
                id,
                nickname,
                avatar,
                is_online,
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
        let mut conn = self.pool.get().await?;
        let rows: Vec<(i64, i64, String, i64, String, DateTime<Utc>)> = messages::table
            .inner_join(users::table)
            .filter(
                (messages::sender_id.eq(user_id).and(messages::receiver_id.eq(other_id)))
                    .or(messages::sender_id.eq(other_id).and(messages::receiver_id.eq(user_id))),
            )
            .order((messages::created_at.desc(), messages::id.desc()))
            .limit(limit)
            .offset(offset)
            .select((
                messages::id,
                messages::sender_id,
                users::nickname,
                messages::receiver_id,
                messages::content,
                messages::created_at,
            ))
            .load(&mut conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, sender_id, sender_name, receiver_id, content, created_at)| DirectHistoryEntry {
                    id,
                    sender_id,
                    sender_name,
                    receiver_id,
                    content,
                    created_at,
                },
            )
            .collect())
    }

    async fn group_history(
        &self,
        group_id: i64,
        before_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<GroupHistoryEntry>, ApiError> {
        let mut conn = self.pool.get().await?;
        let mut query = group_messages::table
            .inner_join(users::table)
            .filter(group_messages::group_id.eq(group_id))
            .order(group_messages::id.desc())
            .limit(limit)
            .select((
                group_messages::id,
                group_messages::group_id,
                group_messages::sender_id,
                users::nickname,
                group_messages::content,
                group_messages::created_at,
            ))
            .into_boxed();
        if let Some(before_id) = before_id {
            query = query.filter(group_messages::id.lt(before_id));
        }

        let rows: Vec<(i64, i64, i64, String, String, DateTime<Utc>)> =
            query.load(&mut conn).await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, group_id, sender_id, sender_name, content, created_at)| GroupHistoryEntry {
                    id,
                    group_id,
                    sender_id,
                    sender_name,
                    content,
                    created_at,
                },
            )
            .collect())
    }
}
