//! Message history endpoints.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, ApiErrorBody};
use crate::models::message::{DirectHistoryEntry, GroupHistoryEntry};
use crate::AppState;

const DIRECT_PAGE_SIZE: i64 = 10;
const GROUP_DEFAULT_LIMIT: i64 = 50;
const GROUP_MAX_LIMIT: i64 = 200;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/messages/history", get(direct_history))
        .route("/group/messages", get(group_history))
}

// ---------------------------------------------------------------------------
// GET /api/messages/history
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DirectHistoryQuery {
    /// The other participant.
    pub user_id: Option<String>,
    /// Messages to skip, counted from the newest.
    pub offset: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/messages/history",
    tag = "History",
    security(("session" = [])),
    params(DirectHistoryQuery),
    responses(
        (status = 200, description = "One page, oldest first", body = Vec<DirectHistoryEntry>),
        (status = 400, description = "Missing or invalid user_id", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
)]
pub async fn direct_history(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<DirectHistoryQuery>,
) -> Result<Json<Vec<DirectHistoryEntry>>, ApiError> {
    let other_id = required_id(query.user_id.as_deref(), "user_id")?;
    let offset = lenient_number(query.offset.as_deref()).unwrap_or(0).max(0);

    let mut rows = state
        .store
        .direct_history(user_id, other_id, offset, DIRECT_PAGE_SIZE)
        .await?;
    rows.reverse();
    Ok(Json(rows))
}

// ---------------------------------------------------------------------------
// GET /api/group/messages
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct GroupHistoryQuery {
    pub group_id: Option<String>,
    /// Defaults to 50, capped at 200.
    pub limit: Option<String>,
    /// Only messages with a smaller id.
    pub before_id: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/group/messages",
    tag = "History",
    security(("session" = [])),
    params(GroupHistoryQuery),
    responses(
        (status = 200, description = "Messages, oldest first", body = Vec<GroupHistoryEntry>),
        (status = 400, description = "Missing or invalid group_id", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Not a member", body = ApiErrorBody),
    ),
)]
pub async fn group_history(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<GroupHistoryQuery>,
) -> Result<Json<Vec<GroupHistoryEntry>>, ApiError> {
    let group_id = required_id(query.group_id.as_deref(), "group_id")?;
    let limit = match lenient_number(query.limit.as_deref()) {
        Some(n) if n > 0 => n.min(GROUP_MAX_LIMIT),
        _ => GROUP_DEFAULT_LIMIT,
    };
    let before_id = lenient_number(query.before_id.as_deref()).filter(|id| *id > 0);

    if !state.store.is_group_member(group_id, user_id).await? {
        return Err(ApiError::forbidden("Not a member of this group"));
    }

    let mut rows = state.store.group_history(group_id, before_id, limit).await?;
    rows.reverse();
    Ok(Json(rows))
}

fn required_id(raw: Option<&str>, name: &str) -> Result<i64, ApiError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("Missing {name}")))?;
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid {name}")))
}

/// Unparseable values are treated as absent.
fn lenient_number(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|s| s.trim().parse().ok())
}
