//! Notification feed endpoints.

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, ApiErrorBody};
use crate::models::notification::Notification;
use crate::AppState;

/// Size of the feed returned by `GET /api/notifications`.
const FEED_LIMIT: i64 = 50;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications/mark-read", post(mark_read))
}

// ---------------------------------------------------------------------------
// GET /api/notifications
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/notifications",
    tag = "Notifications",
    security(("session" = [])),
    responses(
        (status = 200, description = "Most recent notifications, newest first", body = Vec<Notification>),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
)]
pub async fn list_notifications(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let rows = state.store.list_notifications(user_id, FEED_LIMIT).await?;
    Ok(Json(rows))
}

// ---------------------------------------------------------------------------
// POST /api/notifications/mark-read
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct MarkReadRequest {
    /// Notification to mark; omit to mark every notification read.
    pub id: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MarkReadResponse {
    pub status: String,
    pub updated: usize,
}

#[utoipa::path(
    post,
    path = "/api/notifications/mark-read",
    tag = "Notifications",
    security(("session" = [])),
    request_body(content = MarkReadRequest, description = "Optional; an empty body marks all"),
    responses(
        (status = 200, description = "Marked read", body = MarkReadResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
)]
pub async fn mark_read(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<MarkReadResponse>, ApiError> {
    // A missing or unreadable body means "all".
    let request: MarkReadRequest = serde_json::from_slice(&body).unwrap_or_default();
    let updated = state
        .store
        .mark_notifications_read(user_id, request.id)
        .await?;
    Ok(Json(MarkReadResponse {
        status: "ok".to_string(),
        updated,
    }))
}
