pub mod health;
pub mod history;
pub mod notifications;

use axum::Router;
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::auth::tokens::SESSION_COOKIE;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router())
        .nest(
            "/api",
            notifications::router().merge(history::router()),
        )
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "session",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new(SESSION_COOKIE))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        notifications::list_notifications,
        notifications::mark_read,
        history::direct_history,
        history::group_history,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::models::notification::Notification,
            crate::models::message::DirectHistoryEntry,
            crate::models::message::GroupHistoryEntry,
            health::HealthResponse,
            notifications::MarkReadRequest,
            notifications::MarkReadResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Notifications", description = "Notification feed"),
        (name = "History", description = "Direct and group message history"),
    )
)]
pub struct ApiDoc;
