pub mod health;
pub mod rooms;
pub mod ws;

use axum::Router;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(ws::router())
        .nest("/api/v1", rooms::router())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        rooms::online_users,
        rooms::stats,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::hub::HubStats,
            health::HealthResponse,
            rooms::OnlineUsersResponse,
            // Realtime payloads
            crate::events::PresencePayload,
            crate::events::TypingPayload,
            crate::events::MessageReadPayload,
            crate::events::ErrorPayload,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Rooms", description = "Room presence and hub statistics"),
    )
)]
pub struct ApiDoc;
