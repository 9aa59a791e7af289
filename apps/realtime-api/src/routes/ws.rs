//! WebSocket upgrade into a room.

use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;

use crate::auth::middleware::AuthUser;
use crate::error::ApiError;
use crate::hub::pump;
use crate::routes::rooms::parse_room_id;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws/rooms/{room_id}", get(ws_upgrade))
}

async fn ws_upgrade(
    State(state): State<AppState>,
    user: AuthUser,
    Path(room_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let room_id = parse_room_id(&room_id)?;

    // Held for the life of the socket.
    let permit = match &state.connection_slots {
        Some(slots) => Some(slots.clone().try_acquire_owned().map_err(|_| {
            tracing::warn!(user_id = user.user_id, room_id, "connection limit reached");
            ApiError::service_unavailable("Connection limit reached")
        })?),
        None => None,
    };

    tracing::debug!(user_id = user.user_id, username = %user.username, room_id, "websocket upgrade");

    let hub = state.hub.clone();
    let config = state.config.hub.clone();
    Ok(ws
        .max_message_size(config.max_message_size)
        .on_upgrade(move |socket| async move {
            pump::serve(hub, socket, user.user_id, room_id, config).await;
            drop(permit);
        }))
}
