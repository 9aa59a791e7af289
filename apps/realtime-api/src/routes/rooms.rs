use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, ApiErrorBody};
use crate::hub::{HubStats, UserId};
use crate::{AppState, RoomId};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rooms/{room_id}/online", get(online_users))
        .route("/ws/stats", get(stats))
}

/// Parse a numeric room id from a path segment.
pub(crate) fn parse_room_id(raw: &str) -> Result<RoomId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid room id `{raw}`")))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OnlineUsersResponse {
    pub room_id: RoomId,
    pub online_users: Vec<UserId>,
    pub count: usize,
}

#[utoipa::path(
    get,
    path = "/api/v1/rooms/{room_id}/online",
    tag = "Rooms",
    security(("bearer" = [])),
    params(("room_id" = u64, Path, description = "Room id")),
    responses(
        (status = 200, description = "Users connected to the room", body = OnlineUsersResponse),
        (status = 400, description = "Invalid room id", body = ApiErrorBody),
        (status = 401, description = "Missing or invalid token", body = ApiErrorBody),
    )
)]
pub async fn online_users(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(room_id): Path<String>,
) -> Result<Json<OnlineUsersResponse>, ApiError> {
    let room_id = parse_room_id(&room_id)?;
    let online_users = state.hub.online_users(&room_id).await;

    Ok(Json(OnlineUsersResponse {
        room_id,
        count: online_users.len(),
        online_users,
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/ws/stats",
    tag = "Rooms",
    responses((status = 200, description = "Live room and connection counts", body = HubStats))
)]
pub async fn stats(State(state): State<AppState>) -> Json<HubStats> {
    Json(state.hub.stats().await)
}
