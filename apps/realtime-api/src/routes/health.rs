use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub time: DateTime<Utc>,
    pub active_rooms: usize,
    pub active_connections: usize,
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.hub.stats().await;
    Json(HealthResponse {
        status: "ok".to_string(),
        time: Utc::now(),
        active_rooms: stats.active_rooms,
        active_connections: stats.active_connections,
    })
}
