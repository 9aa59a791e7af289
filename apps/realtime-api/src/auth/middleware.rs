//! Access token extraction for HTTP routes and WebSocket upgrades.

use axum::extract::{FromRequestParts, Query};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::auth::tokens;
use crate::hub::UserId;
use crate::AppState;

/// Authenticated user, from `Authorization: Bearer <jwt>` or, for browser
/// WebSocket clients that cannot set headers, a `?token=<jwt>` parameter.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
    pub username: String,
}

/// Rejection returned when the token is missing or invalid.
#[derive(Debug)]
pub struct AuthError {
    message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": "UNAUTHORIZED",
                "message": self.message
            }
        });
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn bearer_token(parts: &Parts) -> Result<Option<String>, AuthError> {
    let Some(header) = parts.headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let token = header
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AuthError {
            message: "Invalid Authorization header format".into(),
        })?;
    Ok(Some(token.to_string()))
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = match bearer_token(parts)? {
            Some(token) => token,
            None => Query::<TokenQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(q)| q.token)
                .filter(|t| !t.is_empty())
                .ok_or(AuthError {
                    message: "Missing access token".into(),
                })?,
        };

        let claims = tokens::verify_access_token(&token, &state.config.jwt_secret)
            .map_err(|err| AuthError {
                message: err.message,
            })?;

        Ok(AuthUser {
            user_id: claims.user_id,
            username: claims.username,
        })
    }
}
