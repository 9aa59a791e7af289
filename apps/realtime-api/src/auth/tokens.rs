//! Access token verification. Tokens are issued elsewhere with a shared
//! HS256 secret; this service only checks them.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::hub::UserId;

/// Only access tokens may open connections or query rooms.
pub const ACCESS_TOKEN_TYPE: &str = "access";

/// Claims carried by access and refresh tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: UserId,
    pub username: String,
    #[serde(default)]
    pub email: String,
    pub token_type: String,
    pub exp: i64,
}

/// Verify signature, expiry and token type, returning the claims.
pub fn verify_access_token(token: &str, secret: &str) -> Result<Claims, ApiError> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);

    let claims = jsonwebtoken::decode::<Claims>(token, &key, &validation)
        .map_err(|e| {
            tracing::debug!(?e, "access token validation failed");
            ApiError::unauthorized("Invalid or expired token")
        })?
        .claims;

    if claims.token_type != ACCESS_TOKEN_TYPE {
        return Err(ApiError::unauthorized("Not an access token"));
    }
    Ok(claims)
}
