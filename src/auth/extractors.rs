use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tracing::warn;

use super::{jwt::TokenKind, repo_types::User, services::find_user};
use crate::{error::ApiError, state::AppState};

/// Bearer access token resolved to a live user record.
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // Read Authorization header
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(ApiError::Unauthorized("Missing Authorization header"))?;

        // Expect "Bearer <token>"
        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or(ApiError::Unauthorized("Invalid auth scheme"))?;

        let email = state
            .jwt
            .verify_kind(token, TokenKind::Access)
            .map_err(|e| {
                warn!(error = %e, "rejected bearer token");
                ApiError::Unauthorized("Invalid access token")
            })?;

        match find_user(state, &email).await? {
            Some(user) if user.is_active => Ok(AuthUser(user)),
            _ => Err(ApiError::Unauthorized("Invalid access token")),
        }
    }
}
