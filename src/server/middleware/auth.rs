use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::server::config::AppState;
use crate::server::error::ApiError;

/// The authenticated subject of a request, resolved from the bearer token.
///
/// Handlers take `AuthUser` as an argument to require authentication; the
/// wrapped username is the only identity the rest of the pipeline sees.
/// Rejections stay coarse so callers cannot probe token internals.
pub struct AuthUser(pub String);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

        let username = state.tokens.validate(token)?;
        Ok(AuthUser(username))
    }
}
