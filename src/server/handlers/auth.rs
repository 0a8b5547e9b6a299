use axum::{extract::State, Form, Json};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::server::config::AppState;
use crate::server::error::ApiError;
use crate::server::middleware::AuthUser;

#[derive(Debug, Deserialize)]
pub struct TokenForm {
    pub username: String,
    pub password: String,
}

/// POST /api/token — verifies credentials and issues a bearer token.
/// Unknown users and wrong passwords share one error surface.
pub async fn issue_token(
    State(state): State<AppState>,
    Form(form): Form<TokenForm>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.users.verify(&form.username, &form.password).await {
        return Err(ApiError::Unauthorized(
            "incorrect username or password".to_string(),
        ));
    }

    let token = state
        .tokens
        .issue(&form.username)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    info!(username = %form.username, "issued access token");
    Ok(Json(json!({
        "access_token": token,
        "token_type": "bearer",
    })))
}

/// GET /api/users/me — echoes the resolved subject.
pub async fn current_user(AuthUser(username): AuthUser) -> Json<serde_json::Value> {
    Json(json!({ "username": username }))
}
