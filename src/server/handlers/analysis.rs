use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::server::config::AppState;
use crate::server::error::ApiError;
use crate::server::middleware::AuthUser;
use crate::server::models::AnalysisEnvelope;

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeBody {
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeQuery {
    pub use_llm: Option<bool>,
}

/// POST /api/llm/chat — plain prompt pass-through, no tools.
pub async fn chat(
    State(state): State<AppState>,
    AuthUser(username): AuthUser,
    Json(body): Json<ChatBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    info!(user = %username, "chat request");
    let response = state.llm.chat(body.prompt).await?;
    Ok(Json(json!({ "response": response })))
}

/// POST /api/llm/analyze — drives the model↔tool loop (or the rule-based
/// analyzer when `use_llm=false`) and returns the analysis envelope.
pub async fn analyze(
    State(state): State<AppState>,
    AuthUser(username): AuthUser,
    Query(query): Query<AnalyzeQuery>,
    Json(body): Json<AnalyzeBody>,
) -> Result<Json<AnalysisEnvelope>, ApiError> {
    let use_llm = query.use_llm.unwrap_or(true);
    info!(user = %username, use_llm, "analysis request");
    let envelope = state
        .analyst
        .analyze(&body.query, &username, use_llm)
        .await?;
    Ok(Json(envelope))
}
