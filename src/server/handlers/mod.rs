pub mod analysis;
pub mod auth;
pub mod files;
pub mod market_data;

use axum::Json;
use serde_json::json;

pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
