use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::server::config::AppState;
use crate::server::error::ApiError;
use crate::server::middleware::AuthUser;
use crate::server::models::TablePage;

const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct FetchRequest {
    pub interface: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    pub request_id: Option<String>,
}

/// GET /api/mcp-data/interfaces — the flattened upstream catalog.
pub async fn list_interfaces(
    State(state): State<AppState>,
    AuthUser(_username): AuthUser,
) -> Json<Vec<Value>> {
    let interfaces = state
        .catalog
        .list()
        .into_iter()
        .map(|i| {
            json!({
                "name": i.name,
                "description": i.description,
                "example_params": i.example_params,
            })
        })
        .collect();
    Json(interfaces)
}

/// POST /api/mcp-data — fetches one upstream dataset through the cache and
/// returns the requested page.
pub async fn fetch_market_data(
    State(state): State<AppState>,
    AuthUser(username): AuthUser,
    Query(query): Query<PageQuery>,
    Json(request): Json<FetchRequest>,
) -> Result<Json<TablePage>, ApiError> {
    if !state.catalog.has(&request.interface) {
        return Err(ApiError::UnknownInterface(request.interface));
    }

    info!(
        user = %username,
        interface = %request.interface,
        request_id = request.request_id.as_deref().unwrap_or("-"),
        "market data request"
    );

    let table = state
        .cache
        .get_or_compute(&request.interface, &request.params)
        .await?;
    let page = table.paginate(
        query.page.unwrap_or(1),
        query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
    );
    Ok(Json(page))
}
