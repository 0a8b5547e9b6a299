use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use tracing::info;

use super::market_data::PageQuery;
use crate::server::config::AppState;
use crate::server::error::ApiError;
use crate::server::middleware::AuthUser;
use crate::server::models::TablePage;

const DEFAULT_PAGE_SIZE: usize = 100;

/// POST /api/data/upload — streams the multipart `file` field into the
/// caller's directory. The file only becomes visible once fully written.
pub async fn upload(
    State(state): State<AppState>,
    AuthUser(username): AuthUser,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidParameters(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ApiError::InvalidParameters("missing filename".to_string()))?;

        let mut sink = state.files.create_upload(&username, &filename).await?;
        loop {
            let chunk = field.chunk().await.map_err(|e| {
                if e.to_string().contains("length limit") {
                    ApiError::TooLarge
                } else {
                    ApiError::InvalidParameters(e.to_string())
                }
            })?;
            match chunk {
                Some(bytes) => sink.write_chunk(&bytes).await?,
                None => break,
            }
        }
        sink.finish().await?;

        info!(user = %username, filename = %filename, "stored upload");
        return Ok(Json(json!({ "filename": filename })));
    }

    Err(ApiError::InvalidParameters(
        "multipart body has no file field".to_string(),
    ))
}

/// GET /api/data/files — the caller's uploads, sorted.
pub async fn list(
    State(state): State<AppState>,
    AuthUser(username): AuthUser,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.files.list(&username).await?))
}

/// DELETE /api/data/files/{filename}
pub async fn delete(
    State(state): State<AppState>,
    AuthUser(username): AuthUser,
    Path(filename): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.files.delete(&username, &filename).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/data/explore/{filename} — one page of the parsed table.
pub async fn explore(
    State(state): State<AppState>,
    AuthUser(username): AuthUser,
    Path(filename): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<TablePage>, ApiError> {
    let page = state
        .files
        .browse(
            &username,
            &filename,
            query.page.unwrap_or(1),
            query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await?;
    Ok(Json(page))
}
