use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::server::handlers;
use crate::server::services::{
    analyst::AnalystService,
    cache::DataCache,
    catalog::Catalog,
    files::FileStore,
    llm::LlmService,
    token::TokenService,
    tools::ToolRegistry,
    upstream::{RetryPolicy, UpstreamClient},
    user_store::UserStore,
};

const MIB: usize = 1024 * 1024;

/// Process configuration, collected from the environment once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub token_secret: String,
    pub token_ttl_minutes: i64,
    pub users_file: PathBuf,
    pub catalog_file: PathBuf,
    pub cache_root: PathBuf,
    pub files_root: PathBuf,
    pub upstream_url: String,
    pub upstream_timeout_secs: u64,
    pub upstream_retries: u32,
    pub upstream_backoff_ms: u64,
    pub cache_ceiling_bytes: u64,
    pub serve_stale_on_error: bool,
    pub max_result_bytes: usize,
    pub max_upload_bytes: usize,
    pub llm_api_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
    pub max_tool_turns: u32,
    pub analysis_deadline_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<AppConfig> {
        Ok(AppConfig {
            port: parsed_var("PORT", 8000)?,
            token_secret: env::var("QUANTGATE_TOKEN_SECRET")
                .context("QUANTGATE_TOKEN_SECRET must be set")?,
            token_ttl_minutes: parsed_var("QUANTGATE_TOKEN_TTL_MINUTES", 30)?,
            users_file: path_var("QUANTGATE_USERS_FILE", "users.json"),
            catalog_file: path_var("QUANTGATE_CATALOG_FILE", "catalog.json"),
            cache_root: path_var("QUANTGATE_CACHE_ROOT", "data/cache"),
            files_root: path_var("QUANTGATE_FILES_ROOT", "data/files"),
            upstream_url: env::var("QUANTGATE_UPSTREAM_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string()),
            upstream_timeout_secs: parsed_var("QUANTGATE_UPSTREAM_TIMEOUT_SECS", 30)?,
            upstream_retries: parsed_var("QUANTGATE_UPSTREAM_RETRIES", 3)?,
            upstream_backoff_ms: parsed_var("QUANTGATE_UPSTREAM_BACKOFF_MS", 250)?,
            cache_ceiling_bytes: parsed_var("QUANTGATE_CACHE_CEILING_BYTES", 1024 * MIB as u64)?,
            serve_stale_on_error: parsed_var("QUANTGATE_SERVE_STALE_ON_ERROR", true)?,
            max_result_bytes: parsed_var("QUANTGATE_MAX_RESULT_BYTES", 10 * MIB)?,
            max_upload_bytes: parsed_var("QUANTGATE_MAX_UPLOAD_BYTES", 10 * MIB)?,
            llm_api_url: env::var("LLM_API_URL")
                .unwrap_or_else(|_| "https://api.deepseek.com/v1".to_string()),
            llm_api_key: env::var("LLM_API_KEY").unwrap_or_default(),
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| "deepseek-chat".to_string()),
            max_tool_turns: parsed_var("QUANTGATE_MAX_TOOL_TURNS", 6)?,
            analysis_deadline_secs: parsed_var("QUANTGATE_ANALYSIS_DEADLINE_SECS", 60)?,
        })
    }
}

fn parsed_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{name} is not valid: {e}")),
        Err(_) => Ok(default),
    }
}

fn path_var(name: &str, default: &str) -> PathBuf {
    env::var(name).map_or_else(|_| PathBuf::from(default), PathBuf::from)
}

/// The service container handed to every handler. Built once at startup;
/// everything inside is read-only or internally synchronized.
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserStore>,
    pub tokens: Arc<TokenService>,
    pub catalog: Arc<Catalog>,
    pub cache: Arc<DataCache>,
    pub files: Arc<FileStore>,
    pub llm: Arc<LlmService>,
    pub analyst: Arc<AnalystService>,
}

impl AppState {
    pub fn build(config: &AppConfig) -> anyhow::Result<AppState> {
        let users = Arc::new(UserStore::load(&config.users_file)?);
        let tokens = Arc::new(TokenService::new(
            &config.token_secret,
            chrono::Duration::minutes(config.token_ttl_minutes),
        ));
        let catalog = Arc::new(Catalog::load(&config.catalog_file)?);

        let upstream = Arc::new(UpstreamClient::new(
            config.upstream_url.clone(),
            Arc::clone(&catalog),
            Duration::from_secs(config.upstream_timeout_secs),
            RetryPolicy {
                attempts: config.upstream_retries,
                base_delay: Duration::from_millis(config.upstream_backoff_ms),
            },
            config.max_result_bytes,
        )?);
        let cache = Arc::new(DataCache::new(
            config.cache_root.clone(),
            upstream,
            config.cache_ceiling_bytes,
            config.serve_stale_on_error,
        )?);
        let files = Arc::new(FileStore::new(
            config.files_root.clone(),
            config.max_upload_bytes,
        )?);

        let llm = Arc::new(LlmService::new(
            config.llm_api_url.clone(),
            config.llm_api_key.clone(),
            config.llm_model.clone(),
            Duration::from_secs(config.analysis_deadline_secs),
        )?);
        let tools = Arc::new(ToolRegistry::new(
            Arc::clone(&catalog),
            Arc::clone(&cache),
            Arc::clone(&files),
        ));
        let analyst = Arc::new(AnalystService::new(
            Arc::clone(&llm),
            tools,
            config.max_tool_turns,
            Duration::from_secs(config.analysis_deadline_secs),
        ));

        Ok(AppState {
            users,
            tokens,
            catalog,
            cache,
            files,
            llm,
            analyst,
        })
    }
}

/// Assembles the HTTP surface. Only `/health` and `/api/token` are public;
/// every other route authenticates through the bearer extractor.
pub fn configure_app(state: AppState) -> Router {
    // Leave multipart framing headroom above the per-file cap; the file
    // store enforces the exact limit.
    let body_limit = state.files.max_bytes() + 2 * MIB;

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/token", post(handlers::auth::issue_token))
        .route("/api/users/me", get(handlers::auth::current_user))
        .route(
            "/api/mcp-data/interfaces",
            get(handlers::market_data::list_interfaces),
        )
        .route("/api/mcp-data", post(handlers::market_data::fetch_market_data))
        .route("/api/data/upload", post(handlers::files::upload))
        .route("/api/data/files", get(handlers::files::list))
        .route("/api/data/files/:filename", delete(handlers::files::delete))
        .route("/api/data/explore/:filename", post(handlers::files::explore))
        .route("/api/llm/chat", post(handlers::analysis::chat))
        .route("/api/llm/analyze", post(handlers::analysis::analyze))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
