use axum_test::TestServer;
use quantgate::server::models::User;
use quantgate::services::user_store::hash_password;
use quantgate::{configure_app, AppConfig, AppState};
use serde_json::json;
use tempfile::TempDir;
use wiremock::MockServer;

/// One fully wired gateway instance over mocked collaborators: a wiremock
/// upstream data service, a wiremock chat-completions endpoint, and
/// temp-dir storage. Provisioned users: alice/wonderland, bob/builder.
pub struct TestContext {
    pub server: TestServer,
    pub upstream: MockServer,
    pub llm: MockServer,
    pub config: AppConfig,
    _root: TempDir,
}

pub async fn spawn_app() -> TestContext {
    spawn_app_with(|_| {}).await
}

pub async fn spawn_app_with(tweak: impl FnOnce(&mut AppConfig)) -> TestContext {
    let root = TempDir::new().expect("temp dir");
    let upstream = MockServer::start().await;
    let llm = MockServer::start().await;

    let users = vec![
        User {
            username: "alice".to_string(),
            password_hash: hash_password("wonderland").expect("hash"),
        },
        User {
            username: "bob".to_string(),
            password_hash: hash_password("builder").expect("hash"),
        },
    ];
    let users_file = root.path().join("users.json");
    std::fs::write(&users_file, serde_json::to_vec(&users).expect("users json")).expect("write");

    let catalog_file = root.path().join("catalog.json");
    std::fs::write(
        &catalog_file,
        serde_json::to_vec(&json!({
            "categories": [
                {
                    "name": "股票行情",
                    "description": "A股行情",
                    "interfaces": [
                        {
                            "name": "stock_zh_a_hist",
                            "description": "A股个股历史行情",
                            "example_params": {
                                "symbol": "600519",
                                "period": "daily",
                                "start_date": "20230101",
                                "end_date": "20231231"
                            }
                        },
                        {
                            "name": "stock_zh_a_spot_em",
                            "description": "A股实时行情快照",
                            "example_params": {}
                        }
                    ]
                }
            ]
        }))
        .expect("catalog json"),
    )
    .expect("write");

    let mut config = AppConfig {
        port: 0,
        token_secret: "integration-test-secret-0123456789abcdef".to_string(),
        token_ttl_minutes: 30,
        users_file,
        catalog_file,
        cache_root: root.path().join("cache"),
        files_root: root.path().join("files"),
        upstream_url: upstream.uri(),
        upstream_timeout_secs: 5,
        upstream_retries: 3,
        upstream_backoff_ms: 5,
        cache_ceiling_bytes: 1024 * 1024 * 1024,
        serve_stale_on_error: true,
        max_result_bytes: 10 * 1024 * 1024,
        max_upload_bytes: 10 * 1024 * 1024,
        llm_api_url: llm.uri(),
        llm_api_key: "test-key".to_string(),
        llm_model: "test-model".to_string(),
        max_tool_turns: 6,
        analysis_deadline_secs: 10,
    };
    tweak(&mut config);

    let server = build_server(&config);
    TestContext {
        server,
        upstream,
        llm,
        config,
        _root: root,
    }
}

fn build_server(config: &AppConfig) -> TestServer {
    let state = AppState::build(config).expect("app state");
    TestServer::new(configure_app(state)).expect("test server")
}

impl TestContext {
    /// Simulates a process restart: rebuilds every service from the same
    /// configuration, keeping the on-disk state.
    pub fn restart(&mut self) {
        self.server = build_server(&self.config);
    }

    pub async fn login(&self, username: &str, password: &str) -> String {
        let response = self
            .server
            .post("/api/token")
            .form(&json!({ "username": username, "password": password }))
            .await;
        response.assert_status_ok();
        response.json::<serde_json::Value>()["access_token"]
            .as_str()
            .expect("access_token")
            .to_string()
    }
}
