mod common;

use axum::http::StatusCode;
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{spawn_app, spawn_app_with};

fn history_records() -> Value {
    json!([
        {"日期": "2024-06-03", "收盘": 10.00, "成交量": 1000},
        {"日期": "2024-06-04", "收盘": 10.20, "成交量": 1100},
        {"日期": "2024-06-05", "收盘": 10.50, "成交量": 900}
    ])
}

async fn mount_history(upstream: &MockServer, symbol: &str, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/api/public/stock_zh_a_hist"))
        .and(query_param("symbol", symbol))
        .respond_with(ResponseTemplate::new(200).set_body_json(history_records()))
        .expect(expected_calls)
        .mount(upstream)
        .await;
}

#[tokio::test]
async fn chat_passes_the_prompt_through() {
    let ctx = spawn_app().await;
    let token = ctx.login("alice", "wonderland").await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {"content": "市场整体震荡。", "role": "assistant"},
                "finish_reason": "stop"
            }]
        })))
        .mount(&ctx.llm)
        .await;

    let response = ctx
        .server
        .post("/api/llm/chat")
        .authorization_bearer(&token)
        .json(&json!({ "prompt": "大盘怎么样" }))
        .await;
    response.assert_status_ok();
    response.assert_json(&json!({ "response": "市场整体震荡。" }));
}

#[tokio::test]
async fn chat_maps_model_failures_to_bad_gateway() {
    let ctx = spawn_app().await;
    let token = ctx.login("alice", "wonderland").await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&ctx.llm)
        .await;

    let response = ctx
        .server
        .post("/api/llm/chat")
        .authorization_bearer(&token)
        .json(&json!({ "prompt": "大盘怎么样" }))
        .await;
    response.assert_status(StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn analyze_runs_the_tool_loop_to_a_structured_envelope() {
    let ctx = spawn_app().await;
    let token = ctx.login("alice", "wonderland").await;
    mount_history(&ctx.upstream, "600519", 1).await;

    // Turn 1: the model asks for data.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "content": "",
                    "role": "assistant",
                    "tool_calls": [{
                        "id": "call_001",
                        "type": "function",
                        "function": {
                            "name": "fetch_market_data",
                            "arguments": "{\"interface\":\"stock_zh_a_hist\",\"params\":{\"symbol\":\"600519\",\"period\":\"daily\",\"start_date\":\"20240601\",\"end_date\":\"20240605\"}}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&ctx.llm)
        .await;

    // Turn 2: after seeing the tool result, the model answers.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("\"role\":\"tool\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "content": "分析完成。\n```json\n{\"summary\": \"贵州茅台近三日温和上行\", \"insights\": [\"收盘价累计上涨 5%\"], \"recommendations\": [\"关注回调风险\"], \"risk_level\": \"中等风险\", \"confidence\": 0.82}\n```",
                    "role": "assistant"
                },
                "finish_reason": "stop"
            }]
        })))
        .expect(1)
        .mount(&ctx.llm)
        .await;

    let response = ctx
        .server
        .post("/api/llm/analyze")
        .authorization_bearer(&token)
        .json(&json!({ "query": "分析600519最近表现" }))
        .await;
    response.assert_status_ok();

    let envelope: Value = response.json();
    assert_eq!(envelope["summary"], "贵州茅台近三日温和上行");
    assert_eq!(envelope["insights"], json!(["收盘价累计上涨 5%"]));
    assert_eq!(envelope["risk_level"], "中等风险");
    assert_eq!(envelope["confidence"], 0.82);
    assert!(envelope["raw"].as_str().unwrap().contains("分析完成"));
}

#[tokio::test]
async fn unreachable_model_degrades_to_the_rule_based_analyzer() {
    let ctx = spawn_app_with(|config| {
        // Nothing listens on the discard port.
        config.llm_api_url = "http://127.0.0.1:9".to_string();
    })
    .await;
    let token = ctx.login("alice", "wonderland").await;
    mount_history(&ctx.upstream, "000001", 1).await;

    let response = ctx
        .server
        .post("/api/llm/analyze")
        .authorization_bearer(&token)
        .json(&json!({ "query": "分析000001最近表现" }))
        .await;
    response.assert_status_ok();

    let envelope: Value = response.json();
    assert!(!envelope["summary"].as_str().unwrap().is_empty());
    assert!(envelope["confidence"].is_null());
    assert!(envelope["summary"].as_str().unwrap().contains("000001"));
}

#[tokio::test]
async fn analyze_returns_bad_gateway_when_the_fallback_also_fails() {
    let ctx = spawn_app_with(|config| {
        // Nothing listens on the discard port.
        config.llm_api_url = "http://127.0.0.1:9".to_string();
    })
    .await;
    let token = ctx.login("alice", "wonderland").await;

    // The degraded path recognizes the code but cannot fetch its data.
    Mock::given(method("GET"))
        .and(path("/api/public/stock_zh_a_hist"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&ctx.upstream)
        .await;

    let response = ctx
        .server
        .post("/api/llm/analyze")
        .authorization_bearer(&token)
        .json(&json!({ "query": "分析000001最近表现" }))
        .await;
    response.assert_status(StatusCode::BAD_GATEWAY);
    let body: Value = response.json();
    assert_eq!(body["detail"], "analysis model is unreachable");
}

#[tokio::test]
async fn use_llm_false_skips_the_model_entirely() {
    let ctx = spawn_app().await;
    let token = ctx.login("alice", "wonderland").await;
    mount_history(&ctx.upstream, "600519", 1).await;
    // No /chat/completions mock: a model call would 404 and fail the test
    // through the envelope below.

    let response = ctx
        .server
        .post("/api/llm/analyze")
        .add_query_param("use_llm", false)
        .authorization_bearer(&token)
        .json(&json!({ "query": "分析600519走势" }))
        .await;
    response.assert_status_ok();

    let envelope: Value = response.json();
    assert!(envelope["summary"].as_str().unwrap().contains("600519"));
    assert!(envelope["confidence"].is_null());
    assert!(envelope["insights"].as_array().unwrap().len() >= 2);
    assert_eq!(envelope["risk_level"], "中等风险");
}

#[tokio::test]
async fn analyze_without_a_stock_code_makes_no_upstream_call() {
    let ctx = spawn_app().await;
    let token = ctx.login("alice", "wonderland").await;
    // No upstream mock: any call would surface in the envelope as missing
    // data rather than the no-symbol template below.

    let response = ctx
        .server
        .post("/api/llm/analyze")
        .add_query_param("use_llm", false)
        .authorization_bearer(&token)
        .json(&json!({ "query": "今天大盘怎么样" }))
        .await;
    response.assert_status_ok();

    let envelope: Value = response.json();
    assert!(envelope["summary"].as_str().unwrap().contains("股票代码"));
    assert!(envelope["confidence"].is_null());
}

#[tokio::test]
async fn adversarial_model_is_bounded_by_the_turn_budget() {
    let ctx = spawn_app_with(|config| config.max_tool_turns = 2).await;
    let token = ctx.login("alice", "wonderland").await;
    mount_history(&ctx.upstream, "600519", 1).await;

    // The model demands tools on every turn and never answers.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "content": "",
                    "role": "assistant",
                    "tool_calls": [{
                        "id": "call_loop",
                        "type": "function",
                        "function": {
                            "name": "fetch_market_data",
                            "arguments": "{\"interface\":\"stock_zh_a_hist\",\"params\":{\"symbol\":\"600519\",\"period\":\"daily\",\"start_date\":\"20240601\",\"end_date\":\"20240605\"}}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        })))
        .expect(2)
        .mount(&ctx.llm)
        .await;

    let response = ctx
        .server
        .post("/api/llm/analyze")
        .authorization_bearer(&token)
        .json(&json!({ "query": "反复查询" }))
        .await;
    response.assert_status_ok();

    // Degraded envelope: the prompt has no stock code, so the fallback
    // explains itself without further upstream traffic.
    let envelope: Value = response.json();
    assert!(envelope["confidence"].is_null());
    assert!(!envelope["summary"].as_str().unwrap().is_empty());
}
