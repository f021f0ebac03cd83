use std::sync::Arc;
use std::time::Duration;

use axum::extract::Path;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use propwise_agent::providers::{GeminiProvider, MistralProvider, ScriptedProvider};
use propwise_agent::roles::AgentRole;
use propwise_agent::tools::StaticPropertySource;
use propwise_agent::{
    EvaluatorSettings, GuardrailEvaluator, ModelProvider, ModelRequest, PipelineRuntime,
    RuntimeSettings,
};
use propwise_core::sink::InMemoryReportSink;
use propwise_core::{ProviderErrorKind, RunState};
use serde_json::{json, Value};

async fn chat_completions(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == "Bearer test-key");
    if !authorized {
        return (StatusCode::UNAUTHORIZED, "invalid api key").into_response();
    }

    match body["model"].as_str().unwrap_or_default() {
        "limited" => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, "3")],
            Json(json!({"message": "Requests rate limit exceeded"})),
        )
            .into_response(),
        "flaky" => (StatusCode::INTERNAL_SERVER_ERROR, "upstream hiccup").into_response(),
        "no-choices" => Json(json!({"choices": []})).into_response(),
        "blank" => Json(json!({"choices": [{"message": {"role": "assistant", "content": ""}}]}))
            .into_response(),
        _ => Json(json!({
            "choices": [{"message": {"role": "assistant", "content": "Lyon apartments hold value."}}],
            "usage": {"prompt_tokens": 42, "completion_tokens": 7}
        }))
        .into_response(),
    }
}

async fn generate_content(Path(rest): Path<String>, headers: HeaderMap) -> Response {
    if headers.get("x-goog-api-key").and_then(|value| value.to_str().ok()) != Some("test-key") {
        return (StatusCode::FORBIDDEN, "API key not valid").into_response();
    }
    if rest != "gemini-test:generateContent" {
        return (StatusCode::NOT_FOUND, "unknown model").into_response();
    }

    Json(json!({
        "candidates": [{"content": {"parts": [{"text": "Nice villas "}, {"text": "are scarce."}]}}],
        "usageMetadata": {"promptTokenCount": 30, "candidatesTokenCount": 5}
    }))
    .into_response()
}

async fn stub_server() -> String {
    let router = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1beta/models/{*rest}", post(generate_content));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind stub server");
    let address = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("stub server");
    });
    format!("http://{address}")
}

fn client() -> reqwest::Client {
    reqwest::Client::builder().timeout(Duration::from_secs(5)).build().expect("client")
}

fn mistral(base_url: &str, model: &str, key: &str) -> MistralProvider {
    MistralProvider::new(client(), base_url.to_string(), model.to_string(), key.to_string().into())
}

fn request() -> ModelRequest {
    ModelRequest::for_role(AgentRole::Team, "Summarise the Lyon market")
}

#[tokio::test]
async fn mistral_success_reports_usage() {
    let base_url = stub_server().await;

    let response =
        mistral(&base_url, "ok", "test-key").invoke(&request()).await.expect("mistral answers");

    assert_eq!(response.text, "Lyon apartments hold value.");
    assert_eq!(response.provider.as_str(), "mistral:ok");
    assert_eq!(response.usage.input_tokens, 42);
    assert_eq!(response.usage.output_tokens, 7);
}

#[tokio::test]
async fn status_codes_are_classified_at_the_adapter() {
    let base_url = stub_server().await;

    let limited =
        mistral(&base_url, "limited", "test-key").invoke(&request()).await.expect_err("429");
    assert_eq!(limited.kind, ProviderErrorKind::RateLimited);
    assert_eq!(limited.status_code, Some(429));
    assert_eq!(limited.retry_after, Some(Duration::from_secs(3)));

    let flaky = mistral(&base_url, "flaky", "test-key").invoke(&request()).await.expect_err("500");
    assert_eq!(flaky.kind, ProviderErrorKind::Transient);

    let denied = mistral(&base_url, "ok", "wrong-key").invoke(&request()).await.expect_err("401");
    assert_eq!(denied.kind, ProviderErrorKind::Fatal);
    assert_eq!(denied.status_code, Some(401));
}

#[tokio::test]
async fn empty_replies_are_returned_not_classified() {
    let base_url = stub_server().await;

    for model in ["no-choices", "blank"] {
        let response = mistral(&base_url, model, "test-key")
            .invoke(&request())
            .await
            .expect("well-formed reply is not an error");
        assert_eq!(response.text, "", "model {model}");
    }
}

#[tokio::test]
async fn blank_team_report_degrades_instead_of_aborting() {
    let base_url = stub_server().await;
    let primary = Arc::new(mistral(&base_url, "blank", "test-key"));
    let secondary = Arc::new(mistral(&base_url, "ok", "test-key"));
    let guard = Arc::new(ScriptedProvider::new("guard").with_fallback_reply("PASS"));
    let sink = InMemoryReportSink::default();
    let runtime = PipelineRuntime::new(
        primary,
        secondary,
        GuardrailEvaluator::new(guard, EvaluatorSettings::default()),
        Arc::new(StaticPropertySource::sample()),
        Arc::new(sink.clone()),
        RuntimeSettings::default(),
    );

    let run = runtime.run("Collect property data and produce a report").await.expect("run");

    assert_eq!(run.state(), RunState::Done);
    assert!(run.failure().is_none());
    assert!(run.artifact().is_none());
    assert_eq!(run.report(), Some(""));
    assert!(sink.runs().is_empty());
    assert_eq!(sink.outcomes().len(), 1);
}

#[tokio::test]
async fn unreachable_endpoint_is_transient() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("local addr");
    drop(listener);

    let error = mistral(&format!("http://{address}"), "ok", "test-key")
        .invoke(&request())
        .await
        .expect_err("connection refused");

    assert_eq!(error.kind, ProviderErrorKind::Transient);
}

#[tokio::test]
async fn gemini_joins_candidate_parts() {
    let base_url = stub_server().await;
    let provider = GeminiProvider::new(
        client(),
        base_url.clone(),
        "gemini-test".to_string(),
        "test-key".to_string().into(),
    );

    let response = provider.invoke(&request()).await.expect("gemini answers");

    assert_eq!(response.text, "Nice villas are scarce.");
    assert_eq!(response.provider.as_str(), "gemini:gemini-test");
    assert_eq!(response.usage.input_tokens, 30);

    let denied = GeminiProvider::new(
        client(),
        base_url,
        "gemini-test".to_string(),
        "wrong-key".to_string().into(),
    )
    .invoke(&request())
    .await
    .expect_err("403");
    assert_eq!(denied.kind, ProviderErrorKind::Fatal);
}
