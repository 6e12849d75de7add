//! Wire-level fixtures for every adapter.
//!
//! Each test starts a local axum server that records what it received and
//! answers with a scripted status, headers and body, then drives the real
//! adapter pipeline (translate, send, parse) against it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use astrochat_core::error::ErrorKind;
use astrochat_core::message::ConversationTurn;
use astrochat_core::provider::{CanonicalRequest, ProviderAdapter, ProviderKind, ProviderSettings};
use astrochat_providers::{AnthropicAdapter, HuggingFaceAdapter, OpenAiCompatAdapter};
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

// ── Fixture server ───────────────────────────────────────────────────────

struct Seen {
    path: String,
    headers: HeaderMap,
    body: Value,
}

#[derive(Clone)]
struct Fixture {
    status: u16,
    body: String,
    retry_after: Option<u64>,
    delay: Duration,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl Fixture {
    fn new(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            retry_after: None,
            delay: Duration::ZERO,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn last(&self) -> Seen {
        self.seen.lock().unwrap().pop().expect("no request recorded")
    }
}

async fn respond(
    State(fixture): State<Fixture>,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    fixture.seen.lock().unwrap().push(Seen {
        path: uri.path().to_string(),
        headers,
        body: serde_json::from_str(&body).unwrap_or(Value::Null),
    });

    if !fixture.delay.is_zero() {
        tokio::time::sleep(fixture.delay).await;
    }

    let status = StatusCode::from_u16(fixture.status).unwrap();
    let mut response = (status, fixture.body.clone()).into_response();
    if let Some(secs) = fixture.retry_after {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}

async fn serve(fixture: Fixture) -> String {
    let app = Router::new().fallback(respond).with_state(fixture);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

// ── Adapters pointed at the fixture ──────────────────────────────────────

fn settings(provider: ProviderKind, endpoint: String, model: &str) -> ProviderSettings {
    ProviderSettings {
        provider,
        api_key: "test-key".into(),
        model: model.into(),
        endpoint,
        default_max_tokens: 128,
    }
}

fn openai(base: &str) -> OpenAiCompatAdapter {
    OpenAiCompatAdapter::new(settings(
        ProviderKind::OpenAi,
        format!("{base}/v1"),
        "gpt-4o-mini",
    ))
}

fn anthropic(base: &str) -> AnthropicAdapter {
    AnthropicAdapter::new(settings(
        ProviderKind::Anthropic,
        base.to_string(),
        "claude-3-5-haiku-latest",
    ))
}

fn huggingface(base: &str) -> HuggingFaceAdapter {
    HuggingFaceAdapter::new(settings(
        ProviderKind::HuggingFace,
        format!("{base}/models"),
        "test-org/test-model",
    ))
}

fn all_adapters(base: &str) -> Vec<Box<dyn ProviderAdapter>> {
    vec![
        Box::new(openai(base)),
        Box::new(anthropic(base)),
        Box::new(huggingface(base)),
    ]
}

fn request() -> CanonicalRequest {
    CanonicalRequest::new("How will the full moon affect me?")
        .with_system_prompt("You are a careful astrologer.")
        .with_tail(vec![
            ConversationTurn::user("I'm a Cancer sun.").unwrap(),
            ConversationTurn::assistant("Cancer is ruled by the Moon.").unwrap(),
        ])
}

// ── Golden round trips ───────────────────────────────────────────────────

#[tokio::test]
async fn openai_golden_round_trip() {
    let fixture = Fixture::new(
        200,
        r#"{"id":"chatcmpl-1","model":"gpt-4o-mini","choices":[{"index":0,"message":{"role":"assistant","content":"Expect heightened emotions."},"finish_reason":"stop"}]}"#,
    );
    let base = serve(fixture.clone()).await;

    let response = openai(&base)
        .complete(&request(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response.content, "Expect heightened emotions.");
    assert_eq!(response.provider, ProviderKind::OpenAi);

    let seen = fixture.last();
    assert_eq!(seen.path, "/v1/chat/completions");
    assert_eq!(seen.headers["authorization"], "Bearer test-key");
    assert_eq!(seen.body["model"], "gpt-4o-mini");
    assert_eq!(seen.body["max_tokens"], 128);
    assert_eq!(seen.body["messages"][0]["role"], "system");
    assert_eq!(seen.body["messages"][3]["content"], "How will the full moon affect me?");
}

#[tokio::test]
async fn anthropic_golden_round_trip() {
    let fixture = Fixture::new(
        200,
        r#"{"id":"msg_1","type":"message","role":"assistant","model":"claude-3-5-haiku-latest","content":[{"type":"text","text":"The full moon lights up your chart."}],"stop_reason":"end_turn","usage":{"input_tokens":10,"output_tokens":8}}"#,
    );
    let base = serve(fixture.clone()).await;

    let response = anthropic(&base)
        .complete(&request(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response.content, "The full moon lights up your chart.");
    assert_eq!(response.model.as_deref(), Some("claude-3-5-haiku-latest"));

    let seen = fixture.last();
    assert_eq!(seen.path, "/v1/messages");
    assert_eq!(seen.headers["x-api-key"], "test-key");
    assert_eq!(seen.headers["anthropic-version"], "2023-06-01");
    assert_eq!(seen.body["system"], "You are a careful astrologer.");
    assert_eq!(seen.body["messages"].as_array().unwrap().len(), 3);
    assert_eq!(seen.body["messages"][0]["content"][0]["type"], "text");
}

#[tokio::test]
async fn huggingface_golden_round_trip() {
    let fixture = Fixture::new(200, r#"[{"generated_text":" Rest and reflect."}]"#);
    let base = serve(fixture.clone()).await;

    let response = huggingface(&base)
        .complete(&request(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response.content, "Rest and reflect.");
    assert_eq!(response.provider, ProviderKind::HuggingFace);

    let seen = fixture.last();
    assert_eq!(seen.path, "/models/test-org/test-model");
    assert_eq!(seen.headers["authorization"], "Bearer test-key");
    let inputs = seen.body["inputs"].as_str().unwrap();
    assert!(inputs.starts_with("System: You are a careful astrologer."));
    assert!(inputs.ends_with("Assistant:"));
    assert_eq!(seen.body["parameters"]["max_new_tokens"], 128);
    assert_eq!(seen.body["parameters"]["return_full_text"], false);
}

// ── Error classification ─────────────────────────────────────────────────

#[tokio::test]
async fn rate_limited_for_every_provider() {
    let fixture = Fixture::new(429, r#"{"error":{"message":"Too many requests"}}"#)
        .with_retry_after(3);
    let base = serve(fixture).await;

    for adapter in all_adapters(&base) {
        let err = adapter
            .complete(&request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimited, "{}", adapter.name());
        assert_eq!(err.http_status, Some(429));
        assert_eq!(err.retry_after_secs, Some(3));
        assert!(err.is_transient());
    }
}

#[tokio::test]
async fn model_loading_only_for_huggingface() {
    let fixture = Fixture::new(
        503,
        r#"{"error":"Model test-org/test-model is currently loading","estimated_time":4.2}"#,
    );
    let base = serve(fixture).await;
    let cancel = CancellationToken::new();

    let err = huggingface(&base).complete(&request(), &cancel).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ModelLoading);
    assert_eq!(err.retry_after_secs, Some(5));

    let err = openai(&base).complete(&request(), &cancel).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Http(503));
    let err = anthropic(&base).complete(&request(), &cancel).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Http(503));
}

#[tokio::test]
async fn malformed_body_for_every_provider() {
    let base = serve(Fixture::new(200, "<html>gateway</html>")).await;

    for adapter in all_adapters(&base) {
        let err = adapter
            .complete(&request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse, "{}", adapter.name());
        assert!(!err.is_transient());
    }
}

#[tokio::test]
async fn json_without_content_field_is_malformed_for_every_provider() {
    let base = serve(Fixture::new(200, r#"{"unexpected":true}"#)).await;

    for adapter in all_adapters(&base) {
        let err = adapter
            .complete(&request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse, "{}", adapter.name());
    }
}

#[tokio::test]
async fn zero_token_limit_never_reaches_the_wire() {
    let fixture = Fixture::new(200, "{}");
    let base = serve(fixture.clone()).await;

    for adapter in all_adapters(&base) {
        let mut zero = adapter.settings().clone();
        zero.default_max_tokens = 0;
        let adapter = astrochat_providers::adapter_for(zero, Duration::from_secs(5));

        let err = adapter
            .complete(&CanonicalRequest::new("q"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest, "{}", adapter.name());
    }
    assert!(fixture.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn empty_body_for_every_provider() {
    let base = serve(Fixture::new(200, "")).await;

    for adapter in all_adapters(&base) {
        let err = adapter
            .complete(&request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::EmptyResponse, "{}", adapter.name());
    }
}

#[tokio::test]
async fn unauthorized_is_permanent() {
    let base = serve(Fixture::new(401, r#"{"error":{"message":"invalid x-api-key"}}"#)).await;

    let err = anthropic(&base)
        .complete(&request(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unauthorized);
    assert_eq!(err.provider_message.as_deref(), Some("invalid x-api-key"));
    assert!(!err.is_transient());
    assert_eq!(err.user_message(), "Could not get a response, please try again.");
}

// ── Deadlines and cancellation ───────────────────────────────────────────

#[tokio::test]
async fn slow_provider_times_out() {
    let fixture = Fixture::new(200, r#"{"choices":[]}"#).with_delay(Duration::from_secs(5));
    let base = serve(fixture).await;

    let adapter = openai(&base).with_timeout(Duration::from_millis(100));
    let err = adapter
        .complete(&request(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
    assert!(err.is_transient());
}

#[tokio::test]
async fn cancellation_aborts_in_flight_call() {
    let fixture = Fixture::new(200, r#"[{"generated_text":"late"}]"#)
        .with_delay(Duration::from_secs(5));
    let base = serve(fixture).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = huggingface(&base).complete(&request(), &cancel).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert!(!err.is_transient());
}

#[tokio::test]
async fn unreachable_host_is_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = openai(&format!("http://{addr}"))
        .complete(&request(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Network);
    assert!(err.is_transient());
}
