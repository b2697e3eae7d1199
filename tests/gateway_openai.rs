use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use watchdog_lite::gateway::openai::{ChatProvider, OpenAiAdapter};
use watchdog_lite::gateway::usage::{CallStatus, ModelCallRecord};
use watchdog_lite::gateway::{
    Attribution, ChatRequest, FinishReason, GatewayConfig, Message, NoopUsageSink, ProviderError,
    ProviderGateway, UsageSink,
};
use watchdog_lite::types::EventId;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn adapter(server: &MockServer) -> OpenAiAdapter {
    OpenAiAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap()
}

fn request() -> ChatRequest {
    ChatRequest::new("gpt-4o", vec![Message::user("hi")], Attribution::new("test"))
        .temperature(0.2)
}

fn ok_body(content: serde_json::Value) -> serde_json::Value {
    json!({
        "choices": [{
            "message": { "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 20 }
    })
}

#[tokio::test]
async fn openai_sends_model_and_temperature_and_parses_usage() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o",
            "temperature": 0.2,
            "messages": [{ "role": "user", "content": "hi" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!("[]"))))
        .mount(&server)
        .await;

    let resp = adapter(&server).chat(&request()).await.unwrap();
    assert_eq!(resp.content, "[]");
    assert_eq!(resp.finish_reason, FinishReason::Stop);
    assert_eq!(resp.input_tokens, 10);
    assert_eq!(resp.output_tokens, 20);
}

#[tokio::test]
async fn openai_null_content_is_empty_not_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": null }, "finish_reason": "stop" }]
        })))
        .mount(&server)
        .await;

    let resp = adapter(&server).chat(&request()).await.unwrap();
    assert_eq!(resp.content, "");
    assert_eq!(resp.input_tokens, 0);
}

#[tokio::test]
async fn openai_classifies_http_429_as_rate_limit_and_keeps_context() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("x-request-id", "abc123")
                .insert_header("retry-after", "3")
                .set_body_json(json!({
                    "error": { "message": "rate limited", "code": "rate_limit_exceeded" }
                })),
        )
        .mount(&server)
        .await;

    let err = adapter(&server).chat(&request()).await.unwrap_err();
    match err {
        ProviderError::RateLimited {
            retry_after,
            context,
        } => {
            assert_eq!(retry_after, Duration::from_secs(3));
            let ctx = context.expect("expected error context");
            assert_eq!(ctx.http_status, Some(429));
            assert_eq!(ctx.provider_code.as_deref(), Some("rate_limit_exceeded"));
            assert_eq!(ctx.request_id.as_deref(), Some("abc123"));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn openai_auth_failure_is_permanent() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "message": "Incorrect API key provided" }
        })))
        .mount(&server)
        .await;

    let err = adapter(&server).chat(&request()).await.unwrap_err();
    assert!(matches!(err, ProviderError::Unauthorized { .. }));
    assert!(!err.is_retryable());
    assert_eq!(err.code(), "unauthorized");
}

#[tokio::test]
async fn openai_rejects_oversized_input_without_calling_out() {
    let server = MockServer::start().await;

    let req = ChatRequest::new(
        "gpt-4o",
        vec![Message::user("x".repeat(600_000))],
        Attribution::new("test"),
    );
    let err = adapter(&server).chat(&req).await.unwrap_err();
    assert!(matches!(err, ProviderError::InvalidRequest { .. }));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[derive(Clone)]
struct FlipResponder {
    calls: Arc<AtomicUsize>,
    first: ResponseTemplate,
    second: ResponseTemplate,
}

impl Respond for FlipResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            self.first.clone()
        } else {
            self.second.clone()
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    records: Mutex<Vec<ModelCallRecord>>,
}

#[async_trait::async_trait]
impl UsageSink for RecordingSink {
    async fn record(&self, record: ModelCallRecord) {
        self.records.lock().unwrap().push(record);
    }
}

fn fast_retries(max_retries: u32) -> GatewayConfig {
    GatewayConfig {
        max_retries,
        retry_base_delay: Duration::from_millis(0),
        max_retry_delay: Duration::from_millis(0),
    }
}

#[tokio::test]
async fn provider_gateway_retries_on_retryable_errors_and_records_each_attempt() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(FlipResponder {
            calls: Arc::new(AtomicUsize::new(0)),
            first: ResponseTemplate::new(500).set_body_json(json!({
                "error": { "message": "transient error", "code": "internal" }
            })),
            second: ResponseTemplate::new(200).set_body_json(ok_body(json!("ok"))),
        })
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::default());
    let gateway = ProviderGateway::with_config(adapter(&server), sink.clone(), fast_retries(1));

    let event_id = EventId::new();
    let req = ChatRequest::new(
        "gpt-4o",
        vec![Message::user("hi")],
        Attribution::new("summarize::batch")
            .with_event(event_id)
            .with_batch(3),
    );
    let resp = gateway.chat(req).await.unwrap();
    assert_eq!(resp.content, "ok");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);

    let records = sink.records.lock().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].status, CallStatus::Error);
    assert_eq!(records[0].error_code.as_deref(), Some("provider_error"));
    assert_eq!(records[1].status, CallStatus::Success);
    assert_eq!(records[1].attempt, 1);
    assert_eq!(records[1].event_id, Some(event_id));
    assert_eq!(records[1].batch_index, Some(3));
    assert_eq!(records[1].input_tokens, 10);
}

#[tokio::test]
async fn provider_gateway_does_not_retry_client_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "message": "bad request" }
        })))
        .mount(&server)
        .await;

    let gateway =
        ProviderGateway::with_config(adapter(&server), Arc::new(NoopUsageSink), fast_retries(3));
    let err = gateway.chat(request()).await.unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn provider_gateway_gives_up_after_max_retries() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let gateway =
        ProviderGateway::with_config(adapter(&server), Arc::new(NoopUsageSink), fast_retries(2));
    let err = gateway.chat(request()).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}
