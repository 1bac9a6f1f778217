//! End-to-end dispatch against a mock upstream.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use modelgate::catalog::ModelCatalog;
use modelgate::collab::{ResponseCache, UsageSink};
use modelgate::dispatch::{DispatchOptions, Dispatcher};
use modelgate::error::GatewayError;
use modelgate::logrecord::LogEntry;
use modelgate::types::{ChatMessage, ChatRequest, FinishReason};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct RecordingSink {
    entries: Mutex<Vec<LogEntry>>,
}

#[async_trait]
impl UsageSink for RecordingSink {
    async fn record(&self, entry: LogEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}

#[derive(Default)]
struct MapCache {
    map: Mutex<std::collections::HashMap<String, serde_json::Value>>,
}

#[async_trait]
impl ResponseCache for MapCache {
    async fn get(&self, fingerprint: &str) -> Option<serde_json::Value> {
        self.map.lock().unwrap().get(fingerprint).cloned()
    }
    async fn put(&self, fingerprint: &str, response: &serde_json::Value) {
        self.map
            .lock()
            .unwrap()
            .insert(fingerprint.to_string(), response.clone());
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("modelgate=debug")
        .try_init();
}

fn options(server: &MockServer) -> (DispatchOptions, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let opts = DispatchOptions {
        requested_provider: Some("custom".into()),
        base_url: Some(server.uri()),
        sink: Some(sink.clone()),
        ..Default::default()
    };
    (opts, sink)
}

#[tokio::test]
async fn non_streaming_call_normalizes_and_logs() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": { "role": "assistant", "content": "hello there" },
                "finish_reason": "stop",
            }],
            "usage": { "prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12 },
        })))
        .mount(&server)
        .await;

    let (opts, sink) = options(&server);
    let outcome = Dispatcher::new()
        .execute(
            ChatRequest::new("my-model", vec![ChatMessage::user("hi")]),
            &ModelCatalog::default(),
            opts,
        )
        .await
        .unwrap();

    assert_eq!(outcome.text, "hello there");
    assert_eq!(outcome.finish_reason, FinishReason::Stop);
    assert_eq!(outcome.usage.total_tokens, Some(12));
    assert!(!outcome.served_from_cache);

    let entries = sink.entries.lock().unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.used_provider, "custom");
    assert_eq!(entry.usage.as_ref().unwrap().prompt_tokens, Some(9));
    // Debug flag off: raw payloads must not be persisted.
    assert!(entry.raw_request.is_none());
    assert!(entry.raw_response.is_none());
}

#[tokio::test]
async fn streaming_call_accumulates_chunks() {
    let server = MockServer::start().await;
    let sse = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":2,\"total_tokens\":7}}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse.as_bytes().to_vec(), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let (opts, sink) = options(&server);
    let outcome = Dispatcher::new()
        .execute(
            ChatRequest::new("my-model", vec![ChatMessage::user("hi")]).with_streaming(true),
            &ModelCatalog::default(),
            opts,
        )
        .await
        .unwrap();

    assert_eq!(outcome.text, "Hello");
    assert_eq!(outcome.usage.total_tokens, Some(7));
    assert_eq!(outcome.finish_reason, FinishReason::Stop);
    assert!(sink.entries.lock().unwrap()[0].streamed);
}

#[tokio::test]
async fn upstream_failure_is_classified_and_logged() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let (opts, sink) = options(&server);
    let err = Dispatcher::new()
        .execute(
            ChatRequest::new("my-model", vec![ChatMessage::user("hi")]),
            &ModelCatalog::default(),
            opts,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::ApiError { status: 503, .. }));
    let entries = sink.entries.lock().unwrap();
    let failure = entries[0].failure.as_ref().unwrap();
    assert_eq!(failure.status, 503);
    assert_eq!(
        failure.classification,
        modelgate::FinishClassification::UpstreamError
    );
}

#[tokio::test]
async fn cache_hit_skips_the_upstream_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": { "role": "assistant", "content": "first" },
                "finish_reason": "stop",
            }],
            "usage": { "prompt_tokens": 4, "completion_tokens": 1, "total_tokens": 5 },
        })))
        .expect(1)
        .mount(&server)
        .await;

    let cache = Arc::new(MapCache::default());
    let request = ChatRequest::new("my-model", vec![ChatMessage::user("hi")]);

    let (mut opts, _sink) = options(&server);
    opts.cache = Some(cache.clone());

    let dispatcher = Dispatcher::new();
    let first = dispatcher
        .execute(request.clone(), &ModelCatalog::default(), opts.clone())
        .await
        .unwrap();
    assert!(!first.served_from_cache);

    let second = dispatcher
        .execute(request, &ModelCatalog::default(), opts)
        .await
        .unwrap();
    assert!(second.served_from_cache);
    assert_eq!(second.text, "first");
    // The mock's expect(1) verifies no second upstream call happened.
}

#[tokio::test]
async fn prefired_cancellation_aborts_before_upstream() {
    let server = MockServer::start().await;
    // No mock mounted: any upstream call would 404 and fail differently.
    let cancel = modelgate::CancelHandle::new();
    cancel.cancel();

    let (mut opts, _sink) = options(&server);
    opts.cancel = Some(cancel);

    let err = Dispatcher::new()
        .execute(
            ChatRequest::new("my-model", vec![ChatMessage::user("hi")]),
            &ModelCatalog::default(),
            opts,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Cancelled));
}
