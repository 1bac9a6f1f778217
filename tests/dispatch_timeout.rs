//! Upstream timeout behavior. Lives in its own binary because it mutates
//! the timeout environment variables.

use std::time::Duration;

use modelgate::catalog::ModelCatalog;
use modelgate::dispatch::{DispatchOptions, Dispatcher};
use modelgate::error::GatewayError;
use modelgate::types::{ChatMessage, ChatRequest};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn slow_upstream_times_out_and_is_not_retried() {
    std::env::set_var("AI_TIMEOUT_MS", "200");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "choices": [] }))
                .set_delay(Duration::from_secs(5)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let opts = DispatchOptions {
        requested_provider: Some("custom".into()),
        base_url: Some(server.uri()),
        ..Default::default()
    };

    let started = std::time::Instant::now();
    let err = Dispatcher::new()
        .execute(
            ChatRequest::new("my-model", vec![ChatMessage::user("hi")]),
            &ModelCatalog::default(),
            opts,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Timeout(_)));
    // Fired from the 200ms timer, well before the 5s upstream delay.
    assert!(started.elapsed() < Duration::from_secs(3));
    // expect(1) on the mock verifies the timed-out call was not retried.

    std::env::remove_var("AI_TIMEOUT_MS");
}
