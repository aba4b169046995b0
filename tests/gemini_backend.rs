use std::sync::Arc;
use std::time::Duration;

use seven_stations::client::{
    BackendCall, GeminiBackend, GenerateRequest, ModelClient, ModelError, ModelId, TextBackend,
};
use seven_stations::config::ClientConfig;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer) -> GeminiBackend {
    GeminiBackend::with_config("test-key", server.uri(), Duration::from_secs(5)).unwrap()
}

fn call(model: ModelId, prompt: &str) -> BackendCall {
    BackendCall {
        model,
        prompt: prompt.to_string(),
        temperature: 0.4,
        max_output_tokens: 512,
        top_p: 0.95,
        top_k: 40,
        stop_sequences: Vec::new(),
    }
}

fn text_body(text: &str) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": { "parts": [{ "text": text }], "role": "model" },
            "finishReason": "STOP"
        }]
    })
}

#[tokio::test]
async fn gemini_sends_prompt_and_generation_config() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:generateContent"))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(json!({
            "contents": [{ "role": "user", "parts": [{ "text": "Tell me a story" }] }],
            "generationConfig": { "maxOutputTokens": 512, "topK": 40 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_body("Once upon a time")))
        .expect(1)
        .mount(&server)
        .await;

    let text = backend(&server)
        .generate(&call(ModelId::Flash, "Tell me a story"))
        .await
        .unwrap();
    assert_eq!(text, "Once upon a time");
}

#[tokio::test]
async fn gemini_joins_multiple_parts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": { "parts": [{ "text": "{\"a\":" }, { "text": " 1}" }] }
            }]
        })))
        .mount(&server)
        .await;

    let text = backend(&server)
        .generate(&call(ModelId::Pro, "json please"))
        .await
        .unwrap();
    assert_eq!(text, "{\"a\": 1}");
}

#[tokio::test]
async fn gemini_maps_overload_and_rate_limit_to_retryable() {
    for status in [429u16, 500, 503] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "error": { "code": status, "message": "The model is overloaded." }
            })))
            .mount(&server)
            .await;

        let err = backend(&server)
            .generate(&call(ModelId::Flash, "hi"))
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "status {status} should be retryable");
        match err {
            ModelError::Backend { status: got, message, .. } => {
                assert_eq!(got, Some(status));
                assert_eq!(message, "The model is overloaded.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

#[tokio::test]
async fn gemini_bad_request_is_not_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("nope"))
        .mount(&server)
        .await;

    let err = backend(&server)
        .generate(&call(ModelId::Flash, "hi"))
        .await
        .unwrap_err();
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("HTTP 400"));
}

#[tokio::test]
async fn gemini_safety_block_is_not_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "finishReason": "SAFETY" }]
        })))
        .mount(&server)
        .await;

    let err = backend(&server)
        .generate(&call(ModelId::Flash, "hi"))
        .await
        .unwrap_err();
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("SAFETY"));
}

#[tokio::test]
async fn gemini_missing_candidates_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
        .mount(&server)
        .await;

    let err = backend(&server)
        .generate(&call(ModelId::Flash, "hi"))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn client_falls_back_to_second_model_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-pro:generateContent"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "message": "model not enabled for this key" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_body("{\"ok\": true}")))
        .expect(1)
        .mount(&server)
        .await;

    let config = ClientConfig {
        default_model: ModelId::Pro,
        fallback_model: Some(ModelId::Flash),
        enable_rate_limiting: false,
        cache_sweep_secs: 0,
        ..ClientConfig::default()
    };
    let client = ModelClient::new(config, Arc::new(backend(&server))).unwrap();
    let response = client.generate(GenerateRequest::new("Go")).await.unwrap();

    assert_eq!(response.model, ModelId::Flash);
    assert_eq!(response.content, "{\"ok\": true}");
    assert_eq!(response.metadata.retry_count, 1);
}
