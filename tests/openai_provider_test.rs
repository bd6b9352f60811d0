//! Mock API tests for the direct OpenAI provider
//!
//! Response bodies follow the OpenAI API reference for `/embeddings` and
//! `/chat/completions`.

use serde_json::json;
use textintel::llm::pricing::{ModelInfo, PerformanceTier, PriceTable};
use textintel::llm::types::FinishReason;
use textintel::{
    Capability, OpenAIProvider, ProviderConfig, ProviderError, RetryConfig, TextIntelligenceProvider,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn embedding_response(model: &str, total_tokens: u64) -> serde_json::Value {
    json!({
        "object": "list",
        "data": [{
            "object": "embedding",
            "index": 0,
            "embedding": [0.1, -0.2, 0.3, 0.4]
        }],
        "model": model,
        "usage": {
            "prompt_tokens": total_tokens,
            "total_tokens": total_tokens
        }
    })
}

fn chat_response() -> serde_json::Value {
    json!({
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "created": 1677652288,
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": "Retries use exponential backoff."
            },
            "finish_reason": "length"
        }],
        "usage": {
            "prompt_tokens": 9,
            "completion_tokens": 12,
            "total_tokens": 21
        }
    })
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 5,
    }
}

fn config_for(server: &MockServer) -> ProviderConfig {
    ProviderConfig::openai("test-api-key")
        .with_base_url(server.uri())
        .with_retry(fast_retry())
}

async fn mount_embeddings(server: &MockServer, tokens: u64) {
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(header("Authorization", "Bearer test-api-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(embedding_response("any", tokens)))
        .mount(server)
        .await;
}

async fn ready_provider(server: &MockServer, config: ProviderConfig) -> OpenAIProvider {
    mount_embeddings(server, 10).await;
    let provider = OpenAIProvider::new(config);
    assert!(provider.initialize().await);
    provider
}

#[tokio::test]
async fn test_embedding_cost_from_price_table() {
    let server = MockServer::start().await;
    let pricing = PriceTable::new(
        "test",
        vec![ModelInfo::new(
            "cheap-embed-v1",
            Capability::Embeddings,
            512,
            0.02,
            PerformanceTier::Fast,
            true,
        )],
    );
    mount_embeddings(&server, 10).await;

    let provider = OpenAIProvider::new(config_for(&server).with_embedding_model("cheap-embed-v1"))
        .with_pricing(pricing);
    assert!(provider.initialize().await);

    let result = provider.generate_embeddings("ten tokens of text").await.unwrap();
    assert_eq!(result.model, "cheap-embed-v1");
    assert_eq!(result.tokens, 10);
    assert_eq!(result.dimension(), 4);
    assert!((result.cost - 0.0000002).abs() < 1e-15);

    let usage = provider.usage();
    assert_eq!(usage.tokens_used, 10);
    assert_eq!(usage.request_count, 1);
    assert!((usage.estimated_cost - 0.0000002).abs() < 1e-15);
}

#[tokio::test]
async fn test_unlisted_model_uses_default_price() {
    let server = MockServer::start().await;
    let provider =
        ready_provider(&server, config_for(&server).with_embedding_model("brand-new-embedder")).await;

    let result = provider.generate_embeddings("hello").await.unwrap();
    assert!((result.cost - 10.0 * 0.000001).abs() < 1e-15);
}

#[tokio::test]
async fn test_completion() {
    let server = MockServer::start().await;
    let provider = ready_provider(&server, config_for(&server)).await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"model": "gpt-4o-mini", "max_tokens": 50})))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response()))
        .expect(1)
        .mount(&server)
        .await;

    let result = provider.generate_completion("How do retries work?", 50).await.unwrap();
    assert_eq!(result.text, "Retries use exponential backoff.");
    assert_eq!(result.tokens, 21);
    assert_eq!(result.finish_reason, FinishReason::Length);
    assert!((result.cost - 21.0 * 0.00000015).abs() < 1e-15);
}

#[tokio::test]
async fn test_calls_before_initialize_fail() {
    let server = MockServer::start().await;
    let provider = OpenAIProvider::new(config_for(&server));

    let err = provider.generate_embeddings("hello").await.unwrap_err();
    assert!(matches!(err, ProviderError::NotInitialized { .. }));
    assert!(err.to_string().contains("Call initialize() first"));
    assert_eq!(provider.usage().request_count, 0);
}

#[tokio::test]
async fn test_initialize_fails_on_rejected_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAIProvider::new(config_for(&server));
    assert!(!provider.initialize().await);
    assert!(!provider.is_ready());
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let server = MockServer::start().await;
    let provider = ready_provider(&server, config_for(&server)).await;
    server.reset().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_embeddings(&server, 7).await;

    let result = provider.generate_embeddings("hello").await.unwrap();
    assert_eq!(result.tokens, 7);
    assert_eq!(provider.usage().request_count, 1);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    let provider = ready_provider(&server, config_for(&server)).await;
    server.reset().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad input"))
        .expect(1)
        .mount(&server)
        .await;

    let err = provider.generate_embeddings("hello").await.unwrap_err();
    match err {
        ProviderError::Remote { status, message, .. } => {
            assert_eq!(status, Some(400));
            assert!(message.contains("bad input"));
        }
        other => panic!("expected Remote error, got {other:?}"),
    }
    assert_eq!(provider.usage().request_count, 0);
}

#[tokio::test]
async fn test_benchmark_restores_embedding_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(body_partial_json(json!({"model": "text-embedding-3-large"})))
        .respond_with(ResponseTemplate::new(400).set_body_string("model not enabled"))
        .with_priority(1)
        .mount(&server)
        .await;
    let provider = ready_provider(&server, config_for(&server)).await;

    let results = provider.benchmark_models().await.unwrap();
    assert_eq!(results.len(), 3);

    let failed: Vec<_> = results.iter().filter(|r| !r.success).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].model, "text-embedding-3-large");
    assert!(failed[0].error.is_some());

    assert_eq!(provider.config().models.embeddings, "text-embedding-3-small");
}
