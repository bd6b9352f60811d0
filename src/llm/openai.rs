//! OpenAI API Provider.
//!
//! Implements `TextIntelligenceProvider` on OpenAI's embeddings and Chat
//! Completions APIs (or any compatible endpoint), with cost accounting from
//! the static price table.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::pricing::{ModelInfo, PriceTable};
use super::provider::{CostClass, PrivacyClass, ProviderInfo, TextIntelligenceProvider};
use super::types::{Capability, CompletionResult, EmbeddingResult, FinishReason, Message, Role};
use super::SYSTEM_INSTRUCTION;
use crate::config::{ProviderConfig, ProviderType};
use crate::error::{ProviderError, Result};
use crate::retry::{with_retry, RetryPolicy};
use crate::usage::{estimate_tokens, UsageStats, UsageTracker};

const PROVIDER_NAME: &str = "OpenAI";
const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Cumulative spend (USD) above which the local provider is suggested
const COST_ADVISORY_THRESHOLD: f64 = 10.0;
/// Request count above which caching is suggested
const VOLUME_ADVISORY_THRESHOLD: u64 = 1_000;

const BENCHMARK_TEXT: &str = "Benchmarking embedding latency for model selection.";

/// Local, network-free cost estimate.
#[derive(Debug, Clone, Serialize)]
pub struct CostEstimate {
    pub model: String,
    pub tokens: u64,
    pub cost: f64,
}

/// Outcome of benchmarking one embedding model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelBenchmark {
    pub model: String,
    pub success: bool,
    pub duration_ms: u64,
    pub tokens: u64,
    pub cost: f64,
    pub dimensions: Option<usize>,
    pub error: Option<String>,
}

/// Temporarily replaces the configured embedding model; restores it on drop.
struct EmbeddingModelOverride<'a> {
    config: &'a RwLock<ProviderConfig>,
    original: String,
}

impl<'a> EmbeddingModelOverride<'a> {
    fn new(config: &'a RwLock<ProviderConfig>) -> Self {
        let original = config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .models
            .embeddings
            .clone();
        Self { config, original }
    }

    fn set(&self, model: &str) {
        self.config.write().unwrap_or_else(PoisonError::into_inner).models.embeddings =
            model.to_string();
    }
}

impl Drop for EmbeddingModelOverride<'_> {
    fn drop(&mut self) {
        self.config.write().unwrap_or_else(PoisonError::into_inner).models.embeddings =
            std::mem::take(&mut self.original);
    }
}

/// Direct API provider billed per token.
pub struct OpenAIProvider {
    client: Client,
    base_url: String,
    config: RwLock<ProviderConfig>,
    pricing: PriceTable,
    retry: RetryPolicy,
    ready: AtomicBool,
    usage: UsageTracker,
}

impl OpenAIProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| OPENAI_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Self {
            client: Client::new(),
            base_url,
            retry: config.retry.policy(),
            config: RwLock::new(config),
            pricing: PriceTable::builtin().clone(),
            ready: AtomicBool::new(false),
            usage: UsageTracker::new(),
        }
    }

    /// Replace the built-in price table.
    pub fn with_pricing(mut self, pricing: PriceTable) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn config(&self) -> ProviderConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn pricing(&self) -> &PriceTable {
        &self.pricing
    }

    /// Static catalog, no network round trip.
    pub fn model_info(&self) -> Vec<ModelInfo> {
        self.pricing.models().into_iter().cloned().collect()
    }

    /// Estimate what embedding or completing `text` would cost with the configured model.
    pub fn estimate_cost(&self, text: &str, capability: Capability) -> Result<CostEstimate> {
        let config = self.config();
        let model = match capability {
            Capability::Embeddings => config.models.embeddings.clone(),
            Capability::Completion | Capability::Chat => config
                .models
                .completion_model()
                .map(str::to_string)
                .ok_or_else(|| {
                    ProviderError::UnsupportedCapability("no completion model configured".to_string())
                })?,
        };
        let tokens = estimate_tokens(text);
        Ok(CostEstimate {
            cost: self.pricing.cost(&model, tokens),
            model,
            tokens,
        })
    }

    /// Advisory notes derived from configuration and spend. Never changes behaviour.
    pub fn usage_recommendations(&self) -> Vec<String> {
        let config = self.config();
        let usage = self.usage.snapshot();
        let mut recommendations = Vec::new();

        let configured = [
            (Capability::Embeddings, Some(config.models.embeddings.as_str())),
            (Capability::Completion, config.models.completion_model()),
        ];
        for (capability, model) in configured {
            let Some(current) = model.and_then(|m| self.pricing.get(m)) else {
                continue;
            };
            if current.recommended {
                continue;
            }
            let better = self
                .pricing
                .models_for(capability)
                .into_iter()
                .find(|m| m.recommended && m.price_per_million < current.price_per_million);
            if let Some(better) = better {
                recommendations.push(format!(
                    "Switch {capability} from {} to {}: newer and cheaper (${:.2} vs ${:.2} per 1M tokens)",
                    current.id, better.id, better.price_per_million, current.price_per_million
                ));
            }
        }

        if usage.estimated_cost > COST_ADVISORY_THRESHOLD {
            recommendations.push(format!(
                "Spend so far is ${:.2}. The local provider generates embeddings at no cost",
                usage.estimated_cost
            ));
        }

        if usage.request_count > VOLUME_ADVISORY_THRESHOLD {
            recommendations.push(format!(
                "{} requests made. Cache embeddings for repeated inputs to cut cost",
                usage.request_count
            ));
        }

        recommendations
    }

    /// Time one embedding request per catalog embedding model.
    ///
    /// The configured embedding model is restored afterwards, whatever happens.
    pub async fn benchmark_models(&self) -> Result<Vec<ModelBenchmark>> {
        self.ensure_ready()?;

        let candidates: Vec<String> = self
            .pricing
            .models_for(Capability::Embeddings)
            .into_iter()
            .map(|m| m.id.clone())
            .collect();

        let guard = EmbeddingModelOverride::new(&self.config);
        let mut results = Vec::with_capacity(candidates.len());

        for model in candidates {
            guard.set(&model);
            let started = Instant::now();
            let outcome = self.generate_embeddings(BENCHMARK_TEXT).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            results.push(match outcome {
                Ok(result) => ModelBenchmark {
                    model,
                    success: true,
                    duration_ms,
                    tokens: result.tokens,
                    cost: result.cost,
                    dimensions: Some(result.dimension()),
                    error: None,
                },
                Err(err) => {
                    warn!(model = %model, "Benchmark request failed: {err}");
                    ModelBenchmark {
                        model,
                        success: false,
                        duration_ms,
                        tokens: 0,
                        cost: 0.0,
                        dimensions: None,
                        error: Some(err.to_string()),
                    }
                }
            });
        }

        drop(guard);
        Ok(results)
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.ready.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ProviderError::NotInitialized { provider: PROVIDER_NAME })
        }
    }

    fn api_key(&self) -> Result<String> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .api_key
            .as_ref()
            .map(|k| k.expose().to_string())
            .ok_or_else(|| ProviderError::Remote {
                provider: PROVIDER_NAME,
                status: None,
                message: "API key is required".to_string(),
            })
    }

    async fn post<Req, Resp>(&self, endpoint: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: for<'de> Deserialize<'de>,
    {
        let api_key = self.api_key()?;
        let response = self
            .client
            .post(format!("{}/{endpoint}", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER_NAME, e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Remote {
                provider: PROVIDER_NAME,
                status: Some(status.as_u16()),
                message: format!("{status}: {error_text}"),
            });
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("{PROVIDER_NAME}: {e}")))
    }

    async fn embed_once(&self, model: &str, text: &str) -> Result<(Vec<f32>, u64)> {
        let request = EmbeddingsRequest { model, input: text };
        let response: EmbeddingsResponse = self.post("embeddings", &request).await?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No embedding in response".to_string()))?
            .embedding;
        let tokens = response
            .usage
            .map(|u| u.total_tokens)
            .unwrap_or_else(|| estimate_tokens(text));

        Ok((embedding, tokens))
    }
}

#[async_trait]
impl TextIntelligenceProvider for OpenAIProvider {
    async fn initialize(&self) -> bool {
        if self.ready.load(Ordering::Acquire) {
            return true;
        }
        if let Err(err) = self.api_key() {
            warn!("OpenAI provider initialization failed: {err}");
            return false;
        }

        let model = self.config().models.embeddings;
        match self.embed_once(&model, "test").await {
            Ok(_) => {
                self.ready.store(true, Ordering::Release);
                info!(base_url = %self.base_url, model = %model, "OpenAI provider initialized");
                true
            }
            Err(err) => {
                warn!("OpenAI provider initialization failed: {err}");
                false
            }
        }
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn generate_embeddings(&self, text: &str) -> Result<EmbeddingResult> {
        self.ensure_ready()?;
        let model = self.config().models.embeddings;

        let (embedding, tokens) = with_retry(&self.retry, || self.embed_once(&model, text)).await?;
        let cost = self.pricing.cost(&model, tokens);
        self.usage.track(tokens, cost);
        debug!(model = %model, tokens, cost, "Generated embedding");

        Ok(EmbeddingResult {
            embedding,
            tokens,
            cost,
            model,
        })
    }

    async fn generate_completion(&self, prompt: &str, max_tokens: usize) -> Result<CompletionResult> {
        self.ensure_ready()?;
        let config = self.config();
        let model = config
            .models
            .completion_model()
            .map(str::to_string)
            .ok_or_else(|| {
                ProviderError::UnsupportedCapability("no completion model configured".to_string())
            })?;

        let request = ChatRequest {
            model: &model,
            messages: vec![
                ApiMessage::from(&Message::system(SYSTEM_INSTRUCTION)),
                ApiMessage::from(&Message::user(prompt)),
            ],
            temperature: config.temperature,
            max_tokens,
        };

        let response: ChatResponse =
            with_retry(&self.retry, || self.post("chat/completions", &request)).await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No choices returned from OpenAI".to_string()))?;

        let tokens = response
            .usage
            .map(|u| u.total_tokens)
            .unwrap_or_else(|| estimate_tokens(prompt));
        let cost = self.pricing.cost(&model, tokens);
        self.usage.track(tokens, cost);
        debug!(model = %model, tokens, cost, "Generated completion");

        Ok(CompletionResult {
            text: choice.message.content.unwrap_or_default(),
            tokens,
            cost,
            model,
            finish_reason: FinishReason::from_wire(choice.finish_reason.as_deref()),
        })
    }

    fn provider_info(&self) -> ProviderInfo {
        ProviderInfo {
            name: PROVIDER_NAME.to_string(),
            provider_type: ProviderType::OpenAI,
            capabilities: vec![Capability::Embeddings, Capability::Completion, Capability::Chat],
            requires_api_key: true,
            cost: CostClass::PayPerUse,
            privacy: PrivacyClass::Api,
        }
    }

    fn usage(&self) -> UsageStats {
        self.usage.snapshot()
    }
}

// -----------------------------------------------------------------------------
// OpenAI DTOs (Data Transfer Objects)
// -----------------------------------------------------------------------------

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage>,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

impl From<&Message> for ApiMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: msg.content.clone(),
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ApiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    total_tokens: u64,
}
