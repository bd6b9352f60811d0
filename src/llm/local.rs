//! On-device provider.
//!
//! Runs embedding and completion models inside the process. Models come from
//! an injected [`ModelLoader`], so tests and alternative runtimes can swap the
//! candle-backed default for anything else.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::candle::CandleLoader;
use super::provider::{CostClass, PrivacyClass, ProviderInfo, TextIntelligenceProvider};
use super::types::{Capability, CompletionResult, EmbeddingResult, FinishReason};
use crate::catalog::{self, LocalModel};
use crate::config::{ProviderConfig, ProviderType};
use crate::error::{ProviderError, Result};
use crate::usage::{estimate_tokens, UsageStats, UsageTracker};

const PROVIDER_NAME: &str = "Local";

/// Hard ceiling on generated tokens, whatever the caller asks for.
pub const MAX_GENERATED_TOKENS: usize = 200;

const BENCHMARK_TEXT: &str =
    "The quick brown fox jumps over the lazy dog. This sentence is used to benchmark local inference.";

/// A loaded embedding model. Calls block; the provider runs them off the runtime.
pub trait EmbeddingPipeline: Send + Sync {
    fn model_id(&self) -> &str;

    /// Length of every vector this model returns.
    fn dimensions(&self) -> usize;

    /// Pooled, normalized embedding of `text`.
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// Output of one generation run.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub finish_reason: FinishReason,
}

/// A loaded text generation model. Calls block.
pub trait CompletionPipeline: Send + Sync {
    fn model_id(&self) -> &str;

    fn generate(&self, prompt: &str, max_tokens: usize, temperature: f32) -> anyhow::Result<Generation>;
}

/// Produces pipelines for model identifiers.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load_embeddings(&self, model_id: &str) -> anyhow::Result<Arc<dyn EmbeddingPipeline>>;

    async fn load_completion(&self, model_id: &str) -> anyhow::Result<Arc<dyn CompletionPipeline>>;
}

/// Timing for one benchmarked pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkTiming {
    pub model: String,
    pub duration_ms: u64,
    pub tokens: u64,
    pub tokens_per_second: f64,
}

impl BenchmarkTiming {
    fn new(model: &str, started: Instant, tokens: u64) -> Self {
        let elapsed = started.elapsed();
        let secs = elapsed.as_secs_f64();
        Self {
            model: model.to_string(),
            duration_ms: elapsed.as_millis() as u64,
            tokens,
            tokens_per_second: if secs > 0.0 { tokens as f64 / secs } else { 0.0 },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub embedding: BenchmarkTiming,
    pub completion: Option<BenchmarkTiming>,
}

/// Clears the in-flight flag however initialization ends.
struct InitGuard<'a>(&'a AtomicBool);

impl Drop for InitGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// On-device provider: zero network, zero cost.
pub struct LocalProvider {
    config: RwLock<ProviderConfig>,
    loader: Arc<dyn ModelLoader>,
    embedder: RwLock<Option<Arc<dyn EmbeddingPipeline>>>,
    generator: RwLock<Option<Arc<dyn CompletionPipeline>>>,
    ready: AtomicBool,
    initializing: AtomicBool,
    usage: UsageTracker,
}

impl LocalProvider {
    pub fn new(config: ProviderConfig, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            config: RwLock::new(config),
            loader,
            embedder: RwLock::new(None),
            generator: RwLock::new(None),
            ready: AtomicBool::new(false),
            initializing: AtomicBool::new(false),
            usage: UsageTracker::new(),
        }
    }

    /// Provider backed by candle models from HuggingFace.
    pub fn with_candle(config: ProviderConfig) -> Self {
        Self::new(config, Arc::new(CandleLoader::detect()))
    }

    /// Current configuration, including any switched models.
    pub fn config(&self) -> ProviderConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Identifier of the active pipeline for a capability.
    pub fn active_model(&self, capability: Capability) -> Option<String> {
        match capability {
            Capability::Embeddings => self.embedder().map(|p| p.model_id().to_string()),
            Capability::Completion | Capability::Chat => {
                self.generator().map(|p| p.model_id().to_string())
            }
        }
    }

    pub fn has_completion(&self) -> bool {
        self.generator().is_some()
    }

    /// Whitelisted models for a capability.
    pub fn available_models(&self, capability: Capability) -> Vec<LocalModel> {
        catalog::models_for(capability).into_iter().copied().collect()
    }

    /// Catalog metadata, with placeholders for unknown IDs.
    pub fn model_info(&self, model_id: &str) -> LocalModel {
        catalog::lookup(model_id)
    }

    /// Replace the active model for a capability.
    ///
    /// Unknown identifiers are rejected before anything is loaded. A failed
    /// load leaves the previous model active and returns `Ok(false)`.
    pub async fn switch_model(&self, capability: Capability, model_id: &str) -> Result<bool> {
        if !catalog::is_allowed(capability, model_id) {
            return Err(ProviderError::UnsupportedCapability(format!(
                "'{model_id}' is not an available {capability} model"
            )));
        }

        match capability {
            Capability::Embeddings => match self.loader.load_embeddings(model_id).await {
                Ok(pipeline) => {
                    *self.embedder.write().unwrap_or_else(PoisonError::into_inner) = Some(pipeline);
                    self.config.write().unwrap_or_else(PoisonError::into_inner).models.embeddings =
                        model_id.to_string();
                }
                Err(err) => {
                    warn!(model = model_id, "Failed to switch embedding model: {err:#}");
                    return Ok(false);
                }
            },
            Capability::Completion | Capability::Chat => {
                match self.loader.load_completion(model_id).await {
                    Ok(pipeline) => {
                        *self.generator.write().unwrap_or_else(PoisonError::into_inner) =
                            Some(pipeline);
                        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
                        if capability == Capability::Chat {
                            config.models.chat = Some(model_id.to_string());
                        } else {
                            config.models.completion = Some(model_id.to_string());
                        }
                    }
                    Err(err) => {
                        warn!(model = model_id, "Failed to switch completion model: {err:#}");
                        return Ok(false);
                    }
                }
            }
        }

        info!(model = model_id, %capability, "Switched local model");
        Ok(true)
    }

    /// Time one embedding and, if loaded, one completion on a fixed text.
    pub async fn benchmark_performance(&self) -> Result<BenchmarkReport> {
        self.ensure_ready()?;
        let tokens = estimate_tokens(BENCHMARK_TEXT);

        let embedder = self.require_embedder()?;
        let started = Instant::now();
        let pipeline = Arc::clone(&embedder);
        run_blocking(move || pipeline.embed(BENCHMARK_TEXT)).await?;
        let embedding = BenchmarkTiming::new(embedder.model_id(), started, tokens);

        let completion = match self.generator() {
            Some(generator) => {
                let temperature = self.config().temperature;
                let started = Instant::now();
                let pipeline = Arc::clone(&generator);
                let generation =
                    run_blocking(move || pipeline.generate(BENCHMARK_TEXT, 20, temperature)).await?;
                Some(BenchmarkTiming::new(
                    generator.model_id(),
                    started,
                    generation.completion_tokens as u64,
                ))
            }
            None => None,
        };

        info!(
            embedding_ms = embedding.duration_ms,
            completion_ms = completion.as_ref().map(|c| c.duration_ms),
            "Local benchmark finished"
        );
        Ok(BenchmarkReport { embedding, completion })
    }

    async fn load_pipelines(&self) -> anyhow::Result<()> {
        let config = self.config();

        let embedder = self.loader.load_embeddings(&config.models.embeddings).await?;
        info!(
            model = embedder.model_id(),
            dimensions = embedder.dimensions(),
            "Embedding model ready"
        );
        *self.embedder.write().unwrap_or_else(PoisonError::into_inner) = Some(embedder);

        if let Some(model_id) = config.models.completion_model() {
            match self.loader.load_completion(model_id).await {
                Ok(generator) => {
                    info!(model = model_id, "Completion model ready");
                    *self.generator.write().unwrap_or_else(PoisonError::into_inner) = Some(generator);
                }
                Err(err) => {
                    warn!(model = model_id, "Completion model unavailable, embeddings only: {err:#}");
                }
            }
        }

        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.ready.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ProviderError::NotInitialized { provider: PROVIDER_NAME })
        }
    }

    fn embedder(&self) -> Option<Arc<dyn EmbeddingPipeline>> {
        self.embedder.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn generator(&self) -> Option<Arc<dyn CompletionPipeline>> {
        self.generator.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn require_embedder(&self) -> Result<Arc<dyn EmbeddingPipeline>> {
        self.embedder()
            .ok_or(ProviderError::NotInitialized { provider: PROVIDER_NAME })
    }
}

async fn run_blocking<T, F>(job: F) -> Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let output = tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| ProviderError::Model(format!("inference task failed: {e}")))??;
    Ok(output)
}

#[async_trait]
impl TextIntelligenceProvider for LocalProvider {
    async fn initialize(&self) -> bool {
        if self.ready.load(Ordering::Acquire) {
            return true;
        }
        if self
            .initializing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Local provider initialization already in progress");
            return false;
        }
        let _guard = InitGuard(&self.initializing);

        match self.load_pipelines().await {
            Ok(()) => {
                self.ready.store(true, Ordering::Release);
                info!(completion = self.has_completion(), "Local provider initialized");
                true
            }
            Err(err) => {
                warn!("Local provider initialization failed: {err:#}");
                false
            }
        }
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn generate_embeddings(&self, text: &str) -> Result<EmbeddingResult> {
        self.ensure_ready()?;
        let embedder = self.require_embedder()?;

        let started = Instant::now();
        let pipeline = Arc::clone(&embedder);
        let input = text.to_string();
        let embedding = run_blocking(move || pipeline.embed(&input)).await?;

        if embedding.len() != embedder.dimensions() {
            return Err(ProviderError::Model(format!(
                "{} returned {} dimensions, expected {}",
                embedder.model_id(),
                embedding.len(),
                embedder.dimensions()
            )));
        }

        let tokens = estimate_tokens(text);
        self.usage.track(tokens, 0.0);
        debug!(
            model = embedder.model_id(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            tokens,
            "Generated local embedding"
        );

        Ok(EmbeddingResult {
            embedding,
            tokens,
            cost: 0.0,
            model: embedder.model_id().to_string(),
        })
    }

    async fn generate_completion(&self, prompt: &str, max_tokens: usize) -> Result<CompletionResult> {
        self.ensure_ready()?;
        let generator = self.generator().ok_or_else(|| {
            ProviderError::UnsupportedCapability(
                "no local completion model loaded; configure models.completion or switch_model first"
                    .to_string(),
            )
        })?;

        let limit = max_tokens.min(MAX_GENERATED_TOKENS);
        let temperature = self.config().temperature;
        let started = Instant::now();
        let pipeline = Arc::clone(&generator);
        let input = prompt.to_string();
        let generation = run_blocking(move || pipeline.generate(&input, limit, temperature)).await?;

        let tokens = (generation.prompt_tokens + generation.completion_tokens) as u64;
        self.usage.track(tokens, 0.0);
        debug!(
            model = generator.model_id(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            tokens,
            "Generated local completion"
        );

        Ok(CompletionResult {
            text: generation.text,
            tokens,
            cost: 0.0,
            model: generator.model_id().to_string(),
            finish_reason: generation.finish_reason,
        })
    }

    fn provider_info(&self) -> ProviderInfo {
        let mut capabilities = vec![Capability::Embeddings];
        if self.has_completion() {
            capabilities.push(Capability::Completion);
        }
        ProviderInfo {
            name: PROVIDER_NAME.to_string(),
            provider_type: ProviderType::Local,
            capabilities,
            requires_api_key: false,
            cost: CostClass::Free,
            privacy: PrivacyClass::Local,
        }
    }

    fn usage(&self) -> UsageStats {
        self.usage.snapshot()
    }
}
