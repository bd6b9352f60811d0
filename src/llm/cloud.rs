//! Managed cloud provider.
//!
//! Talks to the subscription REST service. Every response is wrapped in a
//! [`CloudEnvelope`]; usage is billed by subscription so per-request cost is 0.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};

use super::provider::{CostClass, PrivacyClass, ProviderInfo, TextIntelligenceProvider};
use super::tier::{require_tier, Limit, Tier, TierInfo};
use super::types::{
    Capability, CompletionResult, EmbeddingResult, FinishReason, RelevanceMethod, RelevanceScore,
};
use crate::config::{ProviderConfig, ProviderType};
use crate::error::{ProviderError, Result};
use crate::relevance::embedding_relevance;
use crate::retry::{with_retry_if, RetryPolicy};
use crate::usage::{estimate_tokens, UsageStats, UsageTracker};

const PROVIDER_NAME: &str = "Cloud";
const CLOUD_API_URL: &str = "https://api.textintel.cloud/v1";
/// Returned by `upgrade_url` when the service can't be reached
pub const BILLING_URL: &str = "https://textintel.cloud/billing";
const CLIENT_VERSION: &str = concat!("textintel-rs/", env!("CARGO_PKG_VERSION"));

/// Standard wrapper of every managed-service response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    /// Informational; a malformed snapshot is dropped rather than failing the response
    #[serde(default, deserialize_with = "lenient_snapshot")]
    pub usage: Option<UsageSnapshot>,
}

/// Account usage reported alongside a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    #[serde(default)]
    pub tokens_used: Option<u64>,
    #[serde(default)]
    pub requests_remaining: Option<Limit>,
    #[serde(default)]
    pub reset_time: Option<DateTime<Utc>>,
}

fn lenient_snapshot<'de, D>(deserializer: D) -> std::result::Result<Option<UsageSnapshot>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(value) = Option::<serde_json::Value>::deserialize(deserializer)? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(err) => {
            debug!("Ignoring malformed usage snapshot: {err}");
            Ok(None)
        }
    }
}

/// Quota status from `/usage/check-limits`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitStatus {
    pub within_limits: bool,
    pub tokens_remaining: i64,
    pub requests_remaining: i64,
    pub reset_time: Option<DateTime<Utc>>,
}

/// Account-level usage for the current billing period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageAnalytics {
    pub tokens_used: u64,
    pub request_count: u64,
    #[serde(default)]
    pub period_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub period_end: Option<DateTime<Utc>>,
}

/// A context shared with the caller's team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamContext {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub shared_by: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

pub struct CloudProvider {
    client: Client,
    base_url: String,
    config: ProviderConfig,
    retry: RetryPolicy,
    tier: RwLock<Tier>,
    ready: AtomicBool,
    usage: UsageTracker,
}

impl CloudProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or(CLOUD_API_URL)
            .trim_end_matches('/')
            .to_string();

        Self {
            client: Client::new(),
            base_url,
            retry: config.retry.policy(),
            config,
            tier: RwLock::new(Tier::default()),
            ready: AtomicBool::new(false),
            usage: UsageTracker::new(),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Account tier, as reported at initialization.
    pub fn tier(&self) -> Tier {
        *self.tier.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tier_info(&self) -> TierInfo {
        self.tier().info()
    }

    /// Share a context with the team. Requires the pro tier.
    pub async fn share_context(&self, name: &str, content: &str) -> Result<String> {
        require_tier("Team sharing", self.tier(), Tier::Pro)?;
        self.ensure_ready()?;

        let shared: SharedData = self
            .execute(self.post("team/share").json(&ShareRequest { name, content }))
            .await?;
        info!(id = %shared.id, "Shared context with team");
        Ok(shared.id)
    }

    /// Contexts shared by teammates. Requires the pro tier.
    pub async fn team_contexts(&self) -> Result<Vec<TeamContext>> {
        require_tier("Team sharing", self.tier(), Tier::Pro)?;
        self.ensure_ready()?;

        let data: TeamContextsData = self.execute(self.get("team/contexts")).await?;
        Ok(data.contexts)
    }

    /// Where to upgrade the subscription. Falls back to the billing page.
    pub async fn upgrade_url(&self) -> String {
        match self.execute::<UpgradeData>(self.get("billing/upgrade")).await {
            Ok(data) => data.url,
            Err(err) => {
                debug!("Upgrade URL lookup failed: {err}");
                BILLING_URL.to_string()
            }
        }
    }

    pub async fn optimization_suggestions(&self) -> Vec<String> {
        match self
            .execute::<OptimizationData>(self.get("analytics/optimization"))
            .await
        {
            Ok(data) => data.suggestions,
            Err(err) => {
                debug!("Optimization suggestions unavailable: {err}");
                Vec::new()
            }
        }
    }

    pub async fn usage_analytics(&self) -> Option<UsageAnalytics> {
        self.execute(self.get("analytics/usage"))
            .await
            .map_err(|err| debug!("Usage analytics unavailable: {err}"))
            .ok()
    }

    pub async fn check_limits(&self) -> Option<LimitStatus> {
        self.execute(self.get("usage/check-limits"))
            .await
            .map_err(|err| debug!("Limit check unavailable: {err}"))
            .ok()
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.ready.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ProviderError::NotInitialized { provider: PROVIDER_NAME })
        }
    }

    fn get(&self, endpoint: &str) -> RequestBuilder {
        self.authorized(self.client.get(format!("{}/{endpoint}", self.base_url)))
    }

    fn post(&self, endpoint: &str) -> RequestBuilder {
        self.authorized(self.client.post(format!("{}/{endpoint}", self.base_url)))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header("X-Client-Version", CLIENT_VERSION);
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key.expose()),
            None => builder,
        }
    }

    /// Send, then unwrap the envelope into its `data`.
    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER_NAME, e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<CloudEnvelope<serde_json::Value>>(&error_text)
                .ok()
                .and_then(|envelope| envelope.error)
                .unwrap_or_else(|| format!("{status}: {error_text}"));
            return Err(ProviderError::Remote {
                provider: PROVIDER_NAME,
                status: Some(status.as_u16()),
                message,
            });
        }

        let envelope: CloudEnvelope<T> = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("{PROVIDER_NAME}: {e}")))?;

        if let Some(usage) = &envelope.usage {
            debug!(
                tokens_used = ?usage.tokens_used,
                requests_remaining = ?usage.requests_remaining,
                "Cloud account usage"
            );
        }

        if !envelope.success {
            return Err(ProviderError::Remote {
                provider: PROVIDER_NAME,
                status: Some(status.as_u16()),
                message: envelope
                    .error
                    .unwrap_or_else(|| "request failed".to_string()),
            });
        }

        envelope
            .data
            .ok_or_else(|| ProviderError::InvalidResponse("Missing data in cloud response".to_string()))
    }
}

/// A 429 from the managed service means a monthly quota is spent, so only
/// network failures and server errors are retried.
fn is_retryable(err: &ProviderError) -> bool {
    err.is_transient() && !matches!(err, ProviderError::Remote { status: Some(429), .. })
}

#[async_trait]
impl TextIntelligenceProvider for CloudProvider {
    async fn initialize(&self) -> bool {
        if self.ready.load(Ordering::Acquire) {
            return true;
        }
        if self.config.api_key.is_none() {
            warn!("Cloud provider initialization failed: API key is required");
            return false;
        }

        match self.execute::<AuthData>(self.get("auth/validate")).await {
            Ok(auth) => {
                *self.tier.write().unwrap_or_else(PoisonError::into_inner) = auth.tier;
                self.ready.store(true, Ordering::Release);
                info!(tier = %auth.tier, "Cloud provider initialized");
                true
            }
            Err(err) => {
                warn!("Cloud provider initialization failed: {err}");
                false
            }
        }
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn generate_embeddings(&self, text: &str) -> Result<EmbeddingResult> {
        self.ensure_ready()?;
        let model = &self.config.models.embeddings;
        let request = EmbedRequest { text, model };

        let data: EmbedData = with_retry_if(&self.retry, is_retryable, || {
            self.execute(self.post("ai/embeddings").json(&request))
        })
        .await?;

        let tokens = data.tokens.unwrap_or_else(|| estimate_tokens(text));
        self.usage.track(tokens, 0.0);

        Ok(EmbeddingResult {
            embedding: data.embedding,
            tokens,
            cost: 0.0,
            model: data.model.unwrap_or_else(|| model.clone()),
        })
    }

    async fn generate_completion(&self, prompt: &str, max_tokens: usize) -> Result<CompletionResult> {
        self.ensure_ready()?;
        let model = self.config.models.completion_model().unwrap_or("auto");
        let request = CompletionRequest {
            prompt,
            model,
            max_tokens,
            temperature: self.config.temperature,
        };

        let data: CompletionData = with_retry_if(&self.retry, is_retryable, || {
            self.execute(self.post("ai/completion").json(&request))
        })
        .await?;

        let tokens = data.tokens.unwrap_or_else(|| estimate_tokens(prompt));
        self.usage.track(tokens, 0.0);

        Ok(CompletionResult {
            text: data.text,
            tokens,
            cost: 0.0,
            model: data.model.unwrap_or_else(|| model.to_string()),
            finish_reason: FinishReason::from_wire(data.finish_reason.as_deref()),
        })
    }

    /// Managed scoring, then embeddings, then keyword overlap.
    async fn score_relevance(&self, context: &str, query: &str) -> RelevanceScore {
        if self.is_ready() {
            let request = RelevanceRequest { context, query };
            match self
                .execute::<RelevanceData>(self.post("ai/relevance").json(&request))
                .await
            {
                Ok(data) => {
                    return RelevanceScore {
                        score: data.score.clamp(0.0, 1.0),
                        confidence: data.confidence.unwrap_or(0.9).clamp(0.0, 1.0),
                        method: RelevanceMethod::Cloud,
                        reasoning: data
                            .reasoning
                            .unwrap_or_else(|| "Scored by managed relevance service".to_string()),
                    }
                }
                Err(err) => warn!("Cloud relevance scoring failed, falling back: {err}"),
            }
        }

        embedding_relevance(self, context, query).await
    }

    fn provider_info(&self) -> ProviderInfo {
        ProviderInfo {
            name: PROVIDER_NAME.to_string(),
            provider_type: ProviderType::Cloud,
            capabilities: vec![Capability::Embeddings, Capability::Completion],
            requires_api_key: true,
            cost: CostClass::Subscription,
            privacy: PrivacyClass::Managed,
        }
    }

    fn usage(&self) -> UsageStats {
        self.usage.snapshot()
    }
}

// Wire types

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    text: &'a str,
    model: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionRequest<'a> {
    prompt: &'a str,
    model: &'a str,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Serialize)]
struct RelevanceRequest<'a> {
    context: &'a str,
    query: &'a str,
}

#[derive(Serialize)]
struct ShareRequest<'a> {
    name: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct AuthData {
    tier: Tier,
}

#[derive(Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
    tokens: Option<u64>,
    model: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompletionData {
    text: String,
    tokens: Option<u64>,
    model: Option<String>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct RelevanceData {
    score: f32,
    confidence: Option<f32>,
    reasoning: Option<String>,
}

#[derive(Deserialize)]
struct SharedData {
    id: String,
}

#[derive(Deserialize)]
struct TeamContextsData {
    contexts: Vec<TeamContext>,
}

#[derive(Deserialize)]
struct UpgradeData {
    url: String,
}

#[derive(Deserialize)]
struct OptimizationData {
    suggestions: Vec<String>,
}
