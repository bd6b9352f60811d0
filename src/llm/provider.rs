//! The Provider Abstraction.
//!
//! This trait defines the standard interface for every backend, whether it
//! runs models on-device, calls a hosted API directly, or goes through the
//! managed cloud service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::types::{Capability, CompletionResult, EmbeddingResult, RelevanceScore};
use crate::config::ProviderType;
use crate::error::Result;
use crate::relevance::embedding_relevance;
use crate::usage::UsageStats;

/// Coarse pricing model of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostClass {
    Free,
    PayPerUse,
    Subscription,
}

/// Where the text goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyClass {
    /// Never leaves the machine
    Local,
    /// Sent to a third-party API
    Api,
    /// Sent to the managed service
    Managed,
}

/// Static metadata about a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub provider_type: ProviderType,
    pub capabilities: Vec<Capability>,
    pub requires_api_key: bool,
    pub cost: CostClass,
    pub privacy: PrivacyClass,
}

/// The core trait for text-intelligence backends.
#[async_trait]
pub trait TextIntelligenceProvider: Send + Sync {
    /// Backend setup. Returns false (and logs why) instead of failing.
    async fn initialize(&self) -> bool;

    /// Whether `initialize()` has succeeded.
    fn is_ready(&self) -> bool;

    /// Embed a piece of text.
    async fn generate_embeddings(&self, text: &str) -> Result<EmbeddingResult>;

    /// Generate text for a prompt. Backends may clamp `max_tokens`.
    async fn generate_completion(&self, prompt: &str, max_tokens: usize) -> Result<CompletionResult>;

    /// Score how relevant `context` is to `query`. Never fails.
    async fn score_relevance(&self, context: &str, query: &str) -> RelevanceScore {
        embedding_relevance(self, context, query).await
    }

    fn provider_info(&self) -> ProviderInfo;

    /// Cumulative usage of this instance.
    fn usage(&self) -> UsageStats;
}
