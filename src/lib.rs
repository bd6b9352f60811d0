//! textintel: pluggable text-intelligence providers
//!
//! One contract for embeddings, completions and relevance scoring, served by
//! on-device models, a direct OpenAI-compatible account, or the managed cloud.
//! Logging goes through `tracing`; install a subscriber to see it.

pub mod catalog;
pub mod config;
pub mod embed;
pub mod error;
pub mod llm;
pub mod relevance;
pub mod retry;
pub mod usage;

pub use config::{ApiKey, ModelSet, ProviderConfig, ProviderType, RetryConfig};
pub use error::{ProviderError, Result};
pub use llm::{
    create_provider, Capability, CloudProvider, CompletionResult, EmbeddingResult, LocalProvider,
    OpenAIProvider, ProviderInfo, RelevanceMethod, RelevanceScore, TextIntelligenceProvider, Tier,
};
pub use retry::{with_retry, with_retry_if, RetryPolicy};
pub use usage::{UsageStats, UsageTracker};
