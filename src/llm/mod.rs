//! Provider Layer: interchangeable text-intelligence backends
//!
//! This module handles all interactions with embedding and completion models:
//! - The provider abstraction and shared result types
//! - On-device inference (candle)
//! - Direct OpenAI-compatible API access with cost accounting
//! - The managed cloud service with tiered quotas

pub mod types;
pub mod provider;
pub mod local;
pub mod candle;
pub mod openai;
pub mod pricing;
pub mod cloud;
pub mod tier;

// Re-export key types
pub use types::{Capability, CompletionResult, EmbeddingResult, FinishReason, Message, RelevanceMethod, RelevanceScore, Role};
pub use provider::{CostClass, PrivacyClass, ProviderInfo, TextIntelligenceProvider};
pub use local::{LocalProvider, ModelLoader};
pub use candle::CandleLoader;
pub use openai::OpenAIProvider;
pub use pricing::PriceTable;
pub use cloud::CloudProvider;
pub use tier::{Tier, TierInfo};

use crate::config::{ProviderConfig, ProviderType};

/// System prompt sent with every completion request.
pub const SYSTEM_INSTRUCTION: &str =
    "You are a concise assistant for software project context. Answer directly and stay grounded in the provided text.";

/// Build the backend selected by `config.provider`. Call `initialize()` before use.
pub fn create_provider(config: ProviderConfig) -> Box<dyn TextIntelligenceProvider> {
    match config.provider {
        ProviderType::Local => Box::new(LocalProvider::with_candle(config)),
        ProviderType::OpenAI => Box::new(OpenAIProvider::new(config)),
        ProviderType::Cloud => Box::new(CloudProvider::new(config)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_provider_matches_type() {
        let cases = [
            (ProviderConfig::local(), ProviderType::Local),
            (ProviderConfig::openai("sk"), ProviderType::OpenAI),
            (ProviderConfig::cloud("key"), ProviderType::Cloud),
        ];
        for (config, expected) in cases {
            let provider = create_provider(config);
            assert_eq!(provider.provider_info().provider_type, expected);
            assert!(!provider.is_ready());
        }
    }
}
