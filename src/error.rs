//! Error types for the provider layer.

use crate::llm::tier::Tier;
use thiserror::Error;

/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors surfaced by providers.
///
/// Initialization failures are never represented here: `initialize()` reports
/// them as `false` and logs the cause.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Embed/complete called before a successful `initialize()`.
    #[error("{provider} provider not initialized. Call initialize() first.")]
    NotInitialized { provider: &'static str },

    /// The capability or model is not available on this provider.
    #[error("unsupported capability: {0}")]
    UnsupportedCapability(String),

    /// Network failure or non-success response from a hosted service.
    #[error("{provider} API error: {message}")]
    Remote {
        provider: &'static str,
        status: Option<u16>,
        message: String,
    },

    /// Feature gated behind a higher subscription tier.
    #[error("{feature} requires the {required} tier or higher (current tier: {current}). Upgrade required.")]
    TierRestriction {
        feature: &'static str,
        current: Tier,
        required: Tier,
    },

    /// Local model inference failed.
    #[error("model error: {0}")]
    Model(String),

    /// Response could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Wrap a transport error with the provider prefix.
    pub fn transport(provider: &'static str, err: reqwest::Error) -> Self {
        Self::Remote {
            provider,
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }

    /// Whether a retry has a chance of succeeding.
    ///
    /// Network failures, rate limits and server errors are transient.
    /// Everything else (bad credentials, gating, precondition violations) is not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Remote { status: None, .. } => true,
            Self::Remote {
                status: Some(code), ..
            } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

impl From<anyhow::Error> for ProviderError {
    fn from(err: anyhow::Error) -> Self {
        Self::Model(format!("{err:#}"))
    }
}
