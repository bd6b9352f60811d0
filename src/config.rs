//! Provider configuration
//!
//! Handles backend selection, model identifiers and persistence of the
//! configuration file (~/.textintel/config.toml).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Environment variable overriding the credential
pub const ENV_API_KEY: &str = "TEXTINTEL_API_KEY";
/// Environment variable overriding the endpoint
pub const ENV_BASE_URL: &str = "TEXTINTEL_BASE_URL";
/// Environment variable overriding the provider type
pub const ENV_PROVIDER: &str = "TEXTINTEL_PROVIDER";

/// Which backend a configuration targets
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// On-device models, no network
    #[default]
    Local,
    /// Direct OpenAI-compatible API account
    OpenAI,
    /// Managed cloud subscription
    Cloud,
}

impl ProviderType {
    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::OpenAI => "openai",
            Self::Cloud => "cloud",
        }
    }

    /// Parse from a config/env string
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "local" => Some(Self::Local),
            "openai" => Some(Self::OpenAI),
            "cloud" => Some(Self::Cloud),
            _ => None,
        }
    }
}

/// Opaque bearer credential. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key, for building request headers only
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Model identifier per capability
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSet {
    pub embeddings: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat: Option<String>,
}

impl ModelSet {
    /// Default models for a provider type
    pub fn for_provider(provider: ProviderType) -> Self {
        match provider {
            ProviderType::Local => Self {
                embeddings: crate::catalog::DEFAULT_EMBEDDING_MODEL.to_string(),
                completion: None,
                chat: None,
            },
            ProviderType::OpenAI => Self {
                embeddings: "text-embedding-3-small".to_string(),
                completion: Some("gpt-4o-mini".to_string()),
                chat: Some("gpt-4o-mini".to_string()),
            },
            ProviderType::Cloud => Self {
                embeddings: "auto".to_string(),
                completion: Some("auto".to_string()),
                chat: None,
            },
        }
    }

    /// Model used for completions: the completion model, else the chat model
    pub fn completion_model(&self) -> Option<&str> {
        self.completion.as_deref().or(self.chat.as_deref())
    }
}

impl Default for ModelSet {
    fn default() -> Self {
        Self::for_provider(ProviderType::Local)
    }
}

/// Retry settings for network-backed providers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawProviderConfig")]
pub struct ProviderConfig {
    /// Backend to construct
    pub provider: ProviderType,
    /// Credential, required for non-local backends
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<ApiKey>,
    /// Endpoint override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Model identifiers per capability
    pub models: ModelSet,
    /// Sampling temperature
    pub temperature: f32,
    /// Retry behaviour for remote calls
    pub retry: RetryConfig,
    /// Version of config schema (for future migrations)
    pub version: u32,
}

/// On-disk shape; a missing `models` table takes the provider's defaults
#[derive(Deserialize)]
struct RawProviderConfig {
    #[serde(default)]
    provider: ProviderType,
    #[serde(default)]
    api_key: Option<ApiKey>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    models: Option<ModelSet>,
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(default)]
    retry: RetryConfig,
    #[serde(default = "default_version")]
    version: u32,
}

impl From<RawProviderConfig> for ProviderConfig {
    fn from(raw: RawProviderConfig) -> Self {
        Self {
            models: raw.models.unwrap_or_else(|| ModelSet::for_provider(raw.provider)),
            provider: raw.provider,
            api_key: raw.api_key,
            base_url: raw.base_url,
            temperature: raw.temperature,
            retry: raw.retry,
            version: raw.version,
        }
    }
}

fn default_temperature() -> f32 {
    0.7
}

fn default_version() -> u32 {
    1
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::for_provider(ProviderType::Local)
    }
}

impl ProviderConfig {
    /// Defaults for the given backend
    pub fn for_provider(provider: ProviderType) -> Self {
        Self {
            provider,
            api_key: None,
            base_url: None,
            models: ModelSet::for_provider(provider),
            temperature: default_temperature(),
            retry: RetryConfig::default(),
            version: default_version(),
        }
    }

    /// On-device configuration
    pub fn local() -> Self {
        Self::for_provider(ProviderType::Local)
    }

    /// Direct API configuration
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::for_provider(ProviderType::OpenAI).with_api_key(api_key)
    }

    /// Managed cloud configuration
    pub fn cloud(api_key: impl Into<String>) -> Self {
        Self::for_provider(ProviderType::Cloud).with_api_key(api_key)
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(ApiKey::new(key));
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.models.embeddings = model.into();
        self
    }

    pub fn with_completion_model(mut self, model: impl Into<String>) -> Self {
        self.models.completion = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Get the default config file path (~/.textintel/config.toml)
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".textintel").join("config.toml"))
    }

    /// Load config from the default path, or None if it doesn't exist
    pub fn load() -> Result<Option<Self>> {
        Self::load_from(&Self::default_path()?)
    }

    /// Load config from disk, or return None if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .context("Failed to parse config file")?;
        Ok(Some(config))
    }

    /// Save config to disk
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;
        std::fs::write(path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Overlay TEXTINTEL_* environment variables
    pub fn apply_env(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(provider) = lookup(ENV_PROVIDER).as_deref().and_then(ProviderType::parse) {
            if provider != self.provider {
                self.models = ModelSet::for_provider(provider);
            }
            self.provider = provider;
        }
        if let Some(key) = lookup(ENV_API_KEY).filter(|k| !k.is_empty()) {
            self.api_key = Some(ApiKey::new(key));
        }
        if let Some(url) = lookup(ENV_BASE_URL).filter(|u| !u.is_empty()) {
            self.base_url = Some(url);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProviderConfig::default();
        assert_eq!(config.provider, ProviderType::Local);
        assert_eq!(config.models.embeddings, crate::catalog::DEFAULT_EMBEDDING_MODEL);
        assert!(config.models.completion.is_none());
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_api_key_redacted_in_debug() {
        let config = ProviderConfig::openai("sk-secret-value");
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret-value"));
        assert!(debug.contains("ApiKey(***)"));
    }

    #[test]
    fn test_config_serialization() {
        let config = ProviderConfig::openai("sk-test").with_base_url("http://localhost:9000");
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: ProviderConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.provider, ProviderType::OpenAI);
        assert_eq!(parsed.api_key, config.api_key);
        assert_eq!(parsed.models, config.models);
        assert_eq!(parsed.base_url.as_deref(), Some("http://localhost:9000"));
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let parsed: ProviderConfig = toml::from_str("provider = \"cloud\"").unwrap();
        assert_eq!(parsed.provider, ProviderType::Cloud);
        assert_eq!(parsed.temperature, 0.7);
        assert_eq!(parsed.retry, RetryConfig::default());
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.models, ModelSet::for_provider(ProviderType::Cloud));
    }

    #[test]
    fn test_missing_models_follow_provider() {
        let parsed: ProviderConfig = toml::from_str("provider = \"openai\"\napi_key = \"sk\"").unwrap();
        assert_eq!(parsed.models.embeddings, "text-embedding-3-small");
        assert_eq!(parsed.models.completion_model(), Some("gpt-4o-mini"));

        let parsed: ProviderConfig = toml::from_str("").unwrap();
        assert_eq!(parsed.provider, ProviderType::Local);
        assert_eq!(parsed.models.embeddings, crate::catalog::DEFAULT_EMBEDDING_MODEL);
    }

    #[test]
    fn test_explicit_models_kept() {
        let toml_str = "provider = \"openai\"\n[models]\nembeddings = \"text-embedding-3-large\"\n";
        let parsed: ProviderConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(parsed.models.embeddings, "text-embedding-3-large");
        assert!(parsed.models.completion.is_none());
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = ProviderConfig::load_from(&dir.path().join("nope.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = ProviderConfig::cloud("key-123").with_temperature(0.2);
        config.save_to(&path).unwrap();

        let loaded = ProviderConfig::load_from(&path).unwrap().unwrap();
        assert_eq!(loaded.provider, ProviderType::Cloud);
        assert_eq!(loaded.temperature, 0.2);
        assert_eq!(loaded.api_key.unwrap().expose(), "key-123");
    }

    #[test]
    fn test_env_overrides() {
        let config = ProviderConfig::local().apply_overrides(|key| match key {
            ENV_PROVIDER => Some("openai".to_string()),
            ENV_API_KEY => Some("sk-env".to_string()),
            _ => None,
        });
        assert_eq!(config.provider, ProviderType::OpenAI);
        assert_eq!(config.models.embeddings, "text-embedding-3-small");
        assert_eq!(config.api_key.unwrap().expose(), "sk-env");
        assert!(config.base_url.is_none());
    }

    #[test]
    fn test_completion_model_falls_back_to_chat() {
        let models = ModelSet {
            embeddings: "e".to_string(),
            completion: None,
            chat: Some("chat-model".to_string()),
        };
        assert_eq!(models.completion_model(), Some("chat-model"));
    }
}
