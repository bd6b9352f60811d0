//! Hosted model catalog and price table.
//!
//! Prices are USD per million tokens, as published. Bump `PRICING_VERSION`
//! whenever a price changes.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::LazyLock;

use super::types::Capability;

pub const PRICING_VERSION: &str = "2024-08";

/// Price used for models missing from the table
pub const DEFAULT_PRICE_PER_MILLION: f64 = 1.0;

/// Qualitative performance tier of a hosted model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceTier {
    Fast,
    Balanced,
    Premium,
}

/// Static facts about one hosted model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub capability: Capability,
    pub context_window: usize,
    pub price_per_million: f64,
    pub performance: PerformanceTier,
    pub recommended: bool,
}

impl ModelInfo {
    pub fn new(
        id: &str,
        capability: Capability,
        context_window: usize,
        price_per_million: f64,
        performance: PerformanceTier,
        recommended: bool,
    ) -> Self {
        Self {
            id: id.to_string(),
            capability,
            context_window,
            price_per_million,
            performance,
            recommended,
        }
    }
}

/// Versioned, immutable model catalog with per-token pricing.
#[derive(Debug, Clone)]
pub struct PriceTable {
    version: String,
    models: HashMap<String, ModelInfo>,
    default_price_per_million: f64,
}

static BUILTIN: LazyLock<PriceTable> = LazyLock::new(|| {
    use Capability::{Completion, Embeddings};
    use PerformanceTier::{Balanced, Fast, Premium};

    PriceTable::new(
        PRICING_VERSION,
        vec![
            ModelInfo::new("text-embedding-3-small", Embeddings, 8_191, 0.02, Fast, true),
            ModelInfo::new("text-embedding-3-large", Embeddings, 8_191, 0.13, Premium, false),
            ModelInfo::new("text-embedding-ada-002", Embeddings, 8_191, 0.10, Balanced, false),
            ModelInfo::new("gpt-4o-mini", Completion, 128_000, 0.15, Fast, true),
            ModelInfo::new("gpt-4o", Completion, 128_000, 2.50, Premium, false),
            ModelInfo::new("gpt-4-turbo", Completion, 128_000, 10.0, Premium, false),
            ModelInfo::new("gpt-3.5-turbo", Completion, 16_385, 0.50, Balanced, false),
        ],
    )
});

impl PriceTable {
    pub fn new(version: impl Into<String>, models: Vec<ModelInfo>) -> Self {
        Self {
            version: version.into(),
            models: models.into_iter().map(|m| (m.id.clone(), m)).collect(),
            default_price_per_million: DEFAULT_PRICE_PER_MILLION,
        }
    }

    /// The published table shipped with this crate.
    pub fn builtin() -> &'static PriceTable {
        &BUILTIN
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn get(&self, model: &str) -> Option<&ModelInfo> {
        self.models.get(model)
    }

    /// USD per token; unknown models use the conservative default.
    pub fn price_per_token(&self, model: &str) -> f64 {
        let per_million = self
            .get(model)
            .map_or(self.default_price_per_million, |m| m.price_per_million);
        per_million / 1_000_000.0
    }

    pub fn cost(&self, model: &str, tokens: u64) -> f64 {
        tokens as f64 * self.price_per_token(model)
    }

    /// Models sorted by capability then price.
    pub fn models(&self) -> Vec<&ModelInfo> {
        let mut models: Vec<&ModelInfo> = self.models.values().collect();
        models.sort_by(|a, b| {
            (a.capability as u8)
                .cmp(&(b.capability as u8))
                .then(a.price_per_million.total_cmp(&b.price_per_million))
        });
        models
    }

    pub fn models_for(&self, capability: Capability) -> Vec<&ModelInfo> {
        self.models()
            .into_iter()
            .filter(|m| m.capability == capability)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_price_per_token() {
        let table = PriceTable::builtin();
        let price = table.price_per_token("text-embedding-3-small");
        assert!((price - 0.00000002).abs() < 1e-15);
    }

    #[test]
    fn test_unknown_model_uses_default() {
        let table = PriceTable::builtin();
        assert!(table.get("mystery-model").is_none());
        assert!((table.price_per_token("mystery-model") - 0.000001).abs() < 1e-15);
    }

    #[test]
    fn test_cost_is_tokens_times_price() {
        let table = PriceTable::builtin();
        let cost = table.cost("gpt-4o-mini", 2_000_000);
        assert!((cost - 0.30).abs() < 1e-9);
    }

    #[test]
    fn test_models_sorted_by_capability_then_price() {
        let table = PriceTable::builtin();
        let embeddings = table.models_for(Capability::Embeddings);
        assert_eq!(embeddings.len(), 3);
        assert_eq!(embeddings[0].id, "text-embedding-3-small");
        assert!(table.models()[0].capability == Capability::Embeddings);
    }

    #[test]
    fn test_custom_table() {
        let table = PriceTable::new(
            "test",
            vec![ModelInfo::new("cheap-embed-v1", Capability::Embeddings, 512, 0.02, PerformanceTier::Fast, true)],
        );
        assert_eq!(table.version(), "test");
        assert!((table.cost("cheap-embed-v1", 10) - 0.0000002).abs() < 1e-15);
    }
}
