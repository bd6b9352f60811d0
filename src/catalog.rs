//! On-device model catalog
//!
//! The whitelist of models the local provider may load, with static metadata.
//! Bump `CATALOG_VERSION` whenever entries change.

use serde::Serialize;

use crate::llm::types::Capability;

/// Version of the model whitelist
pub const CATALOG_VERSION: u32 = 1;

/// Embedding model used when none is configured
pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Relative inference speed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedClass {
    Fast,
    Medium,
    Slow,
}

/// Relative output quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityClass {
    Good,
    Better,
    Best,
}

/// Model family, decides how weights are loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Bert,
    Phi3,
}

/// Catalog entry for one local model
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LocalModel {
    /// HuggingFace model ID
    pub id: &'static str,
    pub capability: Capability,
    pub architecture: Architecture,
    /// Embedding dimensions (embedding models only)
    pub dimensions: Option<usize>,
    /// Approximate download size in MB
    pub size_mb: u32,
    pub speed: SpeedClass,
    pub quality: QualityClass,
}

const CATALOG: &[LocalModel] = &[
    LocalModel {
        id: "sentence-transformers/all-MiniLM-L6-v2",
        capability: Capability::Embeddings,
        architecture: Architecture::Bert,
        dimensions: Some(384),
        size_mb: 86,
        speed: SpeedClass::Fast,
        quality: QualityClass::Good,
    },
    LocalModel {
        id: "sentence-transformers/all-MiniLM-L12-v2",
        capability: Capability::Embeddings,
        architecture: Architecture::Bert,
        dimensions: Some(384),
        size_mb: 134,
        speed: SpeedClass::Medium,
        quality: QualityClass::Better,
    },
    LocalModel {
        id: "BAAI/bge-small-en-v1.5",
        capability: Capability::Embeddings,
        architecture: Architecture::Bert,
        dimensions: Some(384),
        size_mb: 134,
        speed: SpeedClass::Fast,
        quality: QualityClass::Better,
    },
    LocalModel {
        id: "BAAI/bge-base-en-v1.5",
        capability: Capability::Embeddings,
        architecture: Architecture::Bert,
        dimensions: Some(768),
        size_mb: 418,
        speed: SpeedClass::Slow,
        quality: QualityClass::Best,
    },
    LocalModel {
        id: "microsoft/Phi-3-mini-4k-instruct",
        capability: Capability::Completion,
        architecture: Architecture::Phi3,
        dimensions: None,
        size_mb: 7_640,
        speed: SpeedClass::Slow,
        quality: QualityClass::Best,
    },
    LocalModel {
        id: "microsoft/Phi-3-mini-128k-instruct",
        capability: Capability::Completion,
        architecture: Architecture::Phi3,
        dimensions: None,
        size_mb: 7_640,
        speed: SpeedClass::Slow,
        quality: QualityClass::Best,
    },
];

/// Whitelist lookup; `None` for anything not in the catalog.
pub fn find(id: &str) -> Option<&'static LocalModel> {
    CATALOG.iter().find(|m| m.id == id)
}

/// Metadata for a model, with conservative placeholders for unknown IDs.
pub fn lookup(id: &str) -> LocalModel {
    find(id).copied().unwrap_or(LocalModel {
        id: "unknown",
        capability: Capability::Embeddings,
        architecture: Architecture::Bert,
        dimensions: Some(384),
        size_mb: 100,
        speed: SpeedClass::Medium,
        quality: QualityClass::Good,
    })
}

/// Whether `id` may be loaded for `capability`.
///
/// Chat requests are served by completion models.
pub fn is_allowed(capability: Capability, id: &str) -> bool {
    let wanted = match capability {
        Capability::Chat => Capability::Completion,
        other => other,
    };
    find(id).is_some_and(|m| m.capability == wanted)
}

/// All whitelisted models for a capability.
pub fn models_for(capability: Capability) -> Vec<&'static LocalModel> {
    let wanted = match capability {
        Capability::Chat => Capability::Completion,
        other => other,
    };
    CATALOG.iter().filter(|m| m.capability == wanted).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_metadata() {
        let model = lookup("BAAI/bge-base-en-v1.5");
        assert_eq!(model.dimensions, Some(768));
        assert_eq!(model.size_mb, 418);
        assert_eq!(model.architecture, Architecture::Bert);
    }

    #[test]
    fn test_default_model_is_whitelisted() {
        assert!(is_allowed(Capability::Embeddings, DEFAULT_EMBEDDING_MODEL));
    }

    #[test]
    fn test_unknown_model_gets_placeholder() {
        let model = lookup("someone/custom-model");
        assert_eq!(model.id, "unknown");
        assert_eq!(model.dimensions, Some(384));
        assert_eq!(model.speed, SpeedClass::Medium);
    }

    #[test]
    fn test_whitelist_is_per_capability() {
        assert!(!is_allowed(Capability::Completion, DEFAULT_EMBEDDING_MODEL));
        assert!(is_allowed(Capability::Completion, "microsoft/Phi-3-mini-4k-instruct"));
        assert!(is_allowed(Capability::Chat, "microsoft/Phi-3-mini-4k-instruct"));
        assert!(!is_allowed(Capability::Embeddings, "Xenova/unknown"));
    }

    #[test]
    fn test_models_for() {
        assert_eq!(models_for(Capability::Embeddings).len(), 4);
        assert_eq!(models_for(Capability::Completion).len(), 2);
        assert!(models_for(Capability::Embeddings)
            .iter()
            .all(|m| m.dimensions.is_some()));
    }
}
