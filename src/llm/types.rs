//! Universal types for provider interactions.
//!
//! These types isolate callers from specific backend APIs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// A capability a provider can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Embeddings,
    Completion,
    Chat,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Embeddings => "embeddings",
            Self::Completion => "completion",
            Self::Chat => "chat",
        })
    }
}

/// An embedding together with its accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResult {
    pub embedding: Vec<f32>,
    pub tokens: u64,
    /// Cost in USD, never negative
    pub cost: f64,
    pub model: String,
}

impl EmbeddingResult {
    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    #[serde(other)]
    Other,
}

impl FinishReason {
    /// Map a wire value ("stop", "length", "content_filter", ...) onto the enum.
    pub fn from_wire(value: Option<&str>) -> Self {
        match value {
            Some("stop") => Self::Stop,
            Some("length") | Some("max_tokens") => Self::Length,
            Some("content_filter") | Some("content-filter") => Self::ContentFilter,
            _ => Self::Other,
        }
    }
}

/// Generated text together with its accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResult {
    pub text: String,
    pub tokens: u64,
    /// Cost in USD, never negative
    pub cost: f64,
    pub model: String,
    pub finish_reason: FinishReason,
}

/// Which tier of the relevance fallback chain produced a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelevanceMethod {
    /// Server-side scoring (managed cloud)
    Cloud,
    /// Cosine similarity of embeddings
    Embedding,
    /// Query term overlap
    Keyword,
}

/// Relevance of a context passage to a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceScore {
    /// In [0, 1]
    pub score: f32,
    /// In [0, 1]
    pub confidence: f32,
    pub method: RelevanceMethod,
    pub reasoning: String,
}
