//! Relevance scoring shared by every provider.
//!
//! The chain is embedding cosine similarity first and query-term overlap as
//! the last resort. Nothing in here returns an error to the caller.

use std::collections::HashSet;
use tracing::{debug, warn};

use crate::error::{ProviderError, Result};
use crate::llm::provider::TextIntelligenceProvider;
use crate::llm::types::{RelevanceMethod, RelevanceScore};

const EMBEDDING_CONFIDENCE: f32 = 0.8;
const KEYWORD_CONFIDENCE: f32 = 0.5;
const EMPTY_QUERY_CONFIDENCE: f32 = 0.1;

/// Compute the cosine similarity between two vectors.
///
/// Returns a value between -1.0 and 1.0. Zero vectors score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(ProviderError::InvalidResponse(format!(
            "dimension mismatch: expected {}, got {}",
            a.len(),
            b.len()
        )));
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return Ok(0.0);
    }

    Ok(dot_product / (magnitude_a * magnitude_b))
}

/// Lowercased words of `text`; `_` counts as part of a word.
fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Query terms, deduplicated, in order of first appearance.
fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in words(query) {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Fraction of query terms that appear as whole words in the context (case-insensitive).
pub fn keyword_overlap(context: &str, query: &str) -> f32 {
    let terms = query_terms(query);
    if terms.is_empty() {
        return 0.0;
    }

    let context_words: HashSet<String> = words(context).collect();
    let matched = terms
        .iter()
        .filter(|term| context_words.contains(term.as_str()))
        .count();

    matched as f32 / terms.len() as f32
}

/// Last tier of the chain: pure term overlap.
pub fn keyword_relevance(context: &str, query: &str) -> RelevanceScore {
    let terms = query_terms(query);
    let score = keyword_overlap(context, query);
    let confidence = if terms.is_empty() {
        EMPTY_QUERY_CONFIDENCE
    } else {
        KEYWORD_CONFIDENCE
    };

    RelevanceScore {
        score,
        confidence,
        method: RelevanceMethod::Keyword,
        reasoning: format!(
            "Keyword overlap: {} of {} query terms found in context",
            (score * terms.len() as f32).round() as usize,
            terms.len()
        ),
    }
}

/// Embed both texts and compare them; fall back to keywords on any failure.
pub async fn embedding_relevance<P>(provider: &P, context: &str, query: &str) -> RelevanceScore
where
    P: TextIntelligenceProvider + ?Sized,
{
    match embedding_similarity(provider, context, query).await {
        Ok(similarity) => {
            debug!(similarity, "Scored relevance with embeddings");
            RelevanceScore {
                score: similarity.clamp(0.0, 1.0),
                confidence: EMBEDDING_CONFIDENCE,
                method: RelevanceMethod::Embedding,
                reasoning: format!("Cosine similarity of embeddings: {similarity:.3}"),
            }
        }
        Err(err) => {
            warn!("Embedding relevance failed, using keyword overlap: {err}");
            keyword_relevance(context, query)
        }
    }
}

async fn embedding_similarity<P>(provider: &P, context: &str, query: &str) -> Result<f32>
where
    P: TextIntelligenceProvider + ?Sized,
{
    let context_embedding = provider.generate_embeddings(context).await?;
    let query_embedding = provider.generate_embeddings(query).await?;
    let similarity = cosine_similarity(&context_embedding.embedding, &query_embedding.embedding)?;
    if similarity.is_nan() {
        return Err(ProviderError::InvalidResponse("similarity is NaN".to_string()));
    }
    Ok(similarity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 0.0, 0.0];
        let sim = cosine_similarity(&a, &a).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_dimension_mismatch() {
        assert!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn test_keyword_overlap_case_insensitive() {
        let score = keyword_overlap("RUST is great for parsers", "rust parsers");
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_keyword_overlap_partial() {
        let score = keyword_overlap("rust programming", "rust python go golang");
        assert!((score - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_keyword_overlap_matches_whole_words() {
        assert_eq!(keyword_overlap("we trust the build", "rust"), 0.0);
        assert_eq!(keyword_overlap("going further", "go"), 0.0);
        let score = keyword_overlap("snake_case names and go code", "go snake_case");
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_keyword_overlap_dedupes_terms() {
        let score = keyword_overlap("rust", "rust rust python");
        assert!((score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_keyword_relevance_empty_query() {
        let result = keyword_relevance("anything", "   ");
        assert_eq!(result.score, 0.0);
        assert_eq!(result.method, RelevanceMethod::Keyword);
        assert_eq!(result.confidence, EMPTY_QUERY_CONFIDENCE);
    }

    #[test]
    fn test_keyword_relevance_reasoning() {
        let result = keyword_relevance("the cache layer", "cache eviction");
        assert_eq!(result.reasoning, "Keyword overlap: 1 of 2 query terms found in context");
    }
}
