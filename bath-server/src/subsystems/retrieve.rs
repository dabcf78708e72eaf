//! Retrieval subsystem: query text to ranked design images
//!
//! - Splits "A but not B" queries when negation is enabled
//! - Embeds the positive (and negative) part with the query task type
//! - Scores every dataset image by cosine similarity
//! - Re-ranks by `positive - penalty_weight * negative` if there is a negative part
//! - Returns the top-K images, highest score first, ties in dataset order

use bath_core::config::RetrievalConfig;
use bath_core::embeddings::{validate_input, EmbeddingBackend};
use bath_core::{parse_query, rank, scores, top_k, Dataset, RetrievedImage, SearchError};
use serde::{Deserialize, Serialize};

/// Search response data structure
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<RetrievedImage>,
    pub query: String,
    pub count: usize,
}

/// Resolve the requested K: missing means `default_k`, and the result is
/// clamped to `[1, max_k]`.
pub fn resolve_k(k: Option<u32>, config: &RetrievalConfig) -> usize {
    let max_k = config.max_k.max(1);
    k.unwrap_or(config.default_k).clamp(1, max_k) as usize
}

/// `positive[i] - weight * negative[i]`
pub fn combine_scores(positive: &[f32], negative: &[f32], weight: f32) -> Vec<f32> {
    positive
        .iter()
        .zip(negative)
        .map(|(p, n)| p - weight * n)
        .collect()
}

/// Plain top-`k` retrieval: embed `query`, rank by cosine similarity.
///
/// No negation split, clamping or score floor. `k == 0` is
/// `RetrievalError::InvalidTopK`; a dataset smaller than `k` returns every image.
pub async fn retrieve(
    query: &str,
    k: usize,
    dataset: &Dataset,
    backend: &dyn EmbeddingBackend,
) -> Result<Vec<RetrievedImage>, SearchError> {
    validate_input(query)?;
    let vector = backend.embed_query(query.trim()).await?;
    let ranked = top_k(&vector, dataset.embeddings(), k)?;
    Ok(ranked
        .into_iter()
        .enumerate()
        .map(|(i, s)| RetrievedImage::from_image(&dataset.images[s.index], i + 1, s.score))
        .collect())
}

/// Retrieve the `k` dataset images most similar to `query`.
///
/// # Constraints
/// * Empty or whitespace-only query is an `EmbeddingError::EmptyInput`
/// * `k` is resolved with [`resolve_k`]
/// * Without a negative part, scores are plain cosine similarity in [-1, 1]
/// * With a negative part, scores lie in [-1 - w, 1 + w]
/// * `min_score`, when configured, drops lower-scoring results after ranking
/// * Any failure returns an error, never a partial list
pub async fn search_images(
    query: &str,
    k: Option<u32>,
    dataset: &Dataset,
    backend: &dyn EmbeddingBackend,
    config: &RetrievalConfig,
) -> Result<SearchResponse, SearchError> {
    validate_input(query)?;
    let query = query.trim();
    let k = resolve_k(k, config);

    let (positive, negative) = if config.negation {
        let parsed = parse_query(query);
        (parsed.positive, parsed.negative)
    } else {
        (query.to_string(), None)
    };

    let positive_vector = backend.embed_query(&positive).await?;
    let mut final_scores = scores(&positive_vector, dataset.embeddings())?;

    match &negative {
        Some(negative) => {
            tracing::debug!(positive = %positive, negative = %negative, "Using positive-negative re-ranking");
            let negative_vector = backend.embed_query(negative).await?;
            let negative_scores = scores(&negative_vector, dataset.embeddings())?;
            final_scores = combine_scores(&final_scores, &negative_scores, config.penalty_weight);
        }
        None => tracing::debug!(positive = %positive, "Using plain semantic search"),
    }

    let ranked = rank(&final_scores, k)?;

    let results: Vec<RetrievedImage> = ranked
        .into_iter()
        .filter(|s| config.min_score.map_or(true, |min| s.score >= min))
        .enumerate()
        .map(|(i, s)| RetrievedImage::from_image(&dataset.images[s.index], i + 1, s.score))
        .collect();

    tracing::info!(
        query = %query,
        k,
        count = results.len(),
        top_score = results.first().map(|r| r.score),
        "Search complete"
    );

    Ok(SearchResponse {
        count: results.len(),
        results,
        query: query.to_string(),
    })
}

// ============================================================================
// TESTS
// ============================================================================
