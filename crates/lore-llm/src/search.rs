//! Nearest-neighbour search over embedding vectors.
//!
//! Given a query vector and a corpus, a [`VectorSearch`] returns the corpus
//! positions within a distance cutoff, nearest first.

use async_trait::async_trait;
use std::sync::Arc;

use crate::embeddings::cosine_distance;
use crate::error::{LlmError, Result};

/// A single search result: a position in the corpus and its distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub index: usize,
    pub distance: f32,
}

/// Trait for similarity search collaborators.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Return at most `max_results` hits with `distance <= cutoff`, sorted by
    /// ascending distance.
    async fn search(
        &self,
        query: &[f32],
        corpus: &[Vec<f32>],
        max_results: usize,
        cutoff: f32,
    ) -> Result<Vec<SearchHit>>;

    fn name(&self) -> &str;
}

/// A search backend that can be shared across threads.
pub type SharedSearch = Arc<dyn VectorSearch>;

/// Exhaustive cosine-distance search. Fine for per-persona corpora of a few
/// thousand records.
#[derive(Debug, Clone, Copy, Default)]
pub struct BruteForceSearch;

#[async_trait]
impl VectorSearch for BruteForceSearch {
    async fn search(
        &self,
        query: &[f32],
        corpus: &[Vec<f32>],
        max_results: usize,
        cutoff: f32,
    ) -> Result<Vec<SearchHit>> {
        if query.is_empty() {
            return Err(LlmError::InvalidRequest("empty query vector".into()));
        }

        let mut hits: Vec<SearchHit> = corpus
            .iter()
            .enumerate()
            .filter(|(_, v)| v.len() == query.len())
            .map(|(index, v)| SearchHit {
                index,
                distance: cosine_distance(query, v),
            })
            .filter(|hit| hit.distance <= cutoff)
            .collect();

        // Ties keep corpus order, which callers use to encode recency.
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(max_results);

        tracing::trace!(
            corpus = corpus.len(),
            hits = hits.len(),
            cutoff,
            "Brute-force search complete"
        );
        Ok(hits)
    }

    fn name(&self) -> &str {
        "brute-force"
    }
}
