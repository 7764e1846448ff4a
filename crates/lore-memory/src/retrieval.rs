//! Adapter over the embedding and similarity-search collaborators.

use lore_llm::{SearchHit, SharedEmbedder, SharedSearch};

use crate::error::Result;

/// Embeds text and ranks corpora against it.
#[derive(Clone)]
pub struct RetrievalAdapter {
    embedder: SharedEmbedder,
    search: SharedSearch,
}

impl RetrievalAdapter {
    pub fn new(embedder: SharedEmbedder, search: SharedSearch) -> Self {
        Self { embedder, search }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embedder.embed(text).await?)
    }

    /// Embed `query` and return corpus hits within `cutoff`, nearest first.
    pub async fn rank(
        &self,
        query: &str,
        corpus: &[Vec<f32>],
        max_results: usize,
        cutoff: f32,
    ) -> Result<Vec<SearchHit>> {
        if corpus.is_empty() || max_results == 0 {
            return Ok(Vec::new());
        }
        let query = self.embed(query).await?;
        Ok(self.search.search(&query, corpus, max_results, cutoff).await?)
    }
}

impl std::fmt::Debug for RetrievalAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalAdapter")
            .field("embedder", &self.embedder.name())
            .field("search", &self.search.name())
            .finish()
    }
}
