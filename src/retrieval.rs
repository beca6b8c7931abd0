//! Nearest-neighbour retrieval over document chunks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::langbase::{LangbaseClient, MemoryRetrieveRequest};

/// Largest cosine distance; similarity `-1` maps here.
const MAX_COSINE_DISTANCE: f64 = 2.0;

/// A chunk returned by a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub content: String,
    /// Similarity-search distance, lower is closer. Not a probability.
    pub distance: f64,
}

impl RetrievedChunk {
    pub fn new(content: impl Into<String>, distance: f64) -> Self {
        Self {
            content: content.into(),
            distance,
        }
    }
}

/// A persisted vector index searched by query text.
#[async_trait]
pub trait RetrievalIndex: Send + Sync {
    /// Up to `k` chunks, best match first.
    async fn search(&self, query: &str, k: usize) -> AppResult<Vec<RetrievedChunk>>;
}

/// [`RetrievalIndex`] backed by a named Langbase memory.
///
/// Langbase reports cosine similarity; it is turned into cosine distance
/// (`1 - similarity`, clamped to `[0, 2]`).
#[derive(Clone)]
pub struct LangbaseMemoryIndex {
    langbase: LangbaseClient,
    memory_name: String,
}

impl LangbaseMemoryIndex {
    pub fn new(langbase: LangbaseClient, memory_name: impl Into<String>) -> Self {
        Self {
            langbase,
            memory_name: memory_name.into(),
        }
    }
}

/// Convert cosine similarity to cosine distance.
pub fn similarity_to_distance(similarity: f64) -> f64 {
    (1.0 - similarity).clamp(0.0, MAX_COSINE_DISTANCE)
}

#[async_trait]
impl RetrievalIndex for LangbaseMemoryIndex {
    async fn search(&self, query: &str, k: usize) -> AppResult<Vec<RetrievedChunk>> {
        let request = MemoryRetrieveRequest::new(&self.memory_name, query, k);
        let chunks = self.langbase.retrieve_memory(request).await?;

        Ok(chunks
            .into_iter()
            .take(k)
            .map(|c| RetrievedChunk::new(c.text, similarity_to_distance(c.similarity)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_to_distance() {
        assert_eq!(similarity_to_distance(1.0), 0.0);
        assert_eq!(similarity_to_distance(0.0), 1.0);
        assert_eq!(similarity_to_distance(-1.0), 2.0);
    }

    #[test]
    fn test_similarity_to_distance_clamps_out_of_range() {
        assert_eq!(similarity_to_distance(1.3), 0.0);
        assert_eq!(similarity_to_distance(-4.0), 2.0);
    }
}
