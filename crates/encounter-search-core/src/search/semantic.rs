//! Vector similarity search engine

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::content_store::ContentStore;
use super::embedding::{cosine_similarity, EmbeddingProvider};
use super::snippet::SnippetGenerator;
use super::types::{ScoredItem, SearchFilters};

/// Scores stored embeddings against a query embedding
pub struct SemanticSearchEngine {
    store: Arc<dyn ContentStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    min_similarity: f32,
    timeout: Duration,
    snippets: SnippetGenerator,
}

impl SemanticSearchEngine {
    pub fn new(
        store: Arc<dyn ContentStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        min_similarity: f32,
        timeout: Duration,
        snippets: SnippetGenerator,
    ) -> Self {
        Self {
            store,
            embedder,
            min_similarity,
            timeout,
            snippets,
        }
    }

    pub fn min_similarity(&self) -> f32 {
        self.min_similarity
    }

    /// Search with the configured similarity floor
    pub async fn search(
        &self,
        query_text: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Vec<ScoredItem> {
        self.search_with_threshold(query_text, filters, limit, self.min_similarity)
            .await
    }

    /// Return up to `limit` items whose cosine similarity to the query is at
    /// least `min_similarity`, best first.
    ///
    /// Never fails: provider or store errors and timeouts are logged and
    /// yield an empty list.
    pub async fn search_with_threshold(
        &self,
        query_text: &str,
        filters: &SearchFilters,
        limit: usize,
        min_similarity: f32,
    ) -> Vec<ScoredItem> {
        if query_text.trim().is_empty() || limit == 0 {
            return vec![];
        }

        let (query_vector, candidates) = tokio::join!(
            tokio::time::timeout(self.timeout, self.embedder.embed(query_text)),
            tokio::time::timeout(self.timeout, self.store.scan_embedded(filters)),
        );

        let query_vector = match query_vector {
            Ok(Ok(vector)) => vector,
            Ok(Err(e)) => {
                log::warn!(
                    "[Semantic] {} embedding failed: {}",
                    self.embedder.provider_name(),
                    e
                );
                return vec![];
            }
            Err(_) => {
                log::warn!(
                    "[Semantic] {} embedding timed out after {:?}",
                    self.embedder.provider_name(),
                    self.timeout
                );
                return vec![];
            }
        };

        let candidates = match candidates {
            Ok(Ok(items)) => items,
            Ok(Err(e)) => {
                log::warn!("[Semantic] {} scan failed: {}", self.store.store_name(), e);
                return vec![];
            }
            Err(_) => {
                log::warn!(
                    "[Semantic] {} scan timed out after {:?}",
                    self.store.store_name(),
                    self.timeout
                );
                return vec![];
            }
        };

        let scanned = candidates.len();
        let mut hits: Vec<ScoredItem> = Vec::new();
        for item in candidates {
            let Some(embedding) = item.embedding.as_deref() else {
                continue;
            };
            let Some(similarity) = cosine_similarity(&query_vector, embedding) else {
                log::debug!(
                    "[Semantic] Skipping {}: embedding not comparable ({} vs {} dims)",
                    item.key(),
                    embedding.len(),
                    query_vector.len()
                );
                continue;
            };
            if similarity < min_similarity {
                continue;
            }
            let snippet = self.snippets.snippet(&item.text, query_text);
            hits.push(ScoredItem {
                item,
                score: f64::from(similarity),
                snippet,
            });
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        hits.truncate(limit);
        log::debug!("[Semantic] {} of {} candidates kept", hits.len(), scanned);
        hits
    }
}
