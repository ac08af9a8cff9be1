//! Full-text search engine

use std::sync::Arc;
use std::time::Duration;

use super::content_store::{ContentStore, FieldWeights};
use super::snippet::SnippetGenerator;
use super::types::{ScoredItem, SearchFilters};

/// Upper bound on terms sent to the store for one query
const MAX_TERMS: usize = 32;

/// Ranked full-text search over the content store
pub struct LexicalSearchEngine {
    store: Arc<dyn ContentStore>,
    weights: FieldWeights,
    timeout: Duration,
    snippets: SnippetGenerator,
}

impl LexicalSearchEngine {
    pub fn new(
        store: Arc<dyn ContentStore>,
        weights: FieldWeights,
        timeout: Duration,
        snippets: SnippetGenerator,
    ) -> Self {
        Self {
            store,
            weights,
            timeout,
            snippets,
        }
    }

    /// Search for items matching every word of `query_text`.
    ///
    /// Never fails: store errors and timeouts are logged and yield an empty
    /// list.
    pub async fn search(
        &self,
        query_text: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Vec<ScoredItem> {
        let terms = query_terms(query_text);
        if terms.is_empty() || limit == 0 {
            return vec![];
        }

        let ranked = tokio::time::timeout(
            self.timeout,
            self.store.rank_text(&terms, self.weights, filters, limit),
        )
        .await;

        match ranked {
            Ok(Ok(mut hits)) => {
                hits.truncate(limit);
                for hit in &mut hits {
                    hit.snippet = self.snippets.snippet(&hit.item.text, query_text);
                }
                log::debug!("[Lexical] {} hits for {:?}", hits.len(), terms);
                hits
            }
            Ok(Err(e)) => {
                log::warn!("[Lexical] {} query failed: {}", self.store.store_name(), e);
                vec![]
            }
            Err(_) => {
                log::warn!(
                    "[Lexical] {} query timed out after {:?}",
                    self.store.store_name(),
                    self.timeout
                );
                vec![]
            }
        }
    }
}

/// Lowercase word terms of a query, deduplicated in first-seen order
pub(crate) fn query_terms(query_text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in query_text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let word = word.to_lowercase();
        if !terms.contains(&word) {
            terms.push(word);
        }
        if terms.len() == MAX_TERMS {
            break;
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_terms_strip_syntax() {
        assert_eq!(
            query_terms("Chest-pain AND \"shortness\" (of) breath*"),
            vec!["chest", "pain", "and", "shortness", "of", "breath"]
        );
    }

    #[test]
    fn test_query_terms_dedupe_and_cap() {
        assert_eq!(query_terms("Fever fever FEVER"), vec!["fever"]);
        let long: String = (0..100).map(|i| format!("w{i} ")).collect();
        assert_eq!(query_terms(&long).len(), MAX_TERMS);
    }

    #[test]
    fn test_query_terms_of_punctuation_only_is_empty() {
        assert!(query_terms("  ?!* -- ").is_empty());
    }
}
