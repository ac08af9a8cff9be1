//! Weighted fusion of lexical and semantic result lists

use std::cmp::Ordering;
use std::collections::HashMap;

use super::config::FusionConfig;
use super::types::{FusedResult, ItemKey, ScoredItem, SearchType};

/// Merges the two engines' results by weighted score addition
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultFusion {
    weights: FusionConfig,
}

impl ResultFusion {
    pub fn new(weights: FusionConfig) -> Self {
        Self { weights }
    }

    /// Combine both lists into at most `limit` results.
    ///
    /// Lexical entries are inserted first, so on equal combined scores they
    /// stay ahead of semantic-only entries; the sort is stable over that
    /// insertion order.
    pub fn combine(
        &self,
        lexical: Vec<ScoredItem>,
        semantic: Vec<ScoredItem>,
        limit: usize,
    ) -> Vec<FusedResult> {
        let mut fused: Vec<FusedResult> = Vec::with_capacity(lexical.len() + semantic.len());
        let mut positions: HashMap<ItemKey, usize> = HashMap::new();

        for hit in lexical {
            let key = hit.item.key();
            if let Some(&pos) = positions.get(&key) {
                // Duplicate lexical hit: keep the better score
                let existing = &mut fused[pos];
                let weighted = hit.score * self.weights.lexical_weight;
                if weighted > existing.combined_score {
                    existing.combined_score = weighted;
                    existing.lexical_score = Some(hit.score);
                }
                continue;
            }
            positions.insert(key, fused.len());
            fused.push(FusedResult {
                combined_score: hit.score * self.weights.lexical_weight,
                lexical_score: Some(hit.score),
                semantic_score: None,
                search_type: SearchType::Lexical,
                snippet: hit.snippet,
                item: hit.item,
            });
        }

        for hit in semantic {
            let key = hit.item.key();
            let weighted = hit.score * self.weights.semantic_weight;
            match positions.get(&key) {
                Some(&pos) => {
                    let existing = &mut fused[pos];
                    if existing.semantic_score.is_some() {
                        continue;
                    }
                    existing.combined_score += weighted;
                    existing.semantic_score = Some(hit.score);
                    existing.search_type = SearchType::Hybrid;
                    if hit.snippet.chars().count() > existing.snippet.chars().count() {
                        existing.snippet = hit.snippet;
                    }
                }
                None => {
                    positions.insert(key, fused.len());
                    fused.push(FusedResult {
                        combined_score: weighted,
                        lexical_score: None,
                        semantic_score: Some(hit.score),
                        search_type: SearchType::Semantic,
                        snippet: hit.snippet,
                        item: hit.item,
                    });
                }
            }
        }

        // `sort_by` is stable: equal scores keep insertion order
        fused.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(Ordering::Equal)
        });
        fused.truncate(limit);
        fused
    }
}
