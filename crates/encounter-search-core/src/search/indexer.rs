//! Content indexer

use std::sync::Arc;
use std::time::Duration;

use super::content_store::ContentStore;
use super::embedding::EmbeddingProvider;
use super::error::{SearchError, SearchResult};
use super::sources::{EncounterSource, SourceContent};
use super::types::{ContentType, IndexedItem, ItemKey, ItemMetadata, NewItem, ReindexCounts};

/// Writes encounter content into the content store
pub struct Indexer {
    store: Arc<dyn ContentStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    /// Texts with fewer characters than this (after trimming) are not indexed
    min_text_length: usize,
    timeout: Duration,
}

impl Indexer {
    pub fn new(
        store: Arc<dyn ContentStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        min_text_length: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            embedder,
            min_text_length,
            timeout,
        }
    }

    /// Index or update one item.
    ///
    /// Returns `Ok(None)` without touching the store when the text is too
    /// short to be worth indexing. The embedding is best effort: on failure
    /// the item is stored without one. Store errors are returned.
    pub async fn index_content(
        &self,
        encounter_id: i64,
        content_type: ContentType,
        content_id: &str,
        title: &str,
        text: &str,
        metadata: ItemMetadata,
    ) -> SearchResult<Option<IndexedItem>> {
        if text.trim().chars().count() < self.min_text_length {
            log::debug!(
                "[Indexer] Skipping {}:{}: text shorter than {} chars",
                content_type,
                content_id,
                self.min_text_length
            );
            return Ok(None);
        }

        let embedding = match self.embed(text).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                log::warn!(
                    "[Indexer] Storing {}:{} without embedding: {}",
                    content_type,
                    content_id,
                    e
                );
                None
            }
        };

        let item = self
            .store
            .upsert(NewItem {
                encounter_id,
                content_type,
                content_id: content_id.to_string(),
                title: title.to_string(),
                text: text.to_string(),
                metadata,
                embedding,
            })
            .await?;
        Ok(Some(item))
    }

    async fn embed(&self, text: &str) -> SearchResult<Vec<f32>> {
        match tokio::time::timeout(self.timeout, self.embedder.embed(text)).await {
            Ok(result) => result,
            Err(_) => Err(SearchError::Timeout("embedding request")),
        }
    }

    /// Rebuild the index entries of one encounter from its source records.
    ///
    /// Fails with `NotFound` if the encounter does not exist. Individual
    /// records that cannot be indexed are logged and skipped.
    pub async fn reindex_encounter(
        &self,
        encounter_id: i64,
        source: &dyn EncounterSource,
    ) -> SearchResult<ReindexCounts> {
        if source.encounter(encounter_id).await?.is_none() {
            return Err(SearchError::NotFound(format!("encounter {encounter_id}")));
        }

        let start = std::time::Instant::now();
        let mut counts = ReindexCounts::default();

        let transcript = fetched_contents(
            "transcript segments",
            encounter_id,
            source.transcript_segments(encounter_id).await,
            |segment| segment.to_content(),
        );
        self.index_all(encounter_id, transcript, &mut counts).await;

        let soap = fetched_contents(
            "SOAP notes",
            encounter_id,
            source.soap_notes(encounter_id).await,
            |note| note.to_content(),
        );
        self.index_all(encounter_id, soap, &mut counts).await;

        let checklist = fetched_contents(
            "checklist evaluations",
            encounter_id,
            source.checklist_evaluations(encounter_id).await,
            |evaluation| evaluation.to_content(),
        );
        self.index_all(encounter_id, checklist, &mut counts).await;

        let notes = fetched_contents(
            "clinical notes",
            encounter_id,
            source.clinical_notes(encounter_id).await,
            |note| note.to_content(),
        );
        self.index_all(encounter_id, notes, &mut counts).await;

        log::info!(
            "[Indexer] Reindexed encounter {}: {} items ({} transcript, {} soap, {} checklist, {} notes) in {:?}",
            encounter_id,
            counts.total(),
            counts.transcript,
            counts.soap,
            counts.checklist,
            counts.notes,
            start.elapsed()
        );
        Ok(counts)
    }

    async fn index_all(
        &self,
        encounter_id: i64,
        contents: Vec<SearchResult<SourceContent>>,
        counts: &mut ReindexCounts,
    ) {
        for content in contents {
            let content = match content {
                Ok(content) => content,
                Err(e) => {
                    log::warn!("[Indexer] Skipping record of encounter {}: {}", encounter_id, e);
                    continue;
                }
            };
            let written = self
                .index_content(
                    encounter_id,
                    content.content_type,
                    &content.content_id,
                    &content.title,
                    &content.text,
                    content.metadata,
                )
                .await;
            match written {
                Ok(Some(_)) => counts.increment(content.content_type),
                Ok(None) => {}
                Err(e) => log::warn!(
                    "[Indexer] Failed to index {}:{}: {}",
                    content.content_type,
                    content.content_id,
                    e
                ),
            }
        }
    }

    /// Remove one item; returns whether it existed
    pub async fn remove_content(
        &self,
        content_type: ContentType,
        content_id: &str,
    ) -> SearchResult<bool> {
        let key = ItemKey::new(content_type, content_id);
        let removed = self.store.remove(&key).await?;
        if removed {
            log::debug!("[Indexer] Removed {}", key);
        }
        Ok(removed)
    }
}

/// Convert fetched records, treating a failed fetch as an empty collection
fn fetched_contents<R>(
    what: &str,
    encounter_id: i64,
    fetched: SearchResult<Vec<R>>,
    convert: impl Fn(&R) -> SearchResult<SourceContent>,
) -> Vec<SearchResult<SourceContent>> {
    match fetched {
        Ok(records) => records.iter().map(convert).collect(),
        Err(e) => {
            log::warn!(
                "[Indexer] Could not load {} of encounter {}: {}",
                what,
                encounter_id,
                e
            );
            vec![]
        }
    }
}
