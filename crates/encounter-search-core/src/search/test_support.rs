//! Fakes shared by the unit and scenario tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::content_store::{ContentStore, FieldWeights, SqliteContentStore};
use super::database::Database;
use super::embedding::EmbeddingProvider;
use super::error::{SearchError, SearchResult};
use super::sources::{
    ChecklistEvaluation, ClinicalNote, Encounter, EncounterSource, SoapNote, TranscriptSegment,
};
use super::types::{
    ContentType, IndexedItem, ItemKey, ItemMetadata, NewItem, ScoredItem, SearchFilters,
};

pub(crate) fn memory_store() -> SqliteContentStore {
    SqliteContentStore::new(Database::open_in_memory().unwrap())
}

pub(crate) fn new_item(
    content_type: ContentType,
    content_id: &str,
    title: &str,
    text: &str,
) -> NewItem {
    NewItem {
        encounter_id: 1,
        content_type,
        content_id: content_id.to_string(),
        title: title.to_string(),
        text: text.to_string(),
        metadata: ItemMetadata::new(),
        embedding: None,
    }
}

/// Synonym groups; each group is one embedding dimension
const CONCEPTS: [&[&str]; 6] = [
    &["headache", "migraine", "cephalalgia"],
    &["chest", "cardiac", "heart", "angina"],
    &["cough", "wheeze", "respiratory", "breath"],
    &["fever", "febrile", "temperature", "pyrexia"],
    &["diabetes", "glucose", "insulin", "a1c"],
    &["ibuprofen", "acetaminophen", "analgesic", "nsaid"],
];

/// Deterministic embedder that maps synonyms onto shared dimensions
#[derive(Default)]
pub(crate) struct ConceptEmbedder {
    pub calls: AtomicUsize,
}

impl ConceptEmbedder {
    pub fn vector(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        CONCEPTS
            .iter()
            .map(|words| words.iter().filter(|w| lower.contains(*w)).count() as f32)
            .collect()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for ConceptEmbedder {
    async fn embed(&self, text: &str) -> SearchResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::vector(text))
    }

    fn dimensions(&self) -> usize {
        CONCEPTS.len()
    }

    fn provider_name(&self) -> &str {
        "concepts"
    }
}

pub(crate) struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> SearchResult<Vec<f32>> {
        Err(SearchError::Embedding("upstream returned 503".to_string()))
    }

    fn dimensions(&self) -> usize {
        CONCEPTS.len()
    }

    fn provider_name(&self) -> &str {
        "failing"
    }
}

/// Never answers within any reasonable timeout
pub(crate) struct StalledEmbedder;

#[async_trait]
impl EmbeddingProvider for StalledEmbedder {
    async fn embed(&self, _text: &str) -> SearchResult<Vec<f32>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(vec![])
    }

    fn dimensions(&self) -> usize {
        CONCEPTS.len()
    }

    fn provider_name(&self) -> &str {
        "stalled"
    }
}

/// Wraps a SQLite store and counts engine-facing calls
pub(crate) struct CountingStore {
    pub inner: SqliteContentStore,
    pub rank_calls: AtomicUsize,
    pub scan_calls: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: SqliteContentStore) -> Self {
        Self {
            inner,
            rank_calls: AtomicUsize::new(0),
            scan_calls: AtomicUsize::new(0),
        }
    }

    pub fn engine_calls(&self) -> usize {
        self.rank_calls.load(Ordering::SeqCst) + self.scan_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentStore for CountingStore {
    async fn upsert(&self, item: NewItem) -> SearchResult<IndexedItem> {
        self.inner.upsert(item).await
    }

    async fn get(&self, key: &ItemKey) -> SearchResult<Option<IndexedItem>> {
        self.inner.get(key).await
    }

    async fn remove(&self, key: &ItemKey) -> SearchResult<bool> {
        self.inner.remove(key).await
    }

    async fn rank_text(
        &self,
        terms: &[String],
        weights: FieldWeights,
        filters: &SearchFilters,
        limit: usize,
    ) -> SearchResult<Vec<ScoredItem>> {
        self.rank_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.rank_text(terms, weights, filters, limit).await
    }

    async fn scan_embedded(&self, filters: &SearchFilters) -> SearchResult<Vec<IndexedItem>> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.scan_embedded(filters).await
    }

    async fn count(&self) -> SearchResult<usize> {
        self.inner.count().await
    }

    fn store_name(&self) -> &str {
        "counting"
    }
}

/// Store whose every call fails
pub(crate) struct BrokenStore;

fn broken<T>() -> SearchResult<T> {
    Err(SearchError::ProviderUnavailable("disk I/O error".to_string()))
}

#[async_trait]
impl ContentStore for BrokenStore {
    async fn upsert(&self, _item: NewItem) -> SearchResult<IndexedItem> {
        broken()
    }

    async fn get(&self, _key: &ItemKey) -> SearchResult<Option<IndexedItem>> {
        broken()
    }

    async fn remove(&self, _key: &ItemKey) -> SearchResult<bool> {
        broken()
    }

    async fn rank_text(
        &self,
        _terms: &[String],
        _weights: FieldWeights,
        _filters: &SearchFilters,
        _limit: usize,
    ) -> SearchResult<Vec<ScoredItem>> {
        broken()
    }

    async fn scan_embedded(&self, _filters: &SearchFilters) -> SearchResult<Vec<IndexedItem>> {
        broken()
    }

    async fn count(&self) -> SearchResult<usize> {
        broken()
    }

    fn store_name(&self) -> &str {
        "broken"
    }
}

#[derive(Default, Clone)]
pub(crate) struct EncounterRecords {
    pub transcript: Vec<TranscriptSegment>,
    pub soap: Vec<SoapNote>,
    pub checklist: Vec<ChecklistEvaluation>,
    pub notes: Vec<ClinicalNote>,
}

/// In-memory encounter application
#[derive(Default)]
pub(crate) struct FakeEncounterSource {
    pub encounters: HashMap<i64, EncounterRecords>,
    /// Makes the transcript fetch fail for every encounter
    pub transcript_outage: bool,
}

impl FakeEncounterSource {
    pub fn with_encounter(mut self, encounter_id: i64, records: EncounterRecords) -> Self {
        self.encounters.insert(encounter_id, records);
        self
    }

    fn records(&self, encounter_id: i64) -> EncounterRecords {
        self.encounters.get(&encounter_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl EncounterSource for FakeEncounterSource {
    async fn encounter(&self, encounter_id: i64) -> SearchResult<Option<Encounter>> {
        Ok(self.encounters.get(&encounter_id).map(|_| Encounter {
            id: encounter_id,
            title: Some(format!("Encounter {encounter_id}")),
            started_at: None,
        }))
    }

    async fn transcript_segments(&self, encounter_id: i64) -> SearchResult<Vec<TranscriptSegment>> {
        if self.transcript_outage {
            return Err(SearchError::ProviderUnavailable(
                "transcript service down".to_string(),
            ));
        }
        Ok(self.records(encounter_id).transcript)
    }

    async fn soap_notes(&self, encounter_id: i64) -> SearchResult<Vec<SoapNote>> {
        Ok(self.records(encounter_id).soap)
    }

    async fn checklist_evaluations(
        &self,
        encounter_id: i64,
    ) -> SearchResult<Vec<ChecklistEvaluation>> {
        Ok(self.records(encounter_id).checklist)
    }

    async fn clinical_notes(&self, encounter_id: i64) -> SearchResult<Vec<ClinicalNote>> {
        Ok(self.records(encounter_id).notes)
    }
}

pub(crate) fn segment(id: &str, speaker: &str, text: &str) -> TranscriptSegment {
    TranscriptSegment {
        id: id.to_string(),
        speaker: Some(speaker.to_string()),
        text: text.to_string(),
        start_time: None,
        end_time: None,
        segment_index: None,
    }
}
