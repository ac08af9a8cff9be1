//! Common types for search module

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::error::{SearchError, SearchResult};

/// Kind of clinical content an indexed item was derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// A transcript segment
    Transcript,
    /// A SOAP note, draft or final
    Soap,
    /// Checklist evaluation evidence
    Checklist,
    /// A finalized clinical note
    Note,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Transcript => "transcript",
            ContentType::Soap => "soap",
            ContentType::Checklist => "checklist",
            ContentType::Note => "note",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "transcript" => Ok(ContentType::Transcript),
            "soap" => Ok(ContentType::Soap),
            "checklist" => Ok(ContentType::Checklist),
            "note" => Ok(ContentType::Note),
            other => Err(SearchError::Validation(format!(
                "unknown content type \"{other}\""
            ))),
        }
    }
}

/// How a fused result was matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Lexical,
    Semantic,
    Hybrid,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::Lexical => "lexical",
            SearchType::Semantic => "semantic",
            SearchType::Hybrid => "hybrid",
        }
    }
}

impl FromStr for SearchType {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lexical" => Ok(SearchType::Lexical),
            "semantic" => Ok(SearchType::Semantic),
            "hybrid" => Ok(SearchType::Hybrid),
            other => Err(SearchError::Validation(format!(
                "unknown search type \"{other}\""
            ))),
        }
    }
}

/// Natural key of an indexed item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemKey {
    pub content_type: ContentType,
    pub content_id: String,
}

impl ItemKey {
    pub fn new(content_type: ContentType, content_id: impl Into<String>) -> Self {
        Self {
            content_type,
            content_id: content_id.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.content_type, self.content_id)
    }
}

/// Open key/value metadata attached to an indexed item.
///
/// Keys are owned by the caller. The documented ones below have typed
/// accessors; any other key is kept as-is so newer producers stay readable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemMetadata(BTreeMap<String, serde_json::Value>);

impl ItemMetadata {
    /// Speaker label of a transcript segment
    pub const SPEAKER: &'static str = "speaker";
    /// Segment start offset in seconds
    pub const START_TIME: &'static str = "start_time";
    /// Segment end offset in seconds
    pub const END_TIME: &'static str = "end_time";
    /// Position of a segment within its transcript
    pub const SEGMENT_INDEX: &'static str = "segment_index";
    /// Draft/final status of a note
    pub const NOTE_STATUS: &'static str = "note_status";
    /// Note section or note type
    pub const SECTION: &'static str = "section";
    /// Checklist item title
    pub const CHECKLIST_ITEM: &'static str = "checklist_item";
    /// Checklist evaluation status
    pub const STATUS: &'static str = "status";
    /// Checklist evaluation confidence
    pub const CONFIDENCE: &'static str = "confidence";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(|v| v.as_f64())
    }

    pub fn speaker(&self) -> Option<&str> {
        self.get_str(Self::SPEAKER)
    }

    pub fn note_status(&self) -> Option<&str> {
        self.get_str(Self::NOTE_STATUS)
    }

    pub fn checklist_item(&self) -> Option<&str> {
        self.get_str(Self::CHECKLIST_ITEM)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }
}

/// One searchable unit of clinical content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedItem {
    pub content_type: ContentType,
    pub content_id: String,
    /// Owning clinical session
    pub encounter_id: i64,
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub metadata: ItemMetadata,
    /// Present once an embedding has been computed
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IndexedItem {
    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.content_type, self.content_id.clone())
    }
}

/// Content handed to the store for an upsert
#[derive(Debug, Clone)]
pub struct NewItem {
    pub encounter_id: i64,
    pub content_type: ContentType,
    pub content_id: String,
    pub title: String,
    pub text: String,
    pub metadata: ItemMetadata,
    pub embedding: Option<Vec<f32>>,
}

/// Validated search filters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encounter_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_types: Option<Vec<ContentType>>,
    /// Inclusive lower bound on item creation date
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_from: Option<NaiveDate>,
    /// Inclusive upper bound on item creation date
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_to: Option<NaiveDate>,
}

impl SearchFilters {
    /// Content types to restrict to; `None` when every type is allowed
    pub fn content_type_set(&self) -> Option<&[ContentType]> {
        self.content_types.as_deref().filter(|types| !types.is_empty())
    }

    /// Timestamp bounds for `created_at` as `[from, until)` RFC 3339 strings.
    ///
    /// Timestamps are stored in a fixed-width UTC format, so string
    /// comparison orders them correctly.
    pub fn created_bounds(&self) -> (Option<String>, Option<String>) {
        let from = self.date_from.map(|d| d.format("%Y-%m-%d").to_string());
        let until = self.date_to.map(|d| {
            d.checked_add_days(Days::new(1))
                .map(|next| next.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "9999-12-31T23:59:59.999Z".to_string())
        });
        (from, until)
    }
}

/// Filters as received on the wire, before validation
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFiltersInput {
    #[serde(default)]
    pub encounter_id: Option<i64>,
    #[serde(default)]
    pub content_types: Option<Vec<String>>,
    #[serde(default)]
    pub date_from: Option<String>,
    #[serde(default)]
    pub date_to: Option<String>,
}

impl SearchFiltersInput {
    /// Turn raw filter values into typed filters, rejecting malformed ones
    pub fn validate(&self) -> SearchResult<SearchFilters> {
        let content_types = match &self.content_types {
            Some(raw) => {
                let mut types = Vec::with_capacity(raw.len());
                for value in raw {
                    let parsed: ContentType = value.parse()?;
                    if !types.contains(&parsed) {
                        types.push(parsed);
                    }
                }
                Some(types)
            }
            None => None,
        };

        let date_from = parse_date("dateFrom", self.date_from.as_deref())?;
        let date_to = parse_date("dateTo", self.date_to.as_deref())?;
        if let (Some(from), Some(to)) = (date_from, date_to) {
            if from > to {
                return Err(SearchError::Validation(format!(
                    "dateFrom ({from}) is after dateTo ({to})"
                )));
            }
        }

        Ok(SearchFilters {
            encounter_id: self.encounter_id,
            content_types,
            date_from,
            date_to,
        })
    }
}

fn parse_date(field: &str, value: Option<&str>) -> SearchResult<Option<NaiveDate>> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    // Accept a bare date or a full timestamp, keeping only the date part
    let date_part = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| SearchError::Validation(format!("{field} is not a valid date: \"{value}\"")))
}

/// An item scored by one engine
#[derive(Debug, Clone)]
pub struct ScoredItem {
    pub item: IndexedItem,
    /// Engine-native relevance; larger is better
    pub score: f64,
    pub snippet: String,
}

/// An item after lexical and semantic scores have been merged
#[derive(Debug, Clone)]
pub struct FusedResult {
    pub item: IndexedItem,
    pub combined_score: f64,
    pub lexical_score: Option<f64>,
    pub semantic_score: Option<f64>,
    pub search_type: SearchType,
    pub snippet: String,
}

/// Search request
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub filters: SearchFiltersInput,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_filters(mut self, filters: SearchFiltersInput) -> Self {
        self.filters = filters;
        self
    }
}

/// A single search result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub content_type: ContentType,
    pub content_id: String,
    pub encounter_id: i64,
    pub title: String,
    pub snippet: String,
    pub score: f64,
    pub search_type: SearchType,
}

/// Search results response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub total_count: usize,
    pub execution_time_ms: u64,
    pub invocation_id: String,
}

/// Request to index one piece of content
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRequest {
    pub encounter_id: i64,
    pub content_type: ContentType,
    pub content_id: String,
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Option<ItemMetadata>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IndexResponse {
    pub indexed: bool,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReindexRequest {
    pub encounter_id: i64,
}

/// Items written per content type by an encounter reindex
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexCounts {
    pub transcript: usize,
    pub soap: usize,
    pub checklist: usize,
    pub notes: usize,
}

impl ReindexCounts {
    pub fn increment(&mut self, content_type: ContentType) {
        match content_type {
            ContentType::Transcript => self.transcript += 1,
            ContentType::Soap => self.soap += 1,
            ContentType::Checklist => self.checklist += 1,
            ContentType::Note => self.notes += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.transcript + self.soap + self.checklist + self.notes
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReindexResponse {
    pub counts: ReindexCounts,
}

/// Immutable audit record of one query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchInvocation {
    pub id: String,
    pub query_text: String,
    pub filters: SearchFilters,
    pub requested_by: Option<String>,
    pub result_count: usize,
    pub execution_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// One ranked entry cached for an invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResult {
    pub invocation_id: String,
    pub content_type: ContentType,
    pub content_id: String,
    pub combined_score: f64,
    /// 1-based position within the invocation
    pub rank: u32,
    pub snippet: String,
    pub search_type: SearchType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFrequency {
    pub query: String,
    pub count: u64,
}

/// Aggregated search activity over a period
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    pub total_searches: u64,
    pub avg_execution_time_ms: f64,
    pub top_queries: Vec<QueryFrequency>,
    pub content_type_distribution: BTreeMap<String, u64>,
}
