//! Encounter records consumed by reindexing
//!
//! The encounter application owns these records; the search engine only reads
//! them through [`EncounterSource`] and turns each one into indexable
//! [`SourceContent`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{SearchError, SearchResult};
use super::types::{ContentType, ItemMetadata};

/// Read access to the records of one clinical encounter
#[async_trait]
pub trait EncounterSource: Send + Sync {
    /// `None` when no encounter has this id
    async fn encounter(&self, encounter_id: i64) -> SearchResult<Option<Encounter>>;

    async fn transcript_segments(&self, encounter_id: i64) -> SearchResult<Vec<TranscriptSegment>>;

    /// SOAP drafts, newest revision last
    async fn soap_notes(&self, encounter_id: i64) -> SearchResult<Vec<SoapNote>>;

    async fn checklist_evaluations(
        &self,
        encounter_id: i64,
    ) -> SearchResult<Vec<ChecklistEvaluation>>;

    /// Finalized clinical notes
    async fn clinical_notes(&self, encounter_id: i64) -> SearchResult<Vec<ClinicalNote>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Encounter {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

/// One speaker turn of an encounter transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    pub id: String,
    #[serde(default)]
    pub speaker: Option<String>,
    pub text: String,
    /// Seconds from the start of the recording
    #[serde(default)]
    pub start_time: Option<f64>,
    #[serde(default)]
    pub end_time: Option<f64>,
    #[serde(default)]
    pub segment_index: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteStatus {
    Draft,
    Final,
}

impl NoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteStatus::Draft => "draft",
            NoteStatus::Final => "final",
        }
    }
}

/// A SOAP note revision
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoapNote {
    pub id: String,
    pub status: NoteStatus,
    #[serde(default)]
    pub subjective: Option<String>,
    #[serde(default)]
    pub objective: Option<String>,
    #[serde(default)]
    pub assessment: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
}

/// The checklist entry an evaluation refers to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
}

/// Assessment of one checklist item against the encounter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistEvaluation {
    pub id: String,
    /// `None` when the referenced checklist item no longer exists
    #[serde(default)]
    pub item: Option<ChecklistItem>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub evidence: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalNote {
    pub id: String,
    /// e.g. "progress", "discharge", "referral"
    pub note_type: String,
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
}

/// A record flattened into what the indexer stores
#[derive(Debug, Clone, PartialEq)]
pub struct SourceContent {
    pub content_type: ContentType,
    pub content_id: String,
    pub title: String,
    pub text: String,
    pub metadata: ItemMetadata,
}

fn require_id(kind: &str, id: &str) -> SearchResult<String> {
    let id = id.trim();
    if id.is_empty() {
        return Err(SearchError::Validation(format!("{kind} without an id")));
    }
    Ok(id.to_string())
}

impl TranscriptSegment {
    pub fn to_content(&self) -> SearchResult<SourceContent> {
        let content_id = require_id("transcript segment", &self.id)?;
        let speaker = self
            .speaker
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let mut metadata = ItemMetadata::new();
        if let Some(speaker) = speaker {
            metadata.insert(ItemMetadata::SPEAKER, speaker);
        }
        if let Some(start) = self.start_time {
            metadata.insert(ItemMetadata::START_TIME, start);
        }
        if let Some(end) = self.end_time {
            metadata.insert(ItemMetadata::END_TIME, end);
        }
        if let Some(index) = self.segment_index {
            metadata.insert(ItemMetadata::SEGMENT_INDEX, index);
        }

        let title = match (speaker, self.segment_index) {
            (Some(speaker), Some(index)) => format!("Transcript #{index} ({speaker})"),
            (Some(speaker), None) => format!("Transcript ({speaker})"),
            (None, Some(index)) => format!("Transcript #{index}"),
            (None, None) => "Transcript".to_string(),
        };

        Ok(SourceContent {
            content_type: ContentType::Transcript,
            content_id,
            title,
            text: self.text.clone(),
            metadata,
        })
    }
}

impl SoapNote {
    /// Sections in S/O/A/P order, skipping empty ones
    pub fn sections(&self) -> Vec<(&'static str, &str)> {
        [
            ("Subjective", self.subjective.as_deref()),
            ("Objective", self.objective.as_deref()),
            ("Assessment", self.assessment.as_deref()),
            ("Plan", self.plan.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, body)| {
            body.map(str::trim)
                .filter(|b| !b.is_empty())
                .map(|b| (name, b))
        })
        .collect()
    }

    pub fn to_content(&self) -> SearchResult<SourceContent> {
        let content_id = require_id("SOAP note", &self.id)?;
        let sections = self.sections();
        let text = sections
            .iter()
            .map(|(name, body)| format!("{name}: {body}"))
            .collect::<Vec<_>>()
            .join("\n");

        let mut metadata =
            ItemMetadata::new().with(ItemMetadata::NOTE_STATUS, self.status.as_str());
        if !sections.is_empty() {
            let names: Vec<&str> = sections.iter().map(|(name, _)| *name).collect();
            metadata.insert(ItemMetadata::SECTION, names.join(","));
        }

        Ok(SourceContent {
            content_type: ContentType::Soap,
            content_id,
            title: format!("SOAP Note ({})", self.status.as_str()),
            text,
            metadata,
        })
    }
}

impl ChecklistEvaluation {
    /// Fails with `NotFound` when the related checklist item is missing
    pub fn to_content(&self) -> SearchResult<SourceContent> {
        let content_id = require_id("checklist evaluation", &self.id)?;
        let item = self.item.as_ref().ok_or_else(|| {
            SearchError::NotFound(format!("checklist item for evaluation {content_id}"))
        })?;

        let text = [self.evidence.as_deref(), self.notes.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        let mut metadata = ItemMetadata::new().with(ItemMetadata::CHECKLIST_ITEM, item.id.as_str());
        if let Some(status) = &self.status {
            metadata.insert(ItemMetadata::STATUS, status.as_str());
        }
        if let Some(confidence) = self.confidence {
            metadata.insert(ItemMetadata::CONFIDENCE, confidence);
        }
        if let Some(category) = &item.category {
            metadata.insert(ItemMetadata::SECTION, category.as_str());
        }

        Ok(SourceContent {
            content_type: ContentType::Checklist,
            content_id,
            title: item.title.clone(),
            text,
            metadata,
        })
    }
}

impl ClinicalNote {
    pub fn to_content(&self) -> SearchResult<SourceContent> {
        let content_id = require_id("clinical note", &self.id)?;
        let title = self
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} note", self.note_type));

        Ok(SourceContent {
            content_type: ContentType::Note,
            content_id,
            title,
            text: self.content.clone(),
            metadata: ItemMetadata::new()
                .with(ItemMetadata::NOTE_STATUS, NoteStatus::Final.as_str())
                .with(ItemMetadata::SECTION, self.note_type.as_str()),
        })
    }
}
