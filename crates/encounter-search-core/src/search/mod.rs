//! Encounter Search Module
//!
//! Hybrid search over clinical-encounter text: transcript segments, SOAP
//! drafts, checklist evaluations and finalized notes.
//!
//! ## Features
//!
//! - Full-text ranking with SQLite FTS5 (title weighted above body)
//! - Embedding similarity search via an OpenAI-compatible API
//! - Weighted fusion of both result lists with deterministic ordering
//! - Query-centred snippets
//! - Audit trail of every search with cached ranked results and analytics
//!
//! ## Usage
//!
//! ```rust,ignore
//! use encounter_search_core::search::{SearchConfig, SearchRequest, SearchService};
//!
//! let service = SearchService::open(SearchConfig::load()?)?;
//! let response = service
//!     .search(SearchRequest::new("chest pain").with_limit(20), Some("dr-lee"))
//!     .await?;
//! ```

mod config;
mod content_store;
mod database;
mod embedding;
mod error;
mod fusion;
mod indexer;
mod lexical;
mod query_recorder;
mod semantic;
mod service;
mod snippet;
mod sources;
mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{EmbeddingConfig, FusionConfig, PathsConfig, SearchBehaviorConfig, SearchConfig};
pub use content_store::{ContentStore, FieldWeights, SqliteContentStore};
pub use database::Database;
#[cfg(feature = "http-embeddings")]
pub use embedding::EmbeddingClient;
pub use embedding::{cosine_similarity, DisabledEmbeddingProvider, EmbeddingProvider};
pub use error::{SearchError, SearchResult};
pub use fusion::ResultFusion;
pub use indexer::Indexer;
pub use lexical::LexicalSearchEngine;
pub use query_recorder::{QueryRecorder, ALL_CONTENT_TYPES};
pub use semantic::SemanticSearchEngine;
pub use service::SearchService;
pub use snippet::SnippetGenerator;
pub use sources::{
    ChecklistEvaluation, ChecklistItem, ClinicalNote, Encounter, EncounterSource, NoteStatus,
    SoapNote, SourceContent, TranscriptSegment,
};
pub use types::*;
