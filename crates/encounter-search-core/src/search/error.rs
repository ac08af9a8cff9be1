//! Search error types

use thiserror::Error;

/// Errors produced by the search engine
#[derive(Debug, Error)]
pub enum SearchError {
    /// The requested encounter (or other target) does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed request input, rejected before any engine runs
    #[error("validation error: {0}")]
    Validation(String),

    /// An embedding provider or content store could not serve the call
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// A provider or store call exceeded its time budget
    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("embedding API key is not configured")]
    ApiKeyMissing,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[cfg(feature = "http-embeddings")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SearchError {
    /// Whether this error should be surfaced to the caller of the service.
    ///
    /// Everything else is absorbed by the engines and degrades to an empty
    /// contribution.
    pub fn is_caller_facing(&self) -> bool {
        matches!(self, SearchError::NotFound(_) | SearchError::Validation(_))
    }
}

pub type SearchResult<T> = Result<T, SearchError>;
