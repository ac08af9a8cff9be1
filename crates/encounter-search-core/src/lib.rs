//! Search and ranking engine for clinical-encounter content.
//!
//! Everything lives in [`search`]; the most used types are re-exported here.

pub mod search;

pub use search::{
    EncounterSource, SearchConfig, SearchError, SearchRequest, SearchResponse, SearchResult,
    SearchService,
};
