//! Search configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::error::{SearchError, SearchResult};

/// Main search configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Embedding API configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Search behavior configuration
    #[serde(default)]
    pub search: SearchBehaviorConfig,

    /// Lexical/semantic fusion weights
    #[serde(default)]
    pub fusion: FusionConfig,

    /// Paths configuration
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Embedding API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// API key (can also use EMBEDDING_API_KEY / OPENAI_API_KEY env vars)
    #[serde(default)]
    pub api_key: Option<String>,

    /// API base URL
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Embedding dimensions
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_api_base(),
            model: default_model(),
            dimensions: default_dimensions(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    /// Get API key from config or environment
    pub fn get_api_key(&self) -> SearchResult<String> {
        if let Some(ref key) = self.api_key {
            if !key.is_empty() {
                return Ok(key.clone());
            }
        }

        std::env::var("EMBEDDING_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .map_err(|_| SearchError::ApiKeyMissing)
    }
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimensions() -> usize {
    1536
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Search behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchBehaviorConfig {
    /// Result limit used when a request does not specify one
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Upper bound applied to requested limits
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    /// Cosine similarity floor for semantic hits
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    /// Snippet window length in characters
    #[serde(default = "default_snippet_length")]
    pub snippet_length: usize,

    /// Texts shorter than this many characters are not indexed
    #[serde(default = "default_min_text_length")]
    pub min_text_length: usize,

    /// Full-text weight of the title column
    #[serde(default = "default_title_weight")]
    pub title_weight: f64,

    /// Full-text weight of the body column
    #[serde(default = "default_body_weight")]
    pub body_weight: f64,

    /// Budget for a single embedding or store call, in milliseconds
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,
}

impl Default for SearchBehaviorConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            min_similarity: default_min_similarity(),
            snippet_length: default_snippet_length(),
            min_text_length: default_min_text_length(),
            title_weight: default_title_weight(),
            body_weight: default_body_weight(),
            provider_timeout_ms: default_provider_timeout_ms(),
        }
    }
}

impl SearchBehaviorConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    /// Resolve a requested limit against the default and the cap
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_limit).min(self.max_limit)
    }
}

fn default_limit() -> usize {
    10
}

fn default_max_limit() -> usize {
    100
}

fn default_min_similarity() -> f32 {
    0.5
}

fn default_snippet_length() -> usize {
    200
}

fn default_min_text_length() -> usize {
    10
}

fn default_title_weight() -> f64 {
    2.0
}

fn default_body_weight() -> f64 {
    1.0
}

fn default_provider_timeout_ms() -> u64 {
    10_000
}

/// Weights applied to each engine's native score during fusion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,

    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            lexical_weight: default_lexical_weight(),
            semantic_weight: default_semantic_weight(),
        }
    }
}

fn default_lexical_weight() -> f64 {
    0.6
}

fn default_semantic_weight() -> f64 {
    0.4
}

/// Paths configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    /// SQLite database path
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

impl PathsConfig {
    /// Get database path, using default if not specified
    pub fn get_db_path(&self) -> PathBuf {
        if let Some(ref path) = self.db_path {
            return path.clone();
        }

        SearchConfig::config_dir().join("search.db")
    }
}

impl SearchConfig {
    /// Load configuration from file and environment
    /// Priority: environment variables > config.toml > defaults
    pub fn load() -> SearchResult<Self> {
        let mut config = Self::default();

        let toml_path = Self::config_path();
        if toml_path.exists() {
            let content = std::fs::read_to_string(&toml_path)?;
            config = toml::from_str::<SearchConfig>(&content)
                .map_err(|e| SearchError::Config(format!("{}: {}", toml_path.display(), e)))?;
        }

        if let Ok(api_base) = std::env::var("EMBEDDING_API_BASE") {
            config.embedding.api_base = api_base;
        }
        if let Ok(api_key) = std::env::var("EMBEDDING_API_KEY") {
            config.embedding.api_key = Some(api_key);
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Ok(db_path) = std::env::var("ENCOUNTER_SEARCH_DB_PATH") {
            config.paths.db_path = Some(PathBuf::from(db_path));
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> SearchResult<Self> {
        let config = toml::from_str::<SearchConfig>(content)
            .map_err(|e| SearchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject weight and threshold combinations the engines cannot honor
    pub fn validate(&self) -> SearchResult<()> {
        let fusion = &self.fusion;
        for (name, weight) in [
            ("fusion.lexical_weight", fusion.lexical_weight),
            ("fusion.semantic_weight", fusion.semantic_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(SearchError::Config(format!(
                    "{name} must be a non-negative number, got {weight}"
                )));
            }
        }

        let search = &self.search;
        if !(search.title_weight > search.body_weight) || search.body_weight <= 0.0 {
            return Err(SearchError::Config(format!(
                "search.title_weight ({}) must be greater than a positive search.body_weight ({})",
                search.title_weight, search.body_weight
            )));
        }
        if !(-1.0..=1.0).contains(&search.min_similarity) {
            return Err(SearchError::Config(format!(
                "search.min_similarity must lie in [-1, 1], got {}",
                search.min_similarity
            )));
        }
        if search.snippet_length == 0 {
            return Err(SearchError::Config(
                "search.snippet_length must be positive".to_string(),
            ));
        }
        if search.default_limit > search.max_limit {
            return Err(SearchError::Config(format!(
                "search.default_limit ({}) exceeds search.max_limit ({})",
                search.default_limit, search.max_limit
            )));
        }
        Ok(())
    }

    /// Get base config directory
    fn config_dir() -> PathBuf {
        if let Ok(root) = std::env::var("ENCOUNTER_SEARCH_ROOT") {
            return PathBuf::from(root);
        }

        dirs::home_dir()
            .map(|h| h.join(".encounter-search"))
            .unwrap_or_else(|| PathBuf::from(".encounter-search"))
    }

    /// Get config file path (config.toml)
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = SearchConfig::default();
        assert_eq!(config.fusion.lexical_weight, 0.6);
        assert_eq!(config.fusion.semantic_weight, 0.4);
        assert_eq!(config.search.min_similarity, 0.5);
        assert_eq!(config.search.snippet_length, 200);
        assert_eq!(config.search.min_text_length, 10);
        assert!(config.search.title_weight > config.search.body_weight);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SearchConfig::from_toml_str(
            r#"
            [fusion]
            lexical_weight = 0.7

            [search]
            min_similarity = 0.3
            "#,
        )
        .expect("config should parse");

        assert_eq!(config.fusion.lexical_weight, 0.7);
        assert_eq!(config.fusion.semantic_weight, 0.4);
        assert_eq!(config.search.min_similarity, 0.3);
        assert_eq!(config.search.default_limit, 10);
    }

    #[test]
    fn test_title_must_outweigh_body() {
        let result = SearchConfig::from_toml_str(
            r#"
            [search]
            title_weight = 1.0
            body_weight = 1.0
            "#,
        );
        assert!(matches!(result, Err(SearchError::Config(_))));
    }

    #[test]
    fn test_negative_fusion_weight_rejected() {
        let mut config = SearchConfig::default();
        config.fusion.semantic_weight = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_limit_is_capped() {
        let behavior = SearchBehaviorConfig::default();
        assert_eq!(behavior.effective_limit(None), 10);
        assert_eq!(behavior.effective_limit(Some(0)), 0);
        assert_eq!(behavior.effective_limit(Some(5000)), 100);
    }
}
