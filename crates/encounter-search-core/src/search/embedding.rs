//! Embedding providers

use async_trait::async_trait;

use super::error::{SearchError, SearchResult};

/// Converts text into a fixed-dimension vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> SearchResult<Vec<f32>>;

    fn dimensions(&self) -> usize;

    fn provider_name(&self) -> &str;
}

/// Provider for deployments without an embedding backend.
///
/// Every call fails, so indexing stores items without embeddings and search
/// degrades to lexical-only.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledEmbeddingProvider;

#[async_trait]
impl EmbeddingProvider for DisabledEmbeddingProvider {
    async fn embed(&self, _text: &str) -> SearchResult<Vec<f32>> {
        Err(SearchError::ProviderUnavailable(
            "no embedding provider configured".to_string(),
        ))
    }

    fn dimensions(&self) -> usize {
        0
    }

    fn provider_name(&self) -> &str {
        "disabled"
    }
}

/// Cosine similarity in `[-1, 1]`; `None` when the vectors cannot be compared
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

#[cfg(feature = "http-embeddings")]
pub use http::EmbeddingClient;

#[cfg(feature = "http-embeddings")]
mod http {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::Client;
    use serde::{Deserialize, Serialize};

    use super::EmbeddingProvider;
    use crate::search::config::EmbeddingConfig;
    use crate::search::error::{SearchError, SearchResult};

    /// OpenAI-compatible embedding API client
    pub struct EmbeddingClient {
        config: EmbeddingConfig,
        client: Client,
        /// Actual dimensions detected from API response (0 = not yet detected)
        actual_dimensions: AtomicUsize,
    }

    #[derive(Debug, Serialize)]
    struct EmbeddingRequest<'a> {
        model: &'a str,
        input: &'a [String],
        /// Only sent for models that support it (e.g. text-embedding-3-*)
        #[serde(skip_serializing_if = "Option::is_none")]
        dimensions: Option<usize>,
    }

    #[derive(Debug, Deserialize)]
    struct EmbeddingResponse {
        data: Vec<EmbeddingData>,
    }

    #[derive(Debug, Deserialize)]
    struct EmbeddingData {
        embedding: Vec<f32>,
        index: usize,
    }

    #[derive(Debug, Deserialize)]
    struct ErrorResponse {
        error: ErrorDetail,
    }

    #[derive(Debug, Deserialize)]
    struct ErrorDetail {
        message: String,
    }

    // Most embedding APIs cap input around 8K tokens; chars are a cheap proxy
    const MAX_CHARS: usize = 8000;

    impl EmbeddingClient {
        /// Create a new embedding client
        pub fn new(config: EmbeddingConfig) -> SearchResult<Self> {
            config.get_api_key()?;

            let client = Client::builder()
                .timeout(Duration::from_secs(config.request_timeout_secs))
                .build()?;

            Ok(Self {
                config,
                client,
                actual_dimensions: AtomicUsize::new(0),
            })
        }

        async fn request(&self, texts: &[String]) -> SearchResult<Vec<Vec<f32>>> {
            let api_key = self.config.get_api_key()?;
            let url = format!("{}/embeddings", self.config.api_base.trim_end_matches('/'));

            let input: Vec<String> = texts
                .iter()
                .map(|t| {
                    if t.chars().count() > MAX_CHARS {
                        t.chars().take(MAX_CHARS).collect()
                    } else {
                        t.clone()
                    }
                })
                .collect();

            let dimensions = if self.config.model.starts_with("text-embedding-3") {
                Some(self.config.dimensions)
            } else {
                None
            };

            let request = EmbeddingRequest {
                model: &self.config.model,
                input: &input,
                dimensions,
            };

            let response = self
                .client
                .post(&url)
                .bearer_auth(api_key)
                .json(&request)
                .send()
                .await?;

            let status = response.status();
            let body = response.text().await?;

            if !status.is_success() {
                if let Ok(error_response) = serde_json::from_str::<ErrorResponse>(&body) {
                    return Err(SearchError::Embedding(error_response.error.message));
                }
                return Err(SearchError::Embedding(format!(
                    "API error ({}): {}",
                    status, body
                )));
            }

            let response: EmbeddingResponse = serde_json::from_str(&body)?;
            if response.data.len() != texts.len() {
                return Err(SearchError::Embedding(format!(
                    "Embedding count mismatch: sent {} texts, got {} embeddings",
                    texts.len(),
                    response.data.len()
                )));
            }

            let mut data = response.data;
            data.sort_by_key(|d| d.index);

            if let Some(first) = data.first() {
                let detected = first.embedding.len();
                let current = self.actual_dimensions.load(Ordering::Relaxed);
                if current == 0 {
                    self.actual_dimensions.store(detected, Ordering::Relaxed);
                    log::info!("[Embedding] Auto-detected embedding dimensions: {}", detected);
                } else if current != detected {
                    log::warn!(
                        "[Embedding] Dimension mismatch: expected {}, got {}",
                        current,
                        detected
                    );
                }
            }

            Ok(data.into_iter().map(|d| d.embedding).collect())
        }
    }

    #[async_trait]
    impl EmbeddingProvider for EmbeddingClient {
        async fn embed(&self, text: &str) -> SearchResult<Vec<f32>> {
            self.request(&[text.to_string()])
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| SearchError::Embedding("No embedding returned".to_string()))
        }

        /// Detected dimensions once a response has been seen, configured ones before
        fn dimensions(&self) -> usize {
            match self.actual_dimensions.load(Ordering::Relaxed) {
                0 => self.config.dimensions,
                actual => actual,
            }
        }

        fn provider_name(&self) -> &str {
            &self.config.model
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_of_identical_vectors_is_one() {
        let v = [0.3, 0.4, 0.5];
        let sim = cosine_similarity(&v, &v).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_of_orthogonal_vectors_is_zero() {
        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 2.0]).unwrap();
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_of_opposite_vectors_is_negative() {
        let sim = cosine_similarity(&[1.0, 1.0], &[-1.0, -1.0]).unwrap();
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_rejects_mismatched_or_zero_vectors() {
        assert!(cosine_similarity(&[1.0, 0.0], &[1.0]).is_none());
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).is_none());
        assert!(cosine_similarity(&[], &[]).is_none());
    }

    #[tokio::test]
    async fn test_disabled_provider_always_fails() {
        let provider = DisabledEmbeddingProvider;
        let err = provider.embed("anything").await.unwrap_err();
        assert!(matches!(err, SearchError::ProviderUnavailable(_)));
        assert_eq!(provider.provider_name(), "disabled");
    }
}
