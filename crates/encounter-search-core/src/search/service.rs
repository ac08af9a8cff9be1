//! Search service: the entry point used by the encounter application

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use super::config::{EmbeddingConfig, SearchConfig};
use super::content_store::{ContentStore, FieldWeights, SqliteContentStore};
use super::database::Database;
use super::embedding::{DisabledEmbeddingProvider, EmbeddingProvider};
use super::error::SearchResult;
use super::fusion::ResultFusion;
use super::indexer::Indexer;
use super::lexical::LexicalSearchEngine;
use super::query_recorder::QueryRecorder;
use super::semantic::SemanticSearchEngine;
use super::snippet::SnippetGenerator;
use super::sources::EncounterSource;
use super::types::{
    AnalyticsSummary, CachedResult, ContentType, FusedResult, IndexRequest, IndexResponse,
    ReindexRequest, ReindexResponse, SearchHit, SearchInvocation, SearchRequest, SearchResponse,
};

/// Hybrid search over encounter content
pub struct SearchService {
    config: SearchConfig,
    indexer: Indexer,
    lexical: LexicalSearchEngine,
    semantic: SemanticSearchEngine,
    fusion: ResultFusion,
    snippets: SnippetGenerator,
    recorder: QueryRecorder,
}

impl SearchService {
    /// Assemble a service from its collaborators
    pub fn new(
        store: Arc<dyn ContentStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        recorder: QueryRecorder,
        config: SearchConfig,
    ) -> SearchResult<Self> {
        config.validate()?;

        let behavior = &config.search;
        let timeout = behavior.provider_timeout();
        let snippets = SnippetGenerator::new(behavior.snippet_length);
        let weights = FieldWeights {
            title: behavior.title_weight,
            body: behavior.body_weight,
        };

        log::info!(
            "[Search] Using store {} with embedding provider {}",
            store.store_name(),
            embedder.provider_name()
        );

        Ok(Self {
            indexer: Indexer::new(
                store.clone(),
                embedder.clone(),
                behavior.min_text_length,
                timeout,
            ),
            lexical: LexicalSearchEngine::new(store.clone(), weights, timeout, snippets),
            semantic: SemanticSearchEngine::new(
                store,
                embedder,
                behavior.min_similarity,
                timeout,
                snippets,
            ),
            fusion: ResultFusion::new(config.fusion),
            snippets,
            recorder,
            config,
        })
    }

    /// Open the SQLite database named by the configuration and the
    /// configured embedding provider.
    ///
    /// Without an API key the service runs lexical-only.
    pub fn open(config: SearchConfig) -> SearchResult<Self> {
        let db = Database::open(config.paths.get_db_path())?;
        let embedder = configured_embedder(&config.embedding);
        Self::with_database(db, embedder, config)
    }

    /// Build a service whose store and recorder share one database
    pub fn with_database(
        db: Database,
        embedder: Arc<dyn EmbeddingProvider>,
        config: SearchConfig,
    ) -> SearchResult<Self> {
        let store = Arc::new(SqliteContentStore::new(db.clone()));
        Self::new(store, embedder, QueryRecorder::new(db), config)
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Run a hybrid search and record it.
    ///
    /// Only malformed input is an error. Engine failures shrink the result
    /// set; a failure to record is logged and the results are still returned.
    pub async fn search(
        &self,
        request: SearchRequest,
        requested_by: Option<&str>,
    ) -> SearchResult<SearchResponse> {
        let start = Instant::now();
        let filters = request.filters.validate()?;
        let limit = self.config.search.effective_limit(request.limit);
        let query = request.query.trim();

        let fused = if query.is_empty() || limit == 0 {
            vec![]
        } else {
            let (lexical, semantic) = tokio::join!(
                self.lexical.search(query, &filters, limit),
                self.semantic.search(query, &filters, limit),
            );
            log::debug!(
                "[Search] {} lexical, {} semantic hits for {:?}",
                lexical.len(),
                semantic.len(),
                query
            );
            let mut fused = self.fusion.combine(lexical, semantic, limit);
            self.annotate_snippets(&mut fused, query);
            fused
        };

        let execution_time_ms = start.elapsed().as_millis().min(u64::MAX as u128) as u64;
        let invocation = SearchInvocation {
            id: Uuid::new_v4().to_string(),
            query_text: request.query.clone(),
            filters,
            requested_by: requested_by.map(str::to_string),
            result_count: fused.len(),
            execution_time_ms,
            created_at: Utc::now(),
        };
        if let Err(e) = self.recorder.record(&invocation, &fused).await {
            log::warn!("[Search] Failed to record invocation {}: {}", invocation.id, e);
        }

        let results: Vec<SearchHit> = fused
            .into_iter()
            .map(|r| SearchHit {
                content_type: r.item.content_type,
                content_id: r.item.content_id,
                encounter_id: r.item.encounter_id,
                title: r.item.title,
                snippet: r.snippet,
                score: r.combined_score,
                search_type: r.search_type,
            })
            .collect();

        Ok(SearchResponse {
            total_count: results.len(),
            results,
            execution_time_ms,
            invocation_id: invocation.id,
        })
    }

    /// Give every fused result the query-centred window of its text
    fn annotate_snippets(&self, results: &mut [FusedResult], query: &str) {
        for result in results {
            result.snippet = self.snippets.snippet(&result.item.text, query);
        }
    }

    /// Index or update one piece of content
    pub async fn index(&self, request: IndexRequest) -> SearchResult<IndexResponse> {
        let indexed = self
            .indexer
            .index_content(
                request.encounter_id,
                request.content_type,
                &request.content_id,
                &request.title,
                &request.text,
                request.metadata.unwrap_or_default(),
            )
            .await?;
        Ok(IndexResponse {
            indexed: indexed.is_some(),
        })
    }

    pub async fn reindex_encounter(
        &self,
        request: ReindexRequest,
        source: &dyn EncounterSource,
    ) -> SearchResult<ReindexResponse> {
        let counts = self
            .indexer
            .reindex_encounter(request.encounter_id, source)
            .await?;
        Ok(ReindexResponse { counts })
    }

    pub async fn remove_content(
        &self,
        content_type: ContentType,
        content_id: &str,
    ) -> SearchResult<bool> {
        self.indexer.remove_content(content_type, content_id).await
    }

    /// Search activity over the last `days` days
    pub async fn analytics(&self, days: u32) -> SearchResult<AnalyticsSummary> {
        self.recorder.analytics(days).await
    }

    pub async fn cached_results(&self, invocation_id: &str) -> SearchResult<Vec<CachedResult>> {
        self.recorder.cached_results(invocation_id).await
    }

    pub async fn invocation(&self, invocation_id: &str) -> SearchResult<Option<SearchInvocation>> {
        self.recorder.invocation(invocation_id).await
    }
}

#[cfg(feature = "http-embeddings")]
fn configured_embedder(config: &EmbeddingConfig) -> Arc<dyn EmbeddingProvider> {
    match super::embedding::EmbeddingClient::new(config.clone()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            log::warn!("[Search] Semantic search disabled: {}", e);
            Arc::new(DisabledEmbeddingProvider)
        }
    }
}

#[cfg(not(feature = "http-embeddings"))]
fn configured_embedder(_config: &EmbeddingConfig) -> Arc<dyn EmbeddingProvider> {
    Arc::new(DisabledEmbeddingProvider)
}
