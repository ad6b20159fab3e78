//! Test search with fallback and caching.
//!
//! Wraps the core ranking function: picks the effective mode (hybrid or
//! vector only when the index has vectors and the query embeds), serves
//! fresh cached outcomes, and falls back to a stale cached outcome when
//! the store is degraded.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use knowledge_engine_core::embedding::{embed_one, Embedder};
use knowledge_engine_core::error::{EngineError, EngineResult};
use knowledge_engine_core::query::ChunkFilter;
use knowledge_engine_core::search::{
    search, validate_request, SearchMode, SearchOutcome, SearchParams, SearchRequest,
};
use knowledge_engine_core::store::Store;

use crate::cache::{CacheKey, SearchCache};

/// A search as submitted by a caller.
#[derive(Debug, Clone, Serialize)]
pub struct TestSearch {
    pub index: String,
    pub query: String,
    pub limit: usize,
    pub filter: ChunkFilter,
    /// Requested mode; may fall back to lexical.
    pub mode: SearchMode,
    pub explain: bool,
}

pub struct SearchService {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    params: SearchParams,
    cache: Arc<SearchCache>,
    embed_timeout: Duration,
}

impl SearchService {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        params: SearchParams,
        cache: Arc<SearchCache>,
        embed_timeout: Duration,
    ) -> EngineResult<Self> {
        params.validate()?;
        Ok(Self {
            store,
            embedder,
            params,
            cache,
            embed_timeout,
        })
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    pub fn cache(&self) -> &SearchCache {
        &self.cache
    }

    pub async fn test_search(&self, req: &TestSearch) -> EngineResult<SearchOutcome> {
        validate_request(&req.query, req.limit, &req.filter)?;
        let key = CacheKey::new(
            &req.index,
            &req.query,
            req.limit,
            &req.filter,
            req.mode,
            req.explain,
        );

        if let Some(outcome) = self.cache.get(&key) {
            debug!(index = %req.index, "search served from cache");
            return Ok(outcome);
        }

        let generation = self.cache.generation(&req.index);
        match self.run(req).await {
            Ok(outcome) => {
                self.cache.put(key, outcome.clone(), generation);
                Ok(outcome)
            }
            Err(e) if e.is_infrastructure() => match self.cache.get_stale(&key) {
                Some(outcome) => {
                    warn!(index = %req.index, error = %e, "store degraded; serving stale results");
                    Ok(outcome)
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    async fn run(&self, req: &TestSearch) -> EngineResult<SearchOutcome> {
        let (mode, query_vec, fallback_reason) = self.plan(req).await?;
        if let Some(reason) = &fallback_reason {
            debug!(index = %req.index, requested = %req.mode, reason = %reason, "search fell back to lexical");
        }

        search(
            self.store.as_ref(),
            &SearchRequest {
                index: &req.index,
                query: &req.query,
                query_vec: query_vec.as_deref(),
                mode,
                fallback_reason,
                filter: &req.filter,
                limit: req.limit,
                explain: req.explain,
                params: self.params,
            },
        )
        .await
    }

    /// Decide the effective mode and embed the query when it needs one.
    async fn plan(
        &self,
        req: &TestSearch,
    ) -> EngineResult<(SearchMode, Option<Vec<f32>>, Option<String>)> {
        if req.mode == SearchMode::Lexical {
            return Ok((SearchMode::Lexical, None, None));
        }
        if !self.embedder.is_enabled() {
            return Ok(lexical_fallback("embedding provider is disabled"));
        }
        if self.store.vector_count(&req.index).await? == 0 {
            return Ok(lexical_fallback("index has no embedded chunks"));
        }

        let embedded =
            tokio::time::timeout(self.embed_timeout, embed_one(self.embedder.as_ref(), &req.query))
                .await
                .unwrap_or_else(|_| {
                    Err(EngineError::embedding_unavailable(
                        "query",
                        format!("timed out after {:?}", self.embed_timeout),
                    ))
                });
        match embedded {
            Ok(vector) => Ok((req.mode, Some(vector), None)),
            Err(e) => {
                warn!(index = %req.index, error = %e, "query embedding failed");
                Ok(lexical_fallback(&format!("query embedding failed: {}", e)))
            }
        }
    }
}

fn lexical_fallback(reason: &str) -> (SearchMode, Option<Vec<f32>>, Option<String>) {
    (SearchMode::Lexical, None, Some(reason.to_string()))
}
