//! Administrative surface.
//!
//! [`AdminService`] is the single entry point the CLI (or any other
//! frontend) talks to. It wires the store, embedder, orchestrator, search
//! service, and quality enforcer together and exposes every chunk, index,
//! quality, search, and saved-query operation.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use knowledge_engine_core::chunk::ChunkerConfig;
use knowledge_engine_core::embedding::Embedder;
use knowledge_engine_core::error::{EngineError, EngineResult, EntityKind};
use knowledge_engine_core::models::{
    format_ts_iso, now_ts, Chunk, ChunkPatch, IndexConfig, IndexHealth, IndexRecord, IndexStats,
    SavedQuery,
};
use knowledge_engine_core::projection::{project_2d, ProjectedPoint};
use knowledge_engine_core::quality::{
    quality_metrics, validate_chunks, HeuristicScores, QualityConfig, QualityMetrics,
    QualityVerdict, ValidationReport,
};
use knowledge_engine_core::query::{
    ChunkFilter, ChunkPage, ChunkQuery, ChunkSort, Page, SortDirection, SortField,
    MAX_PAGE_LIMIT,
};
use knowledge_engine_core::search::{SearchMode, SearchOutcome, SearchParams};
use knowledge_engine_core::store::Store;

use crate::cache::{CacheStats, SearchCache};
use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::migrate;
use crate::orchestrator::{
    AutoIndexOptions, AutoIndexReport, IngestReport, NewDocument, Orchestrator, ReindexOptions,
    ReindexReport,
};
use crate::search_service::{SearchService, TestSearch};
use crate::sqlite_store::SqliteStore;

/// Largest projection sample.
pub const MAX_SAMPLE: usize = 2000;

/// Input for [`AdminService::save_query`].
#[derive(Debug, Clone)]
pub struct NewSavedQuery {
    pub name: String,
    pub query: String,
    pub index: String,
    pub filter: ChunkFilter,
    pub limit: usize,
    pub notes: Option<String>,
}

/// Result of scoring arbitrary content.
#[derive(Debug, Clone, Serialize)]
pub struct ContentEvaluation {
    pub threshold: f64,
    pub verdict: QualityVerdict,
    pub heuristics: HeuristicScores,
}

/// Active quality settings plus each index's threshold.
#[derive(Debug, Clone, Serialize)]
pub struct QualitySettings {
    pub config: QualityConfig,
    pub thresholds: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexSnapshot {
    pub config: IndexConfig,
    pub created_at: String,
    pub last_reindex_at: Option<String>,
    pub stats: Option<IndexStats>,
    pub health: IndexHealth,
}

/// Point-in-time export of every index and the active configuration.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub generated_at: String,
    pub indexes: Vec<IndexSnapshot>,
    pub quality: QualityConfig,
    pub retrieval: SearchParams,
    pub chunking: ChunkerConfig,
    pub saved_queries: Vec<SavedQuery>,
}

pub struct AdminService {
    store: Arc<dyn Store>,
    orchestrator: Orchestrator,
    search: SearchService,
    config: Config,
}

impl AdminService {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn Embedder>, config: &Config) -> EngineResult<Self> {
        let cache = Arc::new(SearchCache::new(
            Duration::from_secs(config.cache.ttl_secs),
            config.cache.max_entries,
        ));
        let orchestrator =
            Orchestrator::new(Arc::clone(&store), Arc::clone(&embedder), config, Arc::clone(&cache))?;
        let search = SearchService::new(
            Arc::clone(&store),
            embedder,
            config.retrieval.params(),
            cache,
            orchestrator.settings().timeout,
        )?;
        Ok(Self {
            store,
            orchestrator,
            search,
            config: config.clone(),
        })
    }

    /// Open the configured SQLite database, apply migrations, and build
    /// the configured embedder.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));
        let embedder = create_embedder(&config.embedding)?;
        Ok(Self::new(store, embedder, config)?)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    async fn require_index(&self, name: &str) -> EngineResult<IndexRecord> {
        self.store
            .get_index(name)
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::Index, name))
    }

    // ============ Indexes ============

    pub async fn list_indexes(&self) -> EngineResult<Vec<IndexRecord>> {
        self.store.list_indexes().await
    }

    /// Create an index, or update the threshold of an existing one.
    pub async fn create_index(
        &self,
        name: &str,
        quality_threshold: Option<f64>,
    ) -> EngineResult<IndexRecord> {
        match self.store.get_index(name).await? {
            Some(record) => match quality_threshold {
                Some(t) if t != record.config.quality_threshold => {
                    let updated = self
                        .store
                        .create_index(&IndexConfig {
                            quality_threshold: t,
                            ..record.config
                        })
                        .await?;
                    self.orchestrator.cache().invalidate(name);
                    Ok(updated)
                }
                _ => Ok(record),
            },
            None => self.orchestrator.ensure_index(name, quality_threshold).await,
        }
    }

    /// Create every index declared under `[[indexes]]`.
    pub async fn init_indexes(&self) -> EngineResult<Vec<IndexRecord>> {
        let mut records = Vec::new();
        for entry in &self.config.indexes {
            records.push(self.create_index(&entry.name, entry.quality_threshold).await?);
        }
        if let Some(knowledge) = &self.config.knowledge {
            records.push(self.orchestrator.ensure_index(&knowledge.index, None).await?);
        }
        Ok(records)
    }

    pub async fn index_stats(&self, index: &str) -> EngineResult<IndexStats> {
        self.require_index(index).await?;
        self.store.index_stats(index).await
    }

    /// Health of one index. An unreachable store yields a degraded verdict
    /// rather than an error.
    pub async fn index_health(&self, index: &str) -> EngineResult<IndexHealth> {
        let record = match self.require_index(index).await {
            Ok(record) => record,
            Err(e) if e.is_infrastructure() => return Ok(IndexHealth::unreachable(index, e.to_string())),
            Err(e) => return Err(e),
        };
        match self.store.index_stats(index).await {
            Ok(stats) => Ok(IndexHealth::assess(&record, stats)),
            Err(e) if e.is_infrastructure() => Ok(IndexHealth::unreachable(index, e.to_string())),
            Err(e) => Err(e),
        }
    }

    pub async fn reindex(&self, index: &str, options: &ReindexOptions) -> EngineResult<ReindexReport> {
        self.orchestrator.reindex(index, options).await
    }

    pub async fn reindex_all(&self, options: &ReindexOptions) -> EngineResult<Vec<ReindexReport>> {
        self.orchestrator.reindex_all(options).await
    }

    pub async fn clear_index(&self, index: &str) -> EngineResult<u64> {
        self.orchestrator.clear_index(index).await
    }

    /// Reindex options using the configured embedding concurrency.
    pub fn reindex_options(&self) -> ReindexOptions {
        ReindexOptions::with_concurrency(self.orchestrator.settings().concurrency)
    }

    pub async fn export_snapshot(&self) -> EngineResult<Snapshot> {
        let mut indexes = Vec::new();
        for record in self.store.list_indexes().await? {
            let name = record.config.name.clone();
            let health = self.index_health(&name).await?;
            indexes.push(IndexSnapshot {
                stats: health.stats.clone(),
                health,
                created_at: format_ts_iso(record.created_at),
                last_reindex_at: record.last_reindex_at.map(format_ts_iso),
                config: record.config,
            });
        }
        Ok(Snapshot {
            generated_at: format_ts_iso(now_ts()),
            indexes,
            quality: self.orchestrator.enforcer().config().clone(),
            retrieval: *self.search.params(),
            chunking: self.config.chunking.chunker(),
            saved_queries: self.store.list_saved_queries(None).await?,
        })
    }

    // ============ Chunks ============

    pub async fn list_chunks(&self, index: &str, query: &ChunkQuery) -> EngineResult<ChunkPage> {
        query.validate()?;
        self.require_index(index).await?;
        self.store.list_chunks(index, query).await
    }

    pub async fn get_chunk(&self, id: &str) -> EngineResult<Chunk> {
        self.store
            .get_chunk(id)
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::Chunk, id))
    }

    pub async fn update_chunk(&self, id: &str, patch: &ChunkPatch) -> EngineResult<Chunk> {
        self.orchestrator.update_chunk(id, patch).await
    }

    pub async fn delete_chunk(&self, id: &str) -> EngineResult<Chunk> {
        self.orchestrator.delete_chunk(id).await
    }

    pub async fn reembed_chunk(&self, id: &str) -> EngineResult<Chunk> {
        self.orchestrator.reembed_chunk(id).await
    }

    /// Project up to `n` stored vectors of `index` to 2D.
    pub async fn embedding_sample(&self, index: &str, n: usize) -> EngineResult<Vec<ProjectedPoint>> {
        if n == 0 || n > MAX_SAMPLE {
            return Err(EngineError::Query(format!(
                "sample size must be in 1..={}, got {}",
                MAX_SAMPLE, n
            )));
        }
        self.require_index(index).await?;
        let samples: Vec<(String, String, Vec<f32>)> = self
            .store
            .sample_vectors(index, n)
            .await?
            .into_iter()
            .map(|s| (s.chunk_id, s.label, s.vector))
            .collect();
        Ok(project_2d(&samples))
    }

    /// Scored chunks strictly below `threshold` (default: the index's),
    /// lowest first.
    pub async fn low_quality_chunks(
        &self,
        index: &str,
        threshold: Option<f64>,
        page: Page,
    ) -> EngineResult<ChunkPage> {
        page.validate()?;
        let record = self.require_index(index).await?;
        let threshold = threshold.unwrap_or(record.config.quality_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(EngineError::Query(format!(
                "threshold must be in [0.0, 1.0], got {}",
                threshold
            )));
        }
        if threshold <= 0.0 {
            return Ok(ChunkPage {
                items: Vec::new(),
                total: 0,
                offset: page.offset,
                limit: page.limit,
            });
        }
        let query = ChunkQuery {
            filter: ChunkFilter {
                max_quality: Some(just_below(threshold)),
                ..Default::default()
            },
            sort: ChunkSort {
                field: SortField::QualityScore,
                direction: SortDirection::Asc,
            },
            page,
        };
        self.store.list_chunks(index, &query).await
    }

    // ============ Ingestion ============

    pub async fn ingest_document(&self, doc: NewDocument) -> EngineResult<IngestReport> {
        self.orchestrator.ingest_document(doc).await
    }

    pub async fn auto_index(&self, options: AutoIndexOptions) -> EngineResult<AutoIndexReport> {
        self.orchestrator.auto_index(options).await
    }

    /// Re-run auto-index every `interval` until `shutdown` resolves.
    pub async fn watch_knowledge<F>(
        &self,
        options: AutoIndexOptions,
        interval: Duration,
        shutdown: impl Future<Output = ()>,
        on_pass: F,
    ) -> EngineResult<usize>
    where
        F: FnMut(&AutoIndexReport),
    {
        self.orchestrator
            .watch_knowledge(options, interval, shutdown, on_pass)
            .await
    }

    // ============ Search and saved queries ============

    pub async fn test_search(&self, req: &TestSearch) -> EngineResult<SearchOutcome> {
        self.search.test_search(req).await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.search.cache().stats()
    }

    pub async fn save_query(&self, new: NewSavedQuery) -> EngineResult<SavedQuery> {
        if new.name.trim().is_empty() {
            return Err(EngineError::Query("saved query name must not be blank".into()));
        }
        if new.query.trim().is_empty() {
            return Err(EngineError::Query("query must not be blank".into()));
        }
        if new.limit == 0 || new.limit > MAX_PAGE_LIMIT {
            return Err(EngineError::Query(format!(
                "limit must be in 1..={}, got {}",
                MAX_PAGE_LIMIT, new.limit
            )));
        }
        new.filter.validate()?;
        if self.store.get_index(&new.index).await?.is_none() {
            return Err(EngineError::Query(format!("unknown index '{}'", new.index)));
        }

        let saved = SavedQuery {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name.trim().to_string(),
            query: new.query,
            index: new.index,
            filter: new.filter,
            limit: new.limit,
            notes: new.notes,
            created_at: now_ts(),
        };
        self.store.insert_saved_query(&saved).await?;
        info!(id = %saved.id, name = %saved.name, "saved query created");
        Ok(saved)
    }

    pub async fn list_saved_queries(&self, index: Option<&str>) -> EngineResult<Vec<SavedQuery>> {
        self.store.list_saved_queries(index).await
    }

    pub async fn get_saved_query(&self, id_or_name: &str) -> EngineResult<SavedQuery> {
        self.store
            .get_saved_query(id_or_name)
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::SavedQuery, id_or_name))
    }

    /// Delete by id or name. Returns the deleted query's id.
    pub async fn delete_saved_query(&self, id_or_name: &str) -> EngineResult<String> {
        let saved = self.get_saved_query(id_or_name).await?;
        if !self.store.delete_saved_query(&saved.id).await? {
            return Err(EngineError::not_found(EntityKind::SavedQuery, id_or_name));
        }
        info!(id = %saved.id, name = %saved.name, "saved query deleted");
        Ok(saved.id)
    }

    pub async fn run_saved_query(&self, id_or_name: &str, explain: bool) -> EngineResult<SearchOutcome> {
        let saved = self.get_saved_query(id_or_name).await?;
        self.test_search(&TestSearch {
            index: saved.index,
            query: saved.query,
            limit: saved.limit,
            filter: saved.filter,
            mode: SearchMode::Hybrid,
            explain,
        })
        .await
    }

    // ============ Quality ============

    pub async fn quality_metrics(&self, index: &str) -> EngineResult<QualityMetrics> {
        let record = self.require_index(index).await?;
        let chunks = self.store.chunks_for_index(index).await?;
        Ok(quality_metrics(
            index,
            record.config.quality_threshold,
            &chunks,
        ))
    }

    pub async fn quality_config(&self) -> EngineResult<QualitySettings> {
        let thresholds = self
            .store
            .list_indexes()
            .await?
            .into_iter()
            .map(|r| (r.config.name, r.config.quality_threshold))
            .collect();
        Ok(QualitySettings {
            config: self.orchestrator.enforcer().config().clone(),
            thresholds,
        })
    }

    /// Score arbitrary text without storing it.
    pub fn evaluate_content(&self, text: &str, threshold: Option<f64>) -> EngineResult<ContentEvaluation> {
        let enforcer = self.orchestrator.enforcer();
        let threshold = threshold.unwrap_or(enforcer.config().default_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(EngineError::Query(format!(
                "threshold must be in [0.0, 1.0], got {}",
                threshold
            )));
        }
        let trimmed = text.trim();
        let heuristics = if trimmed.is_empty() {
            HeuristicScores {
                length: 0.0,
                diversity: 0.0,
                boilerplate: 0.0,
                structure: 0.0,
            }
        } else {
            enforcer.heuristics(trimmed)
        };
        Ok(ContentEvaluation {
            threshold,
            verdict: enforcer.evaluate(text, threshold),
            heuristics,
        })
    }

    /// Score every chunk of `index`. Scores are reported, not persisted.
    pub async fn validate_index(&self, index: &str) -> EngineResult<ValidationReport> {
        let record = self.require_index(index).await?;
        let chunks = self.store.chunks_for_index(index).await?;
        let report = validate_chunks(
            index,
            record.config.quality_threshold,
            &chunks,
            self.orchestrator.enforcer(),
        );
        if report.errored > 0 {
            warn!(index, errored = report.errored, "validation isolated chunk errors");
        }
        Ok(report)
    }
}

/// The largest `f64` strictly below a positive `t`.
fn just_below(t: f64) -> f64 {
    f64::from_bits(t.to_bits() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_just_below() {
        assert!(just_below(0.5) < 0.5);
        assert!(just_below(0.5) > 0.4999999);
        assert!(just_below(1.0) < 1.0);
    }
}
