//! Indexing orchestrator.
//!
//! Drives each document through `received → chunked → embedding → scoring
//! → stored`, recording the stage and cause on the document when a step
//! fails. Embedding runs in bounded parallel batches with retry and a
//! per-call timeout. Single-chunk work (reembed, reindex units, deletes,
//! edits) runs under a per-chunk lock so concurrent requests for one chunk
//! apply in submission order, and result writes are conditional so a
//! deleted chunk is never written back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use knowledge_engine_core::chunk::{chunk_text, content_hash, ChunkerConfig};
use knowledge_engine_core::embedding::Embedder;
use knowledge_engine_core::error::{EngineError, EngineResult, EntityKind};
use knowledge_engine_core::extract::extract_text;
use knowledge_engine_core::models::{
    now_ts, Chunk, ChunkPatch, ChunkState, Document, DocumentFormat, DocumentStatus, IndexConfig,
    IndexRecord, StageFailure,
};
use knowledge_engine_core::quality::{OverridePolicy, QualityEnforcer};
use knowledge_engine_core::store::{ChunkWrite, Store};

use crate::cache::SearchCache;
use crate::config::{Config, EmbeddingConfig, KnowledgeConfig};
use crate::knowledge::{scan_knowledge, KnowledgeFile};
use crate::locks::KeyedLocks;

/// Retry, batching, and timeout settings for embedding calls.
#[derive(Debug, Clone, Copy)]
pub struct EmbedSettings {
    pub batch_size: usize,
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_base: Duration,
    pub timeout: Duration,
}

impl From<&EmbeddingConfig> for EmbedSettings {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            concurrency: config.concurrency.max(1),
            max_retries: config.max_retries,
            retry_base: Duration::from_millis(config.retry_base_ms),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        }
    }
}

/// Content submitted for ingestion.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub index: String,
    pub source: String,
    /// Detected from `source` when absent.
    pub format: Option<DocumentFormat>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub index: String,
    pub source: String,
    pub status: DocumentStatus,
    pub chunk_count: usize,
    /// Chunks left waiting for an embedding.
    pub unembedded: usize,
    pub failure: Option<StageFailure>,
}

/// Per-run reindex options.
#[derive(Debug, Clone)]
pub struct ReindexOptions {
    pub concurrency: usize,
    /// Checked before each chunk unit starts.
    pub cancel: Arc<AtomicBool>,
}

impl ReindexOptions {
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkFailure {
    pub chunk_id: String,
    pub code: String,
    pub message: String,
}

impl ChunkFailure {
    fn new(chunk_id: &str, err: &EngineError) -> Self {
        Self {
            chunk_id: chunk_id.to_string(),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Per-chunk outcome of a reindex run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReindexReport {
    pub index: String,
    pub total: usize,
    pub updated: Vec<String>,
    pub failed: Vec<ChunkFailure>,
    /// Deleted while the run was in flight.
    pub deleted: Vec<String>,
    /// Still being ingested; their ingestion scores them.
    pub skipped: Vec<String>,
    /// Not started because of cancellation or an abort.
    pub not_reached: Vec<String>,
    pub cancelled: bool,
    /// Set when the store became unreachable.
    pub aborted: Option<String>,
    pub started_at: i64,
    pub finished_at: i64,
}

impl ReindexReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.not_reached.is_empty() && self.aborted.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AutoIndexOptions {
    /// Re-ingest sources whose content hash is unchanged.
    pub force: bool,
    /// Overrides `[knowledge] batch_size`.
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceFailure {
    pub source: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AutoIndexReport {
    pub index: String,
    pub scanned: usize,
    pub indexed: Vec<String>,
    pub skipped: Vec<String>,
    /// Sources whose previous document was replaced.
    pub replaced: Vec<String>,
    pub failed: Vec<SourceFailure>,
}

enum ChunkOutcome {
    Updated,
    Deleted,
    Skipped,
    /// A later request for the chunk already ran.
    Superseded,
}

enum UnitResult {
    Updated,
    Deleted,
    Skipped,
    Failed(ChunkFailure),
    NotReached,
}

enum FileOutcome {
    Indexed { replaced: bool },
    Skipped,
}

/// An ingestion error together with the stage it interrupted.
struct StageError {
    stage: DocumentStatus,
    error: EngineError,
}

fn at(stage: DocumentStatus) -> impl FnOnce(EngineError) -> StageError {
    move |error| StageError { stage, error }
}

pub struct Orchestrator {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    enforcer: QualityEnforcer,
    chunker: ChunkerConfig,
    settings: EmbedSettings,
    knowledge: Option<KnowledgeConfig>,
    default_threshold: f64,
    locks: KeyedLocks,
    cache: Arc<SearchCache>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        config: &Config,
        cache: Arc<SearchCache>,
    ) -> EngineResult<Self> {
        let chunker = config.chunking.chunker();
        chunker.validate()?;
        Ok(Self {
            store,
            embedder,
            enforcer: QualityEnforcer::new(config.quality.enforcer_config())?,
            chunker,
            settings: EmbedSettings::from(&config.embedding),
            knowledge: config.knowledge.clone(),
            default_threshold: config.quality.threshold,
            locks: KeyedLocks::new(),
            cache,
        })
    }

    pub fn enforcer(&self) -> &QualityEnforcer {
        &self.enforcer
    }

    pub fn settings(&self) -> EmbedSettings {
        self.settings
    }

    pub(crate) fn cache(&self) -> &SearchCache {
        &self.cache
    }

    async fn require_index(&self, name: &str) -> EngineResult<IndexRecord> {
        self.store
            .get_index(name)
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::Index, name))
    }

    /// Create `name` with the current embedder's model if it does not exist.
    pub async fn ensure_index(
        &self,
        name: &str,
        quality_threshold: Option<f64>,
    ) -> EngineResult<IndexRecord> {
        if let Some(record) = self.store.get_index(name).await? {
            return Ok(record);
        }
        let record = self
            .store
            .create_index(&IndexConfig {
                name: name.to_string(),
                embedding_model: self.embedder.model_version().to_string(),
                quality_threshold: quality_threshold.unwrap_or(self.default_threshold),
            })
            .await?;
        info!(index = name, "index created");
        Ok(record)
    }

    // ============ Embedding ============

    /// One embedding call with timeout, retried with exponential backoff
    /// while the failure is retryable.
    async fn embed_with_retry(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        let mut attempt: u32 = 0;
        loop {
            let result =
                match tokio::time::timeout(self.settings.timeout, self.embedder.embed(texts)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::embedding_unavailable(
                        self.embedder.model_version(),
                        format!("timed out after {:?}", self.settings.timeout),
                    )),
                };
            match result {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_retryable() && attempt < self.settings.max_retries => {
                    let delay = self.settings.retry_base * 2u32.pow(attempt.min(10));
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.settings.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "embedding failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Embed every text in parallel batches, preserving input order.
    async fn embed_all(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        let batches: Vec<(usize, &[String])> = texts
            .chunks(self.settings.batch_size)
            .enumerate()
            .collect();

        let mut results: Vec<(usize, EngineResult<Vec<Vec<f32>>>)> = stream::iter(batches)
            .map(|(i, batch)| async move { (i, self.embed_with_retry(batch).await) })
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;
        results.sort_by_key(|(i, _)| *i);

        let mut vectors = Vec::with_capacity(texts.len());
        for (_, result) in results {
            vectors.extend(result?);
        }
        if vectors.len() != texts.len() {
            return Err(EngineError::internal(
                self.embedder.model_version(),
                format!("expected {} embeddings, got {}", texts.len(), vectors.len()),
            ));
        }
        Ok(vectors)
    }

    // ============ Ingestion ============

    /// Ingest one document.
    ///
    /// Invalid content fails with [`EngineError::InvalidDocument`] after the
    /// failure is recorded. A terminal embedding failure is not an error of
    /// the call: the document is stored as failed at `embedding`, its
    /// chunks stay `unembedded`, and the report says so.
    pub async fn ingest_document(&self, doc: NewDocument) -> EngineResult<IngestReport> {
        let record = self.require_index(&doc.index).await?;
        let id = uuid::Uuid::new_v4().to_string();
        let format = doc
            .format
            .unwrap_or_else(|| DocumentFormat::detect(&doc.source));

        let extracted = extract_text(&id, format, &doc.content);
        let body = match &extracted {
            Ok(text) => text.clone(),
            Err(_) => String::from_utf8_lossy(&doc.content).into_owned(),
        };

        let document = Document {
            id: id.clone(),
            index: doc.index.clone(),
            source: doc.source.clone(),
            format,
            category: doc.category.clone(),
            tags: doc.tags.clone(),
            body,
            content_hash: content_hash(&doc.content),
            created_at: now_ts(),
            status: DocumentStatus::Received,
            failure: None,
        };
        self.store.insert_document(&document).await?;
        debug!(document_id = %id, source = %doc.source, "document received");

        let result = self.run_stages(&document, &record, extracted).await;
        self.cache.invalidate(&doc.index);

        match result {
            Ok(report) => Ok(report),
            Err(StageError { stage, error }) => {
                let failure = StageFailure {
                    stage,
                    cause: error.to_string(),
                };
                warn!(
                    document_id = %id,
                    source = %doc.source,
                    stage = stage.as_str(),
                    error = %error,
                    "ingestion failed"
                );
                if let Err(e) = self
                    .store
                    .set_document_status(&id, DocumentStatus::Failed, Some(&failure))
                    .await
                {
                    warn!(document_id = %id, error = %e, "could not record ingestion failure");
                }
                Err(error)
            }
        }
    }

    async fn run_stages(
        &self,
        document: &Document,
        record: &IndexRecord,
        extracted: EngineResult<String>,
    ) -> Result<IngestReport, StageError> {
        let id = document.id.as_str();

        // received → chunked
        let drafts = extracted
            .and_then(|text| chunk_text(id, &text, &self.chunker))
            .map_err(at(DocumentStatus::Chunked))?;

        let now = now_ts();
        let chunks: Vec<Chunk> = drafts
            .into_iter()
            .map(|draft| Chunk {
                id: uuid::Uuid::new_v4().to_string(),
                document_id: id.to_string(),
                index: document.index.clone(),
                ordinal: draft.ordinal,
                char_len: draft.char_len as i64,
                overlap_chars: draft.overlap_chars as i64,
                hash: draft.hash,
                text: draft.text,
                category: document.category.clone(),
                tags: document.tags.clone(),
                quality_score: None,
                quality_reasons: Vec::new(),
                quality_pinned: false,
                embedding: None,
                embedding_model: None,
                state: ChunkState::Pending,
                created_at: now,
                updated_at: now,
            })
            .collect();

        self.store
            .insert_chunks(&chunks)
            .await
            .map_err(at(DocumentStatus::Chunked))?;
        self.set_status(id, DocumentStatus::Chunked)
            .await
            .map_err(at(DocumentStatus::Chunked))?;

        // chunked → embedding
        self.set_status(id, DocumentStatus::Embedding)
            .await
            .map_err(at(DocumentStatus::Embedding))?;

        let vectors = if self.embedder.is_enabled() {
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            match self.embed_all(&texts).await {
                Ok(vectors) => Some(vectors),
                Err(e) if e.is_infrastructure() => {
                    return Err(StageError {
                        stage: DocumentStatus::Embedding,
                        error: e,
                    })
                }
                Err(e) => {
                    return self
                        .leave_unembedded(document, &chunks, e)
                        .await
                        .map_err(at(DocumentStatus::Embedding));
                }
            }
        } else {
            None
        };

        // embedding → scoring
        self.set_status(id, DocumentStatus::Scoring)
            .await
            .map_err(at(DocumentStatus::Scoring))?;

        let model = vectors
            .as_ref()
            .map(|_| self.embedder.model_version().to_string());
        let threshold = record.config.quality_threshold;
        let mut vectors = vectors.map(|v| v.into_iter());

        for chunk in &chunks {
            let verdict = self.enforcer.evaluate(&chunk.text, threshold);
            let write = ChunkWrite {
                chunk_id: chunk.id.clone(),
                embedding: vectors.as_mut().and_then(|v| v.next()),
                embedding_model: model.clone(),
                verdict: Some(verdict),
                state: ChunkState::Pending,
                updated_at: now_ts(),
            };
            self.store
                .write_chunk_result(&write)
                .await
                .map_err(at(DocumentStatus::Scoring))?;
        }

        // scoring → stored
        self.store
            .commit_document(id)
            .await
            .map_err(at(DocumentStatus::Stored))?;

        info!(
            document_id = id,
            source = %document.source,
            index = %document.index,
            chunks = chunks.len(),
            embedded = model.is_some(),
            "document stored"
        );

        Ok(IngestReport {
            document_id: id.to_string(),
            index: document.index.clone(),
            source: document.source.clone(),
            status: DocumentStatus::Stored,
            chunk_count: chunks.len(),
            unembedded: 0,
            failure: None,
        })
    }

    async fn leave_unembedded(
        &self,
        document: &Document,
        chunks: &[Chunk],
        error: EngineError,
    ) -> EngineResult<IngestReport> {
        warn!(
            document_id = %document.id,
            source = %document.source,
            error = %error,
            "embedding failed; chunks left unembedded"
        );
        for chunk in chunks {
            self.store
                .write_chunk_result(&ChunkWrite {
                    chunk_id: chunk.id.clone(),
                    embedding: None,
                    embedding_model: None,
                    verdict: None,
                    state: ChunkState::Unembedded,
                    updated_at: now_ts(),
                })
                .await?;
        }
        let failure = StageFailure {
            stage: DocumentStatus::Embedding,
            cause: error.to_string(),
        };
        self.store
            .set_document_status(&document.id, DocumentStatus::Failed, Some(&failure))
            .await?;

        Ok(IngestReport {
            document_id: document.id.clone(),
            index: document.index.clone(),
            source: document.source.clone(),
            status: DocumentStatus::Failed,
            chunk_count: chunks.len(),
            unembedded: chunks.len(),
            failure: Some(failure),
        })
    }

    async fn set_status(&self, id: &str, status: DocumentStatus) -> EngineResult<()> {
        self.store.set_document_status(id, status, None).await
    }

    // ============ Single-chunk operations ============

    /// Embed and score one chunk under its lock.
    async fn process_chunk(&self, chunk_id: &str, threshold: Option<f64>) -> EngineResult<ChunkOutcome> {
        let guard = self.locks.acquire(chunk_id).await;
        if guard.superseded() {
            debug!(chunk_id, ticket = guard.ticket(), "chunk write superseded by a later request");
            return Ok(ChunkOutcome::Superseded);
        }

        let Some(chunk) = self.store.get_chunk(chunk_id).await? else {
            return Ok(ChunkOutcome::Deleted);
        };
        if chunk.state == ChunkState::Pending {
            return Ok(ChunkOutcome::Skipped);
        }
        let threshold = match threshold {
            Some(t) => t,
            None => self.require_index(&chunk.index).await?.config.quality_threshold,
        };

        let (embedding, embedding_model) = if self.embedder.is_enabled() {
            let vector = self
                .embed_with_retry(std::slice::from_ref(&chunk.text))
                .await
                .map_err(|e| match e {
                    EngineError::EmbeddingUnavailable { reason, .. } => {
                        EngineError::embedding_unavailable(chunk_id, reason)
                    }
                    other => other,
                })?
                .into_iter()
                .next()
                .ok_or_else(|| EngineError::internal(chunk_id, "embedder returned no vector"))?;
            (Some(vector), Some(self.embedder.model_version().to_string()))
        } else {
            (None, None)
        };

        let keep_pinned = self.enforcer.config().override_policy == OverridePolicy::Pin
            && chunk.quality_pinned;
        let verdict = (!keep_pinned).then(|| self.enforcer.evaluate(&chunk.text, threshold));

        let written = self
            .store
            .write_chunk_result(&ChunkWrite {
                chunk_id: chunk_id.to_string(),
                embedding,
                embedding_model,
                verdict,
                state: ChunkState::Indexed,
                updated_at: now_ts(),
            })
            .await?;
        if !written {
            return Ok(ChunkOutcome::Deleted);
        }

        if chunk.state == ChunkState::Unembedded
            && self.store.promote_document(&chunk.document_id).await?
        {
            info!(document_id = %chunk.document_id, "document recovered after reembedding");
        }

        debug!(chunk_id, ticket = guard.ticket(), "chunk reembedded");
        drop(guard);
        Ok(ChunkOutcome::Updated)
    }

    /// Re-run embedding and scoring for one chunk.
    pub async fn reembed_chunk(&self, chunk_id: &str) -> EngineResult<Chunk> {
        match self.process_chunk(chunk_id, None).await? {
            ChunkOutcome::Updated | ChunkOutcome::Superseded => {}
            ChunkOutcome::Deleted => {
                return Err(EngineError::not_found(EntityKind::Chunk, chunk_id))
            }
            ChunkOutcome::Skipped => {
                return Err(EngineError::Query(format!(
                    "chunk {} is still being ingested",
                    chunk_id
                )))
            }
        }
        let chunk = self
            .store
            .get_chunk(chunk_id)
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::Chunk, chunk_id))?;
        self.cache.invalidate(&chunk.index);
        Ok(chunk)
    }

    /// Apply a metadata edit under the chunk lock.
    pub async fn update_chunk(&self, chunk_id: &str, patch: &ChunkPatch) -> EngineResult<Chunk> {
        patch.validate()?;
        let _guard = self.locks.acquire(chunk_id).await;
        let chunk = self
            .store
            .patch_chunk(chunk_id, patch, now_ts())
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::Chunk, chunk_id))?;
        self.cache.invalidate(&chunk.index);
        info!(chunk_id, "chunk updated");
        Ok(chunk)
    }

    /// Delete a chunk under its lock, after any in-flight write to it.
    pub async fn delete_chunk(&self, chunk_id: &str) -> EngineResult<Chunk> {
        let _guard = self.locks.acquire(chunk_id).await;
        let chunk = self
            .store
            .get_chunk(chunk_id)
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::Chunk, chunk_id))?;
        if !self.store.delete_chunk(chunk_id).await? {
            return Err(EngineError::not_found(EntityKind::Chunk, chunk_id));
        }
        self.cache.invalidate(&chunk.index);
        info!(chunk_id, index = %chunk.index, "chunk deleted");
        Ok(chunk)
    }

    // ============ Index-wide operations ============

    /// Recompute embeddings and scores for every chunk of `index`.
    ///
    /// Per-chunk failures are isolated. An [`EngineError::IndexDegraded`]
    /// stops new units from starting; the report lists what was reached.
    pub async fn reindex(&self, index: &str, options: &ReindexOptions) -> EngineResult<ReindexReport> {
        let record = self.require_index(index).await?;
        let ids = self.store.chunk_ids(index).await?;
        let threshold = record.config.quality_threshold;
        let started_at = now_ts();
        let abort: OnceLock<String> = OnceLock::new();

        info!(index, chunks = ids.len(), concurrency = options.concurrency, "reindex started");

        let results: Vec<(String, UnitResult)> = stream::iter(ids.iter())
            .map(|id| {
                let abort = &abort;
                async move {
                    if options.cancel.load(Ordering::SeqCst) || abort.get().is_some() {
                        return (id.clone(), UnitResult::NotReached);
                    }
                    let result = match self.process_chunk(id, Some(threshold)).await {
                        Ok(ChunkOutcome::Updated) => UnitResult::Updated,
                        Ok(ChunkOutcome::Deleted) => UnitResult::Deleted,
                        Ok(ChunkOutcome::Skipped | ChunkOutcome::Superseded) => UnitResult::Skipped,
                        Err(e) => {
                            if e.is_infrastructure() {
                                let _ = abort.set(e.to_string());
                            }
                            warn!(chunk_id = %id, error = %e, "reindex unit failed");
                            UnitResult::Failed(ChunkFailure::new(id, &e))
                        }
                    };
                    (id.clone(), result)
                }
            })
            .buffer_unordered(options.concurrency.max(1))
            .collect()
            .await;

        let mut report = ReindexReport {
            index: index.to_string(),
            total: ids.len(),
            started_at,
            ..Default::default()
        };
        for (id, result) in results {
            match result {
                UnitResult::Updated => report.updated.push(id),
                UnitResult::Deleted => report.deleted.push(id),
                UnitResult::Skipped => report.skipped.push(id),
                UnitResult::Failed(f) => report.failed.push(f),
                UnitResult::NotReached => report.not_reached.push(id),
            }
        }
        report.updated.sort();
        report.deleted.sort();
        report.skipped.sort();
        report.not_reached.sort();
        report.failed.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));
        report.aborted = abort.into_inner();
        report.cancelled = options.cancel.load(Ordering::SeqCst) && report.aborted.is_none();
        report.finished_at = now_ts();

        self.cache.invalidate(index);

        let left_behind = (report.failed.len() + report.not_reached.len()) as u64;
        if let Err(e) = self
            .store
            .record_reindex(index, report.finished_at, left_behind)
            .await
        {
            warn!(index, error = %e, "could not record reindex completion");
        }
        if report.is_complete()
            && self.embedder.is_enabled()
            && record.config.embedding_model != self.embedder.model_version()
        {
            let updated = IndexConfig {
                embedding_model: self.embedder.model_version().to_string(),
                ..record.config.clone()
            };
            self.store.create_index(&updated).await?;
        }

        info!(
            index,
            updated = report.updated.len(),
            failed = report.failed.len(),
            deleted = report.deleted.len(),
            not_reached = report.not_reached.len(),
            cancelled = report.cancelled,
            aborted = report.aborted.is_some(),
            "reindex finished"
        );
        Ok(report)
    }

    /// Reindex every index in name order.
    pub async fn reindex_all(&self, options: &ReindexOptions) -> EngineResult<Vec<ReindexReport>> {
        let mut reports = Vec::new();
        for record in self.store.list_indexes().await? {
            let report = self.reindex(&record.config.name, options).await?;
            let stop = report.aborted.is_some() || report.cancelled;
            reports.push(report);
            if stop {
                break;
            }
        }
        Ok(reports)
    }

    /// Delete every document and chunk of `index`; the index itself stays.
    pub async fn clear_index(&self, index: &str) -> EngineResult<u64> {
        self.require_index(index).await?;
        let removed = self.store.clear_index(index).await?;
        self.cache.invalidate(index);
        info!(index, removed, "index cleared");
        Ok(removed)
    }

    // ============ Knowledge folder ============

    /// Ingest the configured knowledge folder.
    ///
    /// Sources whose stored document matches the current content hash are
    /// skipped unless `force` is set; changed or previously failed sources
    /// replace their old document. Re-running is idempotent. Entries that
    /// cannot be walked or read are failed sources in the report.
    pub async fn auto_index(&self, options: AutoIndexOptions) -> EngineResult<AutoIndexReport> {
        let knowledge = self.knowledge.as_ref().ok_or_else(|| {
            EngineError::Config("no [knowledge] folder is configured".into())
        })?;
        let index = knowledge.index.as_str();
        self.ensure_index(index, None).await?;

        let scan_config = knowledge.clone();
        let scan = tokio::task::spawn_blocking(move || scan_knowledge(&scan_config))
            .await
            .map_err(|e| EngineError::internal("knowledge scan", e.to_string()))?
            .map_err(|e| EngineError::Config(e.to_string()))?;
        let files = scan.files;
        let batch_size = options.batch_size.unwrap_or(knowledge.batch_size).max(1);

        info!(
            index,
            root = %knowledge.root.display(),
            files = files.len(),
            force = options.force,
            "auto-index started"
        );

        let mut report = AutoIndexReport {
            index: index.to_string(),
            scanned: files.len() + scan.failures.len(),
            ..Default::default()
        };
        report.failed = scan
            .failures
            .into_iter()
            .map(|f| SourceFailure {
                source: f.source,
                code: "unreadable".to_string(),
                message: f.message,
            })
            .collect();

        for batch in files.chunks(batch_size) {
            let outcomes: Vec<(String, EngineResult<FileOutcome>)> = stream::iter(batch)
                .map(|file| async move {
                    (file.source.clone(), self.index_file(index, file, options.force).await)
                })
                .buffer_unordered(batch_size)
                .collect()
                .await;

            for (source, outcome) in outcomes {
                match outcome {
                    Ok(FileOutcome::Indexed { replaced }) => {
                        if replaced {
                            report.replaced.push(source.clone());
                        }
                        report.indexed.push(source);
                    }
                    Ok(FileOutcome::Skipped) => report.skipped.push(source),
                    Err(e) => report.failed.push(SourceFailure {
                        source,
                        code: e.code().to_string(),
                        message: e.to_string(),
                    }),
                }
            }
        }

        report.indexed.sort();
        report.skipped.sort();
        report.replaced.sort();
        report.failed.sort_by(|a, b| a.source.cmp(&b.source));

        info!(
            index,
            indexed = report.indexed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "auto-index finished"
        );
        Ok(report)
    }

    /// Run [`auto_index`](Self::auto_index) every `interval` until
    /// `shutdown` resolves. The first pass starts immediately.
    ///
    /// A failed pass is logged and the next one runs on schedule. Changed
    /// files replace their documents, which invalidates cached searches
    /// for the index. Returns the number of completed passes.
    pub async fn watch_knowledge<F>(
        &self,
        options: AutoIndexOptions,
        interval: Duration,
        shutdown: impl std::future::Future<Output = ()>,
        mut on_pass: F,
    ) -> EngineResult<usize>
    where
        F: FnMut(&AutoIndexReport),
    {
        if self.knowledge.is_none() {
            return Err(EngineError::Config("no [knowledge] folder is configured".into()));
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval_ms = interval.as_millis() as u64, "watching knowledge folder");
        let mut passes = 0;
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }
            match self.auto_index(options).await {
                Ok(report) => {
                    passes += 1;
                    if !report.indexed.is_empty() || !report.failed.is_empty() {
                        info!(
                            index = %report.index,
                            indexed = report.indexed.len(),
                            failed = report.failed.len(),
                            "knowledge change picked up"
                        );
                    }
                    on_pass(&report);
                }
                Err(e) => warn!(error = %e, "auto-index pass failed"),
            }
        }
        info!(passes, "stopped watching knowledge folder");
        Ok(passes)
    }

    async fn index_file(
        &self,
        index: &str,
        file: &KnowledgeFile,
        force: bool,
    ) -> EngineResult<FileOutcome> {
        let content = file
            .read()
            .await
            .map_err(|e| EngineError::invalid_document(&file.source, e.to_string()))?;
        let existing = self.store.find_document_by_source(index, &file.source).await?;
        if let Some(doc) = &existing {
            if !force && doc.content_hash == content_hash(&content) && doc.status == DocumentStatus::Stored
            {
                return Ok(FileOutcome::Skipped);
            }
            self.store.delete_document(&doc.id).await?;
        }

        let report = self
            .ingest_document(NewDocument {
                index: index.to_string(),
                source: file.source.clone(),
                format: Some(file.format),
                category: file.category.clone(),
                tags: Vec::new(),
                content,
            })
            .await?;

        if let Some(failure) = report.failure {
            return Err(EngineError::embedding_unavailable(&file.source, failure.cause));
        }
        Ok(FileOutcome::Indexed {
            replaced: existing.is_some(),
        })
    }
}
