//! Storage abstraction for the knowledge engine.
//!
//! The [`Store`] trait defines every persistence operation the
//! orchestrator, search service, and admin surface need, so backends
//! (SQLite, in-memory) are interchangeable.
//!
//! Implementations must be `Send + Sync` and must apply each method
//! atomically: a chunk deletion removes the row, its vector, and its
//! lexical entry together, and a document commit flips every pending chunk
//! to `indexed` in the same step as the document status.

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::EngineResult;
use crate::models::{
    Chunk, ChunkPatch, ChunkState, Document, DocumentStatus, IndexConfig, IndexRecord,
    IndexStats, SavedQuery, StageFailure,
};
use crate::quality::QualityVerdict;
use crate::query::{ChunkFilter, ChunkPage, ChunkQuery};

/// A candidate chunk returned from lexical or vector search.
///
/// Carries enough information to normalize, merge, and filter results
/// without additional round-trips.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkCandidate {
    pub chunk_id: String,
    pub document_id: String,
    pub ordinal: i64,
    /// Backend score (term-frequency rank or cosine similarity).
    pub raw_score: f64,
    pub snippet: String,
    pub category: Option<String>,
    pub quality_score: Option<f64>,
}

/// Result of one embed/score pass over a chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkWrite {
    pub chunk_id: String,
    /// `None` clears any stored vector.
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    /// `None` leaves the stored score, reasons, and pin untouched.
    pub verdict: Option<QualityVerdict>,
    pub state: ChunkState,
    pub updated_at: i64,
}

/// A stored vector with a display label, for projections.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSample {
    pub chunk_id: String,
    pub label: String,
    pub vector: Vec<f32>,
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Group | Methods |
/// |-------|---------|
/// | Indexes | `create_index`, `get_index`, `list_indexes`, `record_reindex` |
/// | Documents | `insert_document`, `get_document`, `find_document_by_source`, `set_document_status`, `delete_document` |
/// | Chunks | `insert_chunks`, `get_chunk`, `list_chunks`, `chunks_for_index`, `chunk_ids`, `patch_chunk`, `write_chunk_result`, `delete_chunk`, `commit_document`, `promote_document`, `clear_index`, `index_stats` |
/// | Retrieval | `lexical_search`, `vector_search`, `vector_count`, `sample_vectors` |
/// | Saved queries | `insert_saved_query`, `get_saved_query`, `list_saved_queries`, `delete_saved_query` |
#[async_trait]
pub trait Store: Send + Sync {
    /// Create an index, or update the configuration of an existing one.
    async fn create_index(&self, config: &IndexConfig) -> EngineResult<IndexRecord>;

    async fn get_index(&self, name: &str) -> EngineResult<Option<IndexRecord>>;

    async fn list_indexes(&self) -> EngineResult<Vec<IndexRecord>>;

    /// Record the completion time and the number of chunks left behind.
    async fn record_reindex(&self, name: &str, at: i64, failures: u64) -> EngineResult<()>;

    async fn insert_document(&self, doc: &Document) -> EngineResult<()>;

    async fn get_document(&self, id: &str) -> EngineResult<Option<Document>>;

    /// Most recent document ingested from `source` into `index`.
    async fn find_document_by_source(
        &self,
        index: &str,
        source: &str,
    ) -> EngineResult<Option<Document>>;

    async fn set_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        failure: Option<&StageFailure>,
    ) -> EngineResult<()>;

    /// Delete a document together with all of its chunks.
    async fn delete_document(&self, id: &str) -> EngineResult<bool>;

    /// Insert the chunks of one document.
    async fn insert_chunks(&self, chunks: &[Chunk]) -> EngineResult<()>;

    async fn get_chunk(&self, id: &str) -> EngineResult<Option<Chunk>>;

    /// Filtered, sorted, paginated listing over chunks in every state.
    async fn list_chunks(&self, index: &str, query: &ChunkQuery) -> EngineResult<ChunkPage>;

    /// Every chunk of an index, ordered by document and ordinal.
    async fn chunks_for_index(&self, index: &str) -> EngineResult<Vec<Chunk>>;

    async fn chunk_ids(&self, index: &str) -> EngineResult<Vec<String>>;

    /// Apply a metadata edit. A score override pins the score.
    async fn patch_chunk(
        &self,
        id: &str,
        patch: &ChunkPatch,
        at: i64,
    ) -> EngineResult<Option<Chunk>>;

    /// Write an embed/score result. Returns `false` when the chunk no
    /// longer exists, in which case nothing is written.
    async fn write_chunk_result(&self, write: &ChunkWrite) -> EngineResult<bool>;

    /// Delete a chunk, its vector, and its lexical entry.
    async fn delete_chunk(&self, id: &str) -> EngineResult<bool>;

    /// Mark every pending chunk of a document `indexed` and the document
    /// `stored`.
    async fn commit_document(&self, document_id: &str) -> EngineResult<()>;

    /// Mark a document that failed at embedding `stored` once none of its
    /// chunks are left unembedded. Returns whether it was promoted.
    async fn promote_document(&self, document_id: &str) -> EngineResult<bool>;

    /// Delete every document and chunk of an index. Returns the number of
    /// chunks removed.
    async fn clear_index(&self, index: &str) -> EngineResult<u64>;

    async fn index_stats(&self, index: &str) -> EngineResult<IndexStats>;

    /// Term-match search over indexed chunks.
    async fn lexical_search(
        &self,
        index: &str,
        query: &str,
        limit: usize,
        filter: &ChunkFilter,
    ) -> EngineResult<Vec<ChunkCandidate>>;

    /// Cosine similarity search over indexed chunks with vectors.
    async fn vector_search(
        &self,
        index: &str,
        query_vec: &[f32],
        limit: usize,
        filter: &ChunkFilter,
    ) -> EngineResult<Vec<ChunkCandidate>>;

    /// Number of indexed chunks with a stored vector.
    async fn vector_count(&self, index: &str) -> EngineResult<u64>;

    async fn sample_vectors(&self, index: &str, limit: usize) -> EngineResult<Vec<VectorSample>>;

    /// Fails with a query error when the name is taken.
    async fn insert_saved_query(&self, query: &SavedQuery) -> EngineResult<()>;

    /// Look up by id, then by name.
    async fn get_saved_query(&self, id_or_name: &str) -> EngineResult<Option<SavedQuery>>;

    async fn list_saved_queries(&self, index: Option<&str>) -> EngineResult<Vec<SavedQuery>>;

    async fn delete_saved_query(&self, id: &str) -> EngineResult<bool>;
}

/// Leading excerpt of a chunk for result display.
pub fn snippet(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((i, _)) => format!("{}…", &trimmed[..i]),
        None => trimmed.to_string(),
    }
}

/// Label used for projection samples.
pub fn sample_label(category: Option<&str>) -> String {
    category.unwrap_or("uncategorized").to_string()
}
