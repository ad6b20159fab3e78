//! Core data models used throughout the knowledge engine.
//!
//! These types represent the documents, chunks, indexes, and saved queries
//! that flow through the ingestion, quality, and retrieval pipeline.
//! Timestamps are Unix seconds (UTC).

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::query::ChunkFilter;

/// Current Unix timestamp in seconds.
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Format a Unix timestamp as ISO 8601.
pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Source format of a document, used to decide how raw bytes become text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Plain,
    Markdown,
    Json,
}

impl DocumentFormat {
    /// Detect the format from a file name or path extension.
    pub fn detect(path: &str) -> Self {
        let ext = path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "md" | "markdown" => DocumentFormat::Markdown,
            "json" => DocumentFormat::Json,
            _ => DocumentFormat::Plain,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Plain => "plain",
            DocumentFormat::Markdown => "markdown",
            DocumentFormat::Json => "json",
        }
    }
}

impl FromStr for DocumentFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" | "text" | "txt" => Ok(DocumentFormat::Plain),
            "markdown" | "md" => Ok(DocumentFormat::Markdown),
            "json" => Ok(DocumentFormat::Json),
            other => Err(EngineError::Config(format!(
                "unknown document format '{}'; expected plain, markdown, or json",
                other
            ))),
        }
    }
}

/// Ingestion state of a document.
///
/// `received → chunked → embedding → scoring → stored`, or `failed` at any
/// stage. Only `stored` documents have retrievable chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Received,
    Chunked,
    Embedding,
    Scoring,
    Stored,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Received => "received",
            DocumentStatus::Chunked => "chunked",
            DocumentStatus::Embedding => "embedding",
            DocumentStatus::Scoring => "scoring",
            DocumentStatus::Stored => "stored",
            DocumentStatus::Failed => "failed",
        }
    }
}

impl FromStr for DocumentStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(DocumentStatus::Received),
            "chunked" => Ok(DocumentStatus::Chunked),
            "embedding" => Ok(DocumentStatus::Embedding),
            "scoring" => Ok(DocumentStatus::Scoring),
            "stored" => Ok(DocumentStatus::Stored),
            "failed" => Ok(DocumentStatus::Failed),
            other => Err(EngineError::Config(format!("unknown document status '{}'", other))),
        }
    }
}

/// The stage at which ingestion failed, plus its cause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: DocumentStatus,
    pub cause: String,
}

/// A unit of source content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub index: String,
    /// Caller-supplied source reference (relative path, upload name, ...).
    pub source: String,
    pub format: DocumentFormat,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub body: String,
    /// SHA-256 of the raw content, used to skip unchanged sources.
    pub content_hash: String,
    pub created_at: i64,
    pub status: DocumentStatus,
    pub failure: Option<StageFailure>,
}

/// Retrieval state of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkState {
    /// Written during ingestion; not yet committed.
    Pending,
    /// Embedding failed; waiting for a reembed or reindex.
    Unembedded,
    /// Retrievable by search.
    Indexed,
}

impl ChunkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkState::Pending => "pending",
            ChunkState::Unembedded => "unembedded",
            ChunkState::Indexed => "indexed",
        }
    }
}

impl FromStr for ChunkState {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ChunkState::Pending),
            "unembedded" => Ok(ChunkState::Unembedded),
            "indexed" => Ok(ChunkState::Indexed),
            other => Err(EngineError::Config(format!("unknown chunk state '{}'", other))),
        }
    }
}

/// A retrievable slice of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub index: String,
    pub ordinal: i64,
    pub text: String,
    /// Length in characters (Unicode scalar values).
    pub char_len: i64,
    /// Leading characters duplicated from the previous chunk.
    pub overlap_chars: i64,
    /// SHA-256 of `text`.
    pub hash: String,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub quality_score: Option<f64>,
    pub quality_reasons: Vec<String>,
    /// Set when the score came from a manual override.
    pub quality_pinned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    pub state: ChunkState,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Metadata edit applied to a chunk. Text and ordinal are not editable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChunkPatch {
    pub tags: Option<Vec<String>>,
    pub category: Option<String>,
    /// Manual score override in `[0.0, 1.0]`; pins the score.
    pub quality_score: Option<f64>,
}

impl ChunkPatch {
    pub fn is_empty(&self) -> bool {
        self.tags.is_none() && self.category.is_none() && self.quality_score.is_none()
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.is_empty() {
            return Err(EngineError::Query(
                "chunk update must set at least one of tags, category, quality_score".into(),
            ));
        }
        if let Some(score) = self.quality_score {
            if !(0.0..=1.0).contains(&score) || score.is_nan() {
                return Err(EngineError::Query(format!(
                    "quality_score override must be in [0.0, 1.0], got {}",
                    score
                )));
            }
        }
        if let Some(category) = &self.category {
            if category.trim().is_empty() {
                return Err(EngineError::Query("category must not be blank".into()));
            }
        }
        Ok(())
    }
}

/// Per-index configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub name: String,
    /// Embedding model version chunks in this index are embedded with.
    pub embedding_model: String,
    pub quality_threshold: f64,
}

impl IndexConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::Config("index name must not be empty".into()));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(EngineError::Config(format!(
                "index name '{}' may only contain ASCII letters, digits, '-' and '_'",
                self.name
            )));
        }
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(EngineError::Config(format!(
                "quality_threshold for index '{}' must be in [0.0, 1.0]",
                self.name
            )));
        }
        Ok(())
    }
}

/// A stored index: configuration plus reindex bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub config: IndexConfig,
    pub created_at: i64,
    pub last_reindex_at: Option<i64>,
    /// Chunks that failed or were not reached in the last reindex.
    pub last_reindex_failures: u64,
}

/// Counts and averages for one index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub index: String,
    pub document_count: u64,
    pub failed_document_count: u64,
    pub chunk_count: u64,
    pub indexed_count: u64,
    pub unembedded_count: u64,
    pub embedded_count: u64,
    pub scored_count: u64,
    pub average_quality: Option<f64>,
    pub last_updated_at: Option<i64>,
    pub last_reindex_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Health verdict for one index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHealth {
    pub index: String,
    pub status: HealthStatus,
    pub reasons: Vec<String>,
    pub stats: Option<IndexStats>,
}

impl IndexHealth {
    /// Derive health from stored stats and reindex bookkeeping.
    pub fn assess(record: &IndexRecord, stats: IndexStats) -> Self {
        let mut reasons = Vec::new();
        if stats.unembedded_count > 0 {
            reasons.push(format!(
                "{} chunks awaiting embeddings",
                stats.unembedded_count
            ));
        }
        if stats.failed_document_count > 0 {
            reasons.push(format!(
                "{} documents failed ingestion",
                stats.failed_document_count
            ));
        }
        if record.last_reindex_failures > 0 {
            reasons.push(format!(
                "last reindex left {} chunks not updated",
                record.last_reindex_failures
            ));
        }
        let status = if reasons.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        IndexHealth {
            index: record.config.name.clone(),
            status,
            reasons,
            stats: Some(stats),
        }
    }

    /// Health for an index whose store could not be reached.
    pub fn unreachable(index: &str, reason: impl Into<String>) -> Self {
        IndexHealth {
            index: index.to_string(),
            status: HealthStatus::Degraded,
            reasons: vec![reason.into()],
            stats: None,
        }
    }
}

/// A named, persisted search request. Never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedQuery {
    pub id: String,
    pub name: String,
    pub query: String,
    pub index: String,
    pub filter: ChunkFilter,
    pub limit: usize,
    pub notes: Option<String>,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(failures: u64) -> IndexRecord {
        IndexRecord {
            config: IndexConfig {
                name: "support".into(),
                embedding_model: "hash-fnv1a-64".into(),
                quality_threshold: 0.5,
            },
            created_at: 0,
            last_reindex_at: None,
            last_reindex_failures: failures,
        }
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(DocumentFormat::detect("notes/a.md"), DocumentFormat::Markdown);
        assert_eq!(DocumentFormat::detect("payload.JSON"), DocumentFormat::Json);
        assert_eq!(DocumentFormat::detect("README"), DocumentFormat::Plain);
    }

    #[test]
    fn test_health_healthy_when_clean() {
        let health = IndexHealth::assess(&record(0), IndexStats::default());
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.reasons.is_empty());
    }

    #[test]
    fn test_health_degraded_with_unembedded_chunks() {
        let stats = IndexStats {
            unembedded_count: 3,
            ..Default::default()
        };
        let health = IndexHealth::assess(&record(2), stats);
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.reasons.len(), 2);
    }

    #[test]
    fn test_patch_validation() {
        assert!(ChunkPatch::default().validate().is_err());
        let bad = ChunkPatch {
            quality_score: Some(1.5),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let ok = ChunkPatch {
            tags: Some(vec!["faq".into()]),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_index_name_validation() {
        let mut cfg = record(0).config;
        assert!(cfg.validate().is_ok());
        cfg.name = "bad name".into();
        assert!(cfg.validate().is_err());
    }
}
