//! Typed error taxonomy shared by every engine component.
//!
//! Each variant carries the id of the affected entity (document, chunk,
//! index, saved query) so callers can report failures without parsing
//! message strings.

use serde::Serialize;
use thiserror::Error;

/// Result alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Kind of entity named by a [`EngineError::NotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Document,
    Chunk,
    Index,
    SavedQuery,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityKind::Document => "document",
            EntityKind::Chunk => "chunk",
            EntityKind::Index => "index",
            EntityKind::SavedQuery => "saved query",
        };
        f.write_str(s)
    }
}

/// Errors produced by the knowledge engine.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// Malformed or empty input document. Not retried.
    #[error("invalid document {id}: {reason}")]
    InvalidDocument { id: String, reason: String },

    /// Embedding backend unreachable, timed out, or rate limited. Retryable.
    #[error("embedding unavailable for {id}: {reason}")]
    EmbeddingUnavailable { id: String, reason: String },

    /// Bad query text, malformed filter, or unknown index. Not retried.
    #[error("query error: {0}")]
    Query(String),

    /// Unknown chunk, document, index or saved query id.
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    /// Index store unreachable or unhealthy.
    #[error("index {index} degraded: {reason}")]
    IndexDegraded { index: String, reason: String },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Unexpected per-entity failure (e.g. a scorer or provider returned garbage).
    #[error("internal error for {id}: {reason}")]
    Internal { id: String, reason: String },
}

impl EngineError {
    pub fn invalid_document(id: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::InvalidDocument {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn embedding_unavailable(id: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::EmbeddingUnavailable {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn degraded(index: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::IndexDegraded {
            index: index.into(),
            reason: reason.into(),
        }
    }

    pub fn internal(id: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::Internal {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Whether the orchestrator should retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::EmbeddingUnavailable { .. })
    }

    /// Whether a batch operation must stop instead of isolating this error.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, EngineError::IndexDegraded { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound { .. })
    }

    /// Short machine-readable code, used in reports and CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidDocument { .. } => "invalid_document",
            EngineError::EmbeddingUnavailable { .. } => "embedding_unavailable",
            EngineError::Query(_) => "query_error",
            EngineError::NotFound { .. } => "not_found",
            EngineError::IndexDegraded { .. } => "index_degraded",
            EngineError::Config(_) => "config_error",
            EngineError::Internal { .. } => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_only_for_embedding() {
        assert!(EngineError::embedding_unavailable("c1", "timeout").is_retryable());
        assert!(!EngineError::Query("bad".into()).is_retryable());
        assert!(!EngineError::degraded("support", "down").is_retryable());
    }

    #[test]
    fn test_not_found_display_names_entity() {
        let err = EngineError::not_found(EntityKind::SavedQuery, "q-1");
        assert_eq!(err.to_string(), "saved query not found: q-1");
        assert!(err.is_not_found());
        assert_eq!(err.code(), "not_found");
    }
}
