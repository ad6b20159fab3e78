//! # Knowledge Engine Core
//!
//! Pure logic for the knowledge engine: data models, the error taxonomy,
//! chunking, document text extraction, the embedder trait, quality
//! scoring, the filter/sort schema, the store abstraction with an
//! in-memory backend, search ranking, and embedding projections.
//!
//! This crate performs no network, database, or filesystem I/O. Those live
//! in the `knowledge-engine` application crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod models;
pub mod projection;
pub mod quality;
pub mod query;
pub mod search;
pub mod store;

pub use error::{EngineError, EngineResult, EntityKind};
