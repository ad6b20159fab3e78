//! # Knowledge Engine
//!
//! A knowledge index with quality enforcement. Documents are extracted,
//! chunked with overlap, embedded, scored by a heuristic quality enforcer,
//! and stored in SQLite (FTS5 + vectors). A hybrid search service ranks
//! chunks by lexical, vector, and quality signals, and an administrative
//! surface exposes chunk, index, quality, and saved-query operations.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────┐   ┌───────────┐
//! │ Knowledge   │──▶│    Orchestrator       │──▶│  SQLite   │
//! │ folder/CLI  │   │ chunk+embed+score     │   │ FTS5+Vec  │
//! └─────────────┘   └──────────────────────┘   └─────┬─────┘
//!                                                    │
//!                        ┌───────────────────────────┤
//!                        ▼                           ▼
//!                 ┌──────────────┐           ┌──────────────┐
//!                 │ AdminService │◀──────────│SearchService │
//!                 │  (kbe CLI)   │           │ +cache       │
//!                 └──────────────┘           └──────────────┘
//! ```
//!
//! The pure logic (chunking, scoring, ranking, projection, the `Store`
//! trait, and an in-memory store) lives in the `knowledge-engine-core`
//! crate; this crate adds SQLite persistence, embedding providers, the
//! orchestrator, caching, and the CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! kbe init                                   # create database and indexes
//! kbe ingest docs/guide.md --index default   # ingest one file
//! kbe autoindex                              # ingest the [knowledge] folder
//! kbe search "deployment" --index default --explain
//! kbe quality metrics default
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the store |
//! | [`embedding`] | Embedding provider factory |
//! | [`orchestrator`] | Ingestion, re-embedding, reindex, auto-index |
//! | [`search_service`] | Test search with fallback and caching |
//! | [`admin`] | Administrative facade |
//! | [`knowledge`] | Knowledge folder scanning |

pub mod admin;
pub mod cache;
pub mod chunks_cmd;
pub mod config;
pub mod db;
pub mod embedding;
pub mod export;
pub mod index_cmd;
pub mod knowledge;
pub mod locks;
pub mod logging;
pub mod migrate;
pub mod orchestrator;
pub mod quality_cmd;
pub mod search;
pub mod search_service;
pub mod sqlite_store;
pub mod stats;
