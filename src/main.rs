//! # Knowledge Engine CLI (`kbe`)
//!
//! The `kbe` binary is the operator interface for the knowledge engine. It
//! provides commands for database initialization, ingestion, chunk
//! administration, search, reindexing, quality reporting, and saved queries.
//!
//! ## Usage
//!
//! ```bash
//! kbe --config ./config/kbe.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbe init` | Create the database, run migrations, create configured indexes |
//! | `kbe index create\|list` | Manage indexes |
//! | `kbe ingest <file>` | Ingest one document |
//! | `kbe autoindex` | Ingest the configured knowledge folder |
//! | `kbe chunks ...` | List, inspect, edit, delete, and re-embed chunks |
//! | `kbe search "<query>"` | Test search against one index |
//! | `kbe reindex <index>\|--all` | Re-embed and rescore every chunk |
//! | `kbe clear <index>` | Remove all documents from an index |
//! | `kbe stats` / `kbe health` | Index statistics and health |
//! | `kbe export` | JSON snapshot of every index |
//! | `kbe quality ...` | Quality metrics, config, evaluation, validation |
//! | `kbe queries ...` | Saved queries |

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;

use knowledge_engine::admin::{AdminService, NewSavedQuery};
use knowledge_engine::config::{self, Config};
use knowledge_engine::orchestrator::AutoIndexOptions;
use knowledge_engine::search_service::TestSearch;
use knowledge_engine::{chunks_cmd, export, index_cmd, logging, quality_cmd, search, stats};
use knowledge_engine_core::models::{ChunkPatch, DocumentFormat};
use knowledge_engine_core::query::{
    ChunkFilter, ChunkQuery, ChunkSort, Page, SortDirection, SortField,
};
use knowledge_engine_core::search::SearchMode;

/// Knowledge Engine CLI: a knowledge index with quality enforcement.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kbe.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kbe",
    about = "Knowledge Engine: chunked, embedded, quality-scored knowledge indexes",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kbe.toml")]
    config: PathBuf,

    /// Print machine-readable JSON instead of tables.
    #[arg(long, global = true)]
    json: bool,

    /// Debug-level logging (overridden by KBE_LOG / RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and create configured indexes.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Manage indexes.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Ingest one document from a file.
    Ingest {
        /// Path to the document.
        path: PathBuf,

        /// Target index.
        #[arg(long, default_value = "default")]
        index: String,

        /// Document format: `plain`, `markdown`, or `json`. Detected from the
        /// file extension when omitted.
        #[arg(long, value_parser = parse_format)]
        format: Option<DocumentFormat>,

        #[arg(long)]
        category: Option<String>,

        /// Tag to attach to every chunk. Repeatable.
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Ingest the configured `[knowledge]` folder.
    ///
    /// Unchanged sources are skipped, so re-running is cheap.
    Autoindex {
        /// Re-ingest sources even when their content is unchanged.
        #[arg(long)]
        force: bool,

        /// Override `[knowledge] batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Keep running and re-index changed files until Ctrl-C.
        #[arg(long)]
        watch: bool,

        /// Seconds between passes with `--watch`. Overrides
        /// `[knowledge] poll_interval_secs`.
        #[arg(long, requires = "watch")]
        interval: Option<u64>,
    },

    /// Inspect and edit chunks.
    Chunks {
        #[command(subcommand)]
        action: ChunksAction,
    },

    /// Run a test search against one index.
    Search {
        /// The search query string.
        query: String,

        #[arg(long, default_value = "default")]
        index: String,

        /// `lexical`, `vector`, or `hybrid`. Vector and hybrid fall back to
        /// lexical when no embeddings are available.
        #[arg(long, default_value = "hybrid")]
        mode: String,

        /// Maximum number of results (defaults to `[retrieval] default_limit`).
        #[arg(long)]
        limit: Option<usize>,

        /// Filter as `key=value`: category, tag, document_id, min_quality,
        /// max_quality. Repeatable; combined with AND.
        #[arg(long = "filter", value_parser = parse_key_val)]
        filters: Vec<(String, String)>,

        /// Include the per-component score breakdown.
        #[arg(long)]
        explain: bool,
    },

    /// Re-embed and rescore every chunk of an index.
    Reindex {
        index: Option<String>,

        /// Reindex every index.
        #[arg(long, conflicts_with = "index")]
        all: bool,
    },

    /// Remove every document and chunk from an index.
    Clear { index: String },

    /// Show index statistics.
    Stats { index: Option<String> },

    /// Show the health verdict of an index. Exits 2 when degraded.
    Health { index: String },

    /// Export a JSON snapshot of every index.
    Export {
        /// Write to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Quality reporting and evaluation.
    Quality {
        #[command(subcommand)]
        action: QualityAction,
    },

    /// Manage saved queries.
    Queries {
        #[command(subcommand)]
        action: QueriesAction,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Create an index, or update an existing index's threshold.
    Create {
        name: String,
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// List all indexes.
    List,
}

#[derive(Subcommand)]
enum ChunksAction {
    /// List chunks with filtering, sorting, and pagination.
    List {
        index: String,
        #[arg(long = "filter", value_parser = parse_key_val)]
        filters: Vec<(String, String)>,
        /// ordinal, quality, created_at, updated_at, length, or category.
        #[arg(long, default_value = "ordinal")]
        sort: String,
        /// asc or desc.
        #[arg(long, default_value = "asc")]
        order: String,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Show one chunk.
    Get { id: String },
    /// Update tags, category, or quality score of a chunk.
    Update {
        id: String,
        /// Replace tags (comma-separated; empty clears).
        #[arg(long)]
        tags: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// Manual quality score in [0.0, 1.0].
        #[arg(long)]
        quality: Option<f64>,
    },
    /// Delete a chunk.
    Delete { id: String },
    /// Re-embed and rescore one chunk.
    Reembed { id: String },
    /// Chunks scoring below a threshold, lowest first.
    LowQuality {
        index: String,
        /// Defaults to the index's threshold.
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// 2D projection of a sample of embeddings, as JSON.
    Sample {
        index: String,
        #[arg(long, short, default_value_t = 200)]
        n: usize,
    },
}

#[derive(Subcommand)]
enum QualityAction {
    /// Score distribution for an index.
    Metrics { index: String },
    /// Active quality configuration and per-index thresholds.
    Config,
    /// Score text without storing it. Reads stdin when no text is given.
    Eval {
        text: Option<String>,
        /// Read the text from a file.
        #[arg(long, conflicts_with = "text")]
        file: Option<PathBuf>,
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Score every chunk of an index without persisting scores.
    Validate { index: String },
}

#[derive(Subcommand)]
enum QueriesAction {
    /// Save a named query.
    Save {
        name: String,
        query: String,
        #[arg(long, default_value = "default")]
        index: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long = "filter", value_parser = parse_key_val)]
        filters: Vec<(String, String)>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// List saved queries.
    List {
        #[arg(long)]
        index: Option<String>,
    },
    /// Run a saved query by id or name.
    Run {
        id: String,
        #[arg(long)]
        explain: bool,
    },
    /// Delete a saved query by id or name.
    Delete { id: String },
}

/// Parse a `key=value` pair for `--filter` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn parse_format(s: &str) -> Result<DocumentFormat, String> {
    s.parse().map_err(|e: knowledge_engine_core::error::EngineError| e.to_string())
}

fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg: Config = config::load_config(&cli.config)?;
    let admin = AdminService::open(&cfg).await?;
    let json = cli.json;

    let auto = cfg.knowledge.as_ref().is_some_and(|k| k.auto_index);
    if auto && !matches!(cli.command, Commands::Autoindex { .. }) {
        let report = admin.auto_index(AutoIndexOptions::default()).await?;
        tracing::info!(
            index = %report.index,
            indexed = report.indexed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "startup auto-index finished"
        );
    }

    match cli.command {
        Commands::Init => index_cmd::run_init(&admin).await?,
        Commands::Index { action } => match action {
            IndexAction::Create { name, threshold } => {
                index_cmd::run_create_index(&admin, &name, threshold).await?
            }
            IndexAction::List => index_cmd::run_list_indexes(&admin, json).await?,
        },
        Commands::Ingest {
            path,
            index,
            format,
            category,
            tags,
        } => index_cmd::run_ingest(&admin, &index, &path, format, category, tags, json).await?,
        Commands::Autoindex {
            force,
            batch_size,
            watch,
            interval,
        } => {
            let options = AutoIndexOptions { force, batch_size };
            if watch {
                index_cmd::run_watch(&admin, options, interval, json).await?
            } else {
                index_cmd::run_autoindex(&admin, options, json).await?
            }
        }
        Commands::Chunks { action } => run_chunks(&admin, action, json).await?,
        Commands::Search {
            query,
            index,
            mode,
            limit,
            filters,
            explain,
        } => {
            let req = TestSearch {
                index,
                query,
                limit: limit.unwrap_or(cfg.retrieval.default_limit),
                filter: ChunkFilter::from_pairs(&filters)?,
                mode: mode.parse::<SearchMode>()?,
                explain,
            };
            search::run_search(&admin, req, json).await?
        }
        Commands::Reindex { index, all } => {
            index_cmd::run_reindex(&admin, index.as_deref(), all, json).await?
        }
        Commands::Clear { index } => index_cmd::run_clear(&admin, &index).await?,
        Commands::Stats { index } => stats::run_stats(&admin, index.as_deref()).await?,
        Commands::Health { index } => {
            if !stats::run_health(&admin, &index).await? {
                std::process::exit(2);
            }
        }
        Commands::Export { output } => export::run_export(&admin, output.as_deref()).await?,
        Commands::Quality { action } => match action {
            QualityAction::Metrics { index } => {
                quality_cmd::run_metrics(&admin, &index, json).await?
            }
            QualityAction::Config => quality_cmd::run_config(&admin).await?,
            QualityAction::Eval {
                text,
                file,
                threshold,
            } => {
                let text = match (text, file) {
                    (Some(t), _) => t,
                    (None, Some(path)) => std::fs::read_to_string(path)?,
                    (None, None) => {
                        let mut buf = String::new();
                        std::io::stdin().read_to_string(&mut buf)?;
                        buf
                    }
                };
                quality_cmd::run_eval(&admin, &text, threshold, json)?;
            }
            QualityAction::Validate { index } => {
                quality_cmd::run_validate(&admin, &index, json).await?
            }
        },
        Commands::Queries { action } => match action {
            QueriesAction::Save {
                name,
                query,
                index,
                limit,
                filters,
                notes,
            } => {
                let new = NewSavedQuery {
                    name,
                    query,
                    index,
                    filter: ChunkFilter::from_pairs(&filters)?,
                    limit,
                    notes,
                };
                search::run_save_query(&admin, new).await?
            }
            QueriesAction::List { index } => {
                search::run_list_queries(&admin, index.as_deref(), json).await?
            }
            QueriesAction::Run { id, explain } => {
                search::run_saved_query(&admin, &id, explain, json).await?
            }
            QueriesAction::Delete { id } => search::run_delete_query(&admin, &id).await?,
        },
    }

    Ok(())
}

async fn run_chunks(admin: &AdminService, action: ChunksAction, json: bool) -> Result<()> {
    match action {
        ChunksAction::List {
            index,
            filters,
            sort,
            order,
            offset,
            limit,
        } => {
            let query = ChunkQuery {
                filter: ChunkFilter::from_pairs(&filters)?,
                sort: ChunkSort {
                    field: sort.parse::<SortField>()?,
                    direction: order.parse::<SortDirection>()?,
                },
                page: Page { offset, limit },
            };
            chunks_cmd::run_list(admin, &index, &query, json).await
        }
        ChunksAction::Get { id } => chunks_cmd::run_get(admin, &id, json).await,
        ChunksAction::Update {
            id,
            tags,
            category,
            quality,
        } => {
            let patch = ChunkPatch {
                tags: tags.as_deref().map(parse_tags),
                category,
                quality_score: quality,
            };
            if patch.is_empty() {
                bail!("nothing to update: pass --tags, --category, or --quality");
            }
            chunks_cmd::run_update(admin, &id, &patch, json).await
        }
        ChunksAction::Delete { id } => chunks_cmd::run_delete(admin, &id).await,
        ChunksAction::Reembed { id } => chunks_cmd::run_reembed(admin, &id, json).await,
        ChunksAction::LowQuality {
            index,
            threshold,
            offset,
            limit,
        } => {
            chunks_cmd::run_low_quality(admin, &index, threshold, Page { offset, limit }, json)
                .await
        }
        ChunksAction::Sample { index, n } => chunks_cmd::run_sample(admin, &index, n).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("category=guides").unwrap(),
            ("category".to_string(), "guides".to_string())
        );
        assert_eq!(
            parse_key_val("k=a=b").unwrap(),
            ("k".to_string(), "a=b".to_string())
        );
        assert!(parse_key_val("novalue").is_err());
    }

    #[test]
    fn test_parse_tags() {
        assert_eq!(parse_tags("a, b,,c"), vec!["a", "b", "c"]);
        assert!(parse_tags("").is_empty());
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
