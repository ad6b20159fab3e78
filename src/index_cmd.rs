//! Index lifecycle commands: init, create/list, ingest, auto-index (once
//! or watching), reindex, and clear.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use knowledge_engine_core::models::{DocumentFormat, DocumentStatus, IndexRecord};

use crate::admin::AdminService;
use crate::export::print_json;
use crate::orchestrator::{
    AutoIndexOptions, AutoIndexReport, NewDocument, ReindexOptions, ReindexReport,
};
use crate::stats::format_ts_relative;

pub async fn run_init(admin: &AdminService) -> Result<()> {
    let records = admin.init_indexes().await?;
    println!("Database initialized successfully.");
    for r in &records {
        println!("  index '{}' ready", r.config.name);
    }
    Ok(())
}

pub async fn run_create_index(admin: &AdminService, name: &str, threshold: Option<f64>) -> Result<()> {
    let record = admin.create_index(name, threshold).await?;
    println!(
        "Index '{}' (model {}, threshold {:.2})",
        record.config.name, record.config.embedding_model, record.config.quality_threshold
    );
    Ok(())
}

pub async fn run_list_indexes(admin: &AdminService, json: bool) -> Result<()> {
    let records = admin.list_indexes().await?;
    if json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No indexes.");
        return Ok(());
    }
    println!("{:<20} {:<28} {:>9}   {}", "INDEX", "MODEL", "THRESHOLD", "LAST REINDEX");
    for r in &records {
        print_index_row(r);
    }
    Ok(())
}

fn print_index_row(r: &IndexRecord) {
    let reindex = match r.last_reindex_at {
        Some(ts) if r.last_reindex_failures > 0 => {
            format!("{} ({} failures)", format_ts_relative(ts), r.last_reindex_failures)
        }
        Some(ts) => format_ts_relative(ts),
        None => "never".to_string(),
    };
    println!(
        "{:<20} {:<28} {:>9.2}   {}",
        r.config.name, r.config.embedding_model, r.config.quality_threshold, reindex
    );
}

/// Ingest one file from disk.
pub async fn run_ingest(
    admin: &AdminService,
    index: &str,
    path: &Path,
    format: Option<DocumentFormat>,
    category: Option<String>,
    tags: Vec<String>,
    json: bool,
) -> Result<()> {
    let content =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let report = admin
        .ingest_document(NewDocument {
            index: index.to_string(),
            source: path.to_string_lossy().replace('\\', "/"),
            format,
            category,
            tags,
            content,
        })
        .await?;

    if json {
        return print_json(&report);
    }
    println!(
        "Ingested {} as {} ({} chunks, status {})",
        report.source,
        report.document_id,
        report.chunk_count,
        report.status.as_str()
    );
    if report.status == DocumentStatus::Failed {
        if let Some(failure) = &report.failure {
            println!(
                "  {} chunks left unembedded at stage {}: {}",
                report.unembedded,
                failure.stage.as_str(),
                failure.cause
            );
        }
    }
    Ok(())
}

pub async fn run_autoindex(admin: &AdminService, options: AutoIndexOptions, json: bool) -> Result<()> {
    let report = admin.auto_index(options).await?;
    if json {
        return print_json(&report);
    }
    print_autoindex(&report);
    Ok(())
}

/// Poll the knowledge folder until Ctrl-C, printing passes that changed
/// something. With `--json`, every pass is printed as one line.
pub async fn run_watch(
    admin: &AdminService,
    options: AutoIndexOptions,
    interval_secs: Option<u64>,
    json: bool,
) -> Result<()> {
    let Some(knowledge) = &admin.config().knowledge else {
        bail!("no [knowledge] folder is configured");
    };
    let secs = interval_secs.unwrap_or(knowledge.poll_interval_secs);
    if secs == 0 {
        bail!("--interval must be > 0");
    }

    eprintln!(
        "Watching {} every {}s (Ctrl-C to stop)",
        knowledge.root.display(),
        secs
    );
    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Stopping watch.");
        }
    };
    let passes = admin
        .watch_knowledge(options, Duration::from_secs(secs), shutdown, |report| {
            if json {
                match serde_json::to_string(report) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::warn!(error = %e, "failed to serialize auto-index report"),
                }
            } else if !report.indexed.is_empty() || !report.failed.is_empty() {
                print_autoindex(report);
            }
        })
        .await?;
    eprintln!("Watch finished after {} passes.", passes);
    Ok(())
}

fn print_autoindex(report: &AutoIndexReport) {
    println!(
        "Auto-index '{}': scanned {}, indexed {} ({} replaced), skipped {}, failed {}",
        report.index,
        report.scanned,
        report.indexed.len(),
        report.replaced.len(),
        report.skipped.len(),
        report.failed.len()
    );
    for f in &report.failed {
        println!("  failed: {} [{}] {}", f.source, f.code, f.message);
    }
}

/// Reindex options whose cancel flag trips on Ctrl-C.
fn cancellable_options(admin: &AdminService) -> ReindexOptions {
    let options = admin.reindex_options();
    let cancel = Arc::clone(&options.cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling reindex; in-flight chunks will finish.");
            cancel.store(true, Ordering::SeqCst);
        }
    });
    options
}

pub async fn run_reindex(admin: &AdminService, index: Option<&str>, all: bool, json: bool) -> Result<()> {
    let options = cancellable_options(admin);
    let reports = match (index, all) {
        (Some(name), false) => vec![admin.reindex(name, &options).await?],
        (None, true) => admin.reindex_all(&options).await?,
        _ => bail!("pass either an index name or --all"),
    };

    if json {
        print_json(&reports)?;
    } else {
        for r in &reports {
            print_reindex(r);
        }
    }

    if reports.iter().any(|r| r.aborted.is_some()) {
        bail!("reindex aborted: store unreachable");
    }
    Ok(())
}

fn print_reindex(r: &ReindexReport) {
    println!(
        "Reindex '{}': {} chunks, {} updated, {} failed, {} deleted, {} skipped, {} not reached{}",
        r.index,
        r.total,
        r.updated.len(),
        r.failed.len(),
        r.deleted.len(),
        r.skipped.len(),
        r.not_reached.len(),
        if r.cancelled { " (cancelled)" } else { "" }
    );
    if let Some(reason) = &r.aborted {
        println!("  aborted: {}", reason);
    }
    for f in &r.failed {
        println!("  failed: {} [{}] {}", f.chunk_id, f.code, f.message);
    }
}

pub async fn run_clear(admin: &AdminService, index: &str) -> Result<()> {
    let removed = admin.clear_index(index).await?;
    println!("Cleared index '{}' ({} chunks removed)", index, removed);
    Ok(())
}
