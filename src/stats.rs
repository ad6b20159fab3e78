//! Index statistics and health overview.
//!
//! Provides a quick summary of what's indexed: document and chunk counts,
//! embedding coverage, quality averages, and reindex history per index.
//! Used by `kbe stats` and `kbe health`.

use anyhow::Result;

use knowledge_engine_core::models::{format_ts_iso, HealthStatus, IndexHealth, IndexStats};

use crate::admin::AdminService;

/// Print stats for one index, or for every index when `index` is `None`.
pub async fn run_stats(admin: &AdminService, index: Option<&str>) -> Result<()> {
    let names: Vec<String> = match index {
        Some(name) => vec![name.to_string()],
        None => admin
            .list_indexes()
            .await?
            .into_iter()
            .map(|r| r.config.name)
            .collect(),
    };

    let db_path = &admin.config().db.path;
    let db_size = std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0);

    println!("Knowledge Engine: Index Stats");
    println!("=============================");
    println!();
    println!("  Database:    {}", db_path.display());
    println!("  Size:        {}", format_bytes(db_size));

    if names.is_empty() {
        println!();
        println!("  No indexes. Run `kbe init` or `kbe index create <name>`.");
        println!();
        return Ok(());
    }

    println!();
    println!(
        "  {:<20} {:>6} {:>8} {:>10} {:>10} {:>8}   {}",
        "INDEX", "DOCS", "CHUNKS", "EMBEDDED", "UNEMBEDDED", "QUALITY", "LAST REINDEX"
    );
    println!("  {}", "-".repeat(88));

    let cache = admin.cache_stats();
    for name in &names {
        let stats = admin.index_stats(name).await?;
        print_stats_row(&stats);
    }

    println!();
    println!(
        "  Search cache: {} entries, {} hits, {} misses (ttl {}s)",
        cache.entries, cache.hits, cache.misses, cache.ttl_secs
    );
    println!();
    Ok(())
}

fn print_stats_row(s: &IndexStats) {
    let quality = s
        .average_quality
        .map(|q| format!("{:.3}", q))
        .unwrap_or_else(|| "-".to_string());
    let reindex = match s.last_reindex_at {
        Some(ts) => format_ts_relative(ts),
        None => "never".to_string(),
    };
    println!(
        "  {:<20} {:>6} {:>8} {:>10} {:>10} {:>8}   {}",
        s.index, s.document_count, s.chunk_count, s.embedded_count, s.unembedded_count, quality, reindex
    );
}

/// Print the health verdict for `index`. Returns whether it is healthy.
pub async fn run_health(admin: &AdminService, index: &str) -> Result<bool> {
    let health = admin.index_health(index).await?;
    print_health(&health);
    Ok(health.status == HealthStatus::Healthy)
}

fn print_health(health: &IndexHealth) {
    let status = match health.status {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Degraded => "degraded",
    };
    println!("{}: {}", health.index, status);
    for reason in &health.reasons {
        println!("  - {}", reason);
    }
    if let Some(stats) = &health.stats {
        println!(
            "  chunks={} indexed={} unembedded={} failed_docs={}",
            stats.chunk_count, stats.indexed_count, stats.unembedded_count, stats.failed_document_count
        );
        if let Some(ts) = stats.last_updated_at {
            println!("  last update: {}", format_ts_iso(ts));
        }
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
pub fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}
