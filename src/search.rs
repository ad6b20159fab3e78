//! Search and saved-query commands.
//!
//! `kbe search` runs a test search against one index and prints ranked
//! hits; `kbe queries` manages named searches that can be re-run later.

use anyhow::Result;

use knowledge_engine_core::models::{format_ts_iso, SavedQuery};
use knowledge_engine_core::search::{SearchHit, SearchOutcome};

use crate::admin::{AdminService, NewSavedQuery};
use crate::export::print_json;
use crate::search_service::TestSearch;

pub async fn run_search(admin: &AdminService, req: TestSearch, json: bool) -> Result<()> {
    let outcome = admin.test_search(&req).await?;
    print_outcome(&outcome, json)
}

pub fn print_outcome(outcome: &SearchOutcome, json: bool) -> Result<()> {
    if json {
        return print_json(outcome);
    }

    println!("mode: {}", outcome.mode);
    if let Some(reason) = &outcome.fallback_reason {
        println!("fallback: {}", reason);
    }
    if outcome.stale {
        println!("warning: store unreachable, showing cached results");
    }
    println!();

    if outcome.hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in outcome.hits.iter().enumerate() {
        print_hit(i + 1, hit);
    }
    Ok(())
}

fn print_hit(rank: usize, hit: &SearchHit) {
    let quality = hit
        .quality_score
        .map(|q| format!("{:.2}", q))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{}. [{:.4}] {} #{}",
        rank,
        hit.score,
        hit.category.as_deref().unwrap_or("uncategorized"),
        hit.ordinal
    );
    println!("    quality: {}", quality);
    println!("    excerpt: \"{}\"", hit.snippet.replace('\n', " ").trim());
    if let Some(ex) = &hit.explanation {
        println!(
            "    explain: lexical={:.4}x{:.2} vector={:.4}x{:.2} quality={:.4}x{:.2} (candidates {}/{})",
            ex.lexical.value,
            ex.lexical.weight,
            ex.vector.value,
            ex.vector.weight,
            ex.quality_boost.value,
            ex.quality_boost.weight,
            ex.lexical_candidates,
            ex.vector_candidates
        );
    }
    println!("    chunk: {}", hit.chunk_id);
    println!("    document: {}", hit.document_id);
    println!();
}

pub async fn run_save_query(admin: &AdminService, new: NewSavedQuery) -> Result<()> {
    let saved = admin.save_query(new).await?;
    println!("Saved query '{}' ({})", saved.name, saved.id);
    Ok(())
}

pub async fn run_list_queries(admin: &AdminService, index: Option<&str>, json: bool) -> Result<()> {
    let queries = admin.list_saved_queries(index).await?;
    if json {
        return print_json(&queries);
    }
    if queries.is_empty() {
        println!("No saved queries.");
        return Ok(());
    }
    println!("{:<24} {:<16} {:>5}  {:<20}  QUERY", "NAME", "INDEX", "LIMIT", "CREATED");
    for q in &queries {
        print_query_row(q);
    }
    Ok(())
}

fn print_query_row(q: &SavedQuery) {
    println!(
        "{:<24} {:<16} {:>5}  {:<20}  {}",
        q.name,
        q.index,
        q.limit,
        format_ts_iso(q.created_at),
        q.query
    );
}

pub async fn run_saved_query(admin: &AdminService, id_or_name: &str, explain: bool, json: bool) -> Result<()> {
    let outcome = admin.run_saved_query(id_or_name, explain).await?;
    print_outcome(&outcome, json)
}

pub async fn run_delete_query(admin: &AdminService, id_or_name: &str) -> Result<()> {
    let id = admin.delete_saved_query(id_or_name).await?;
    println!("Deleted saved query {}", id);
    Ok(())
}
