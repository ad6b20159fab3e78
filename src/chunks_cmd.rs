//! Chunk inspection and editing commands (`kbe chunks ...`).

use anyhow::Result;

use knowledge_engine_core::models::{format_ts_iso, Chunk, ChunkPatch};
use knowledge_engine_core::query::{ChunkPage, ChunkQuery, Page};
use knowledge_engine_core::store::snippet;

use crate::admin::AdminService;
use crate::export::print_json;

pub async fn run_list(admin: &AdminService, index: &str, query: &ChunkQuery, json: bool) -> Result<()> {
    let page = admin.list_chunks(index, query).await?;
    print_page(&page, json)
}

pub async fn run_low_quality(
    admin: &AdminService,
    index: &str,
    threshold: Option<f64>,
    page: Page,
    json: bool,
) -> Result<()> {
    let page = admin.low_quality_chunks(index, threshold, page).await?;
    print_page(&page, json)
}

fn print_page(page: &ChunkPage, json: bool) -> Result<()> {
    if json {
        return print_json(page);
    }
    if page.items.is_empty() {
        println!("No chunks (total {}).", page.total);
        return Ok(());
    }
    println!(
        "{:<36} {:>4} {:>7} {:<10} {:<14}  TEXT",
        "ID", "ORD", "QUALITY", "STATE", "CATEGORY"
    );
    for c in &page.items {
        let quality = c
            .quality_score
            .map(|q| format!("{:.3}", q))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<36} {:>4} {:>7} {:<10} {:<14}  {}",
            c.id,
            c.ordinal,
            quality,
            c.state.as_str(),
            c.category.as_deref().unwrap_or("-"),
            snippet(&c.text, 60).replace('\n', " ")
        );
    }
    println!();
    println!(
        "Showing {}-{} of {}",
        page.offset + 1,
        page.offset + page.items.len(),
        page.total
    );
    Ok(())
}

pub async fn run_get(admin: &AdminService, id: &str, json: bool) -> Result<()> {
    let chunk = admin.get_chunk(id).await?;
    print_chunk(&chunk, json)
}

pub async fn run_update(admin: &AdminService, id: &str, patch: &ChunkPatch, json: bool) -> Result<()> {
    let chunk = admin.update_chunk(id, patch).await?;
    if !json {
        println!("Updated chunk {}", chunk.id);
    }
    print_chunk(&chunk, json)
}

pub async fn run_delete(admin: &AdminService, id: &str) -> Result<()> {
    let chunk = admin.delete_chunk(id).await?;
    println!("Deleted chunk {} (document {})", chunk.id, chunk.document_id);
    Ok(())
}

pub async fn run_reembed(admin: &AdminService, id: &str, json: bool) -> Result<()> {
    let chunk = admin.reembed_chunk(id).await?;
    if !json {
        println!("Re-embedded chunk {}", chunk.id);
    }
    print_chunk(&chunk, json)
}

pub async fn run_sample(admin: &AdminService, index: &str, n: usize) -> Result<()> {
    let points = admin.embedding_sample(index, n).await?;
    print_json(&points)
}

fn print_chunk(chunk: &Chunk, json: bool) -> Result<()> {
    if json {
        return print_json(chunk);
    }
    println!("--- Chunk ---");
    println!("id:            {}", chunk.id);
    println!("document:      {}", chunk.document_id);
    println!("index:         {}", chunk.index);
    println!("ordinal:       {}", chunk.ordinal);
    println!("state:         {}", chunk.state.as_str());
    println!("category:      {}", chunk.category.as_deref().unwrap_or("-"));
    println!("tags:          {}", chunk.tags.join(", "));
    match chunk.quality_score {
        Some(q) => println!(
            "quality:       {:.3}{}",
            q,
            if chunk.quality_pinned { " (pinned)" } else { "" }
        ),
        None => println!("quality:       -"),
    }
    for reason in &chunk.quality_reasons {
        println!("  - {}", reason);
    }
    println!(
        "embedding:     {}",
        match (&chunk.embedding, &chunk.embedding_model) {
            (Some(v), Some(m)) => format!("{} dims ({})", v.len(), m),
            (Some(v), None) => format!("{} dims", v.len()),
            _ => "none".to_string(),
        }
    );
    println!("updated_at:    {}", format_ts_iso(chunk.updated_at));
    println!();
    println!("--- Text ({} chars) ---", chunk.char_len);
    println!("{}", chunk.text);
    Ok(())
}
