//! Quality commands (`kbe quality ...`).

use anyhow::Result;

use knowledge_engine_core::quality::QualityMetrics;

use crate::admin::AdminService;
use crate::export::print_json;

pub async fn run_metrics(admin: &AdminService, index: &str, json: bool) -> Result<()> {
    let m = admin.quality_metrics(index).await?;
    if json {
        return print_json(&m);
    }
    print_metrics(&m);
    Ok(())
}

fn print_metrics(m: &QualityMetrics) {
    println!("Quality: {} (threshold {:.2})", m.index, m.threshold);
    println!();
    println!("  Chunks:      {}", m.total);
    println!("  Scored:      {} ({} unscored)", m.scored, m.unscored);
    println!("  Passing:     {}", m.passed);
    println!("  Failing:     {}", m.failed);
    println!("  Pinned:      {}", m.pinned);
    match m.mean_score {
        Some(mean) => println!("  Mean score:  {:.3}", mean),
        None => println!("  Mean score:  -"),
    }

    let peak = m.histogram.iter().copied().max().unwrap_or(0).max(1);
    println!();
    for (i, count) in m.histogram.iter().enumerate() {
        let bar = "#".repeat(((*count * 40) / peak) as usize);
        println!(
            "  {:.1}-{:.1} {:>6} {}",
            i as f64 / 10.0,
            (i + 1) as f64 / 10.0,
            count,
            bar
        );
    }
}

pub async fn run_config(admin: &AdminService) -> Result<()> {
    print_json(&admin.quality_config().await?)
}

/// Score `text` without storing it. Returns whether it passed.
pub fn run_eval(admin: &AdminService, text: &str, threshold: Option<f64>, json: bool) -> Result<bool> {
    let eval = admin.evaluate_content(text, threshold)?;
    if json {
        print_json(&eval)?;
        return Ok(eval.verdict.passed);
    }
    println!(
        "score: {:.3} ({} at threshold {:.2})",
        eval.verdict.score,
        if eval.verdict.passed { "pass" } else { "fail" },
        eval.threshold
    );
    println!(
        "  length={:.3} diversity={:.3} boilerplate={:.3} structure={:.3}",
        eval.heuristics.length,
        eval.heuristics.diversity,
        eval.heuristics.boilerplate,
        eval.heuristics.structure
    );
    for reason in &eval.verdict.reasons {
        println!("  - {}", reason);
    }
    Ok(eval.verdict.passed)
}

pub async fn run_validate(admin: &AdminService, index: &str, json: bool) -> Result<()> {
    let report = admin.validate_index(index).await?;
    if json {
        return print_json(&report);
    }
    println!(
        "Validated {} chunks in '{}' at threshold {:.2}",
        report.total, report.index, report.threshold
    );
    println!("  passed:  {}", report.passed);
    println!("  failed:  {}", report.failed);
    println!("  errored: {}", report.errored);
    if let Some(mean) = report.mean_score {
        println!("  mean:    {:.3}", mean);
    }
    for id in &report.failing_chunk_ids {
        println!("  failing: {}", id);
    }
    for e in &report.errors {
        println!("  error:   {} [{}] {}", e.chunk_id, e.code, e.message);
    }
    Ok(())
}
