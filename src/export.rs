//! Export a snapshot of every index as JSON.
//!
//! The snapshot carries each index's configuration, stats, and health,
//! the active quality, retrieval, and chunking settings, and all saved
//! queries. Useful for dashboards and for diffing engine state over time.

use anyhow::Result;
use std::path::Path;

use crate::admin::AdminService;

/// Export the snapshot as pretty JSON.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn run_export(admin: &AdminService, output: Option<&Path>) -> Result<()> {
    let snapshot = admin.export_snapshot().await?;
    let json = serde_json::to_string_pretty(&snapshot)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)?;
            eprintln!(
                "Exported {} indexes, {} saved queries to {}",
                snapshot.indexes.len(),
                snapshot.saved_queries.len(),
                path.display()
            );
        }
        None => {
            println!("{}", json);
        }
    }
    Ok(())
}

/// Print any serializable value as pretty JSON on stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
