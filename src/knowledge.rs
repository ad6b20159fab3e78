//! Knowledge folder scanning for `autoindex`.
//!
//! Walks `[knowledge] root` and applies include/exclude globs. A file's
//! first directory below the root becomes its category (`faq/reset.md` →
//! `faq`); files at the root are uncategorized. The scan only collects
//! paths; contents are read when a file is indexed, so memory stays
//! bounded by the batch being processed. Entries that cannot be walked
//! (permission errors, dangling symlinks) are reported next to the files
//! instead of failing the scan.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use knowledge_engine_core::models::DocumentFormat;

use crate::config::KnowledgeConfig;

/// One file found under the knowledge root.
#[derive(Debug, Clone)]
pub struct KnowledgeFile {
    /// Path relative to the root, with `/` separators.
    pub source: String,
    pub path: PathBuf,
    pub format: DocumentFormat,
    pub category: Option<String>,
}

impl KnowledgeFile {
    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }
}

/// An entry under the root that could not be walked.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanFailure {
    pub source: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeScan {
    pub files: Vec<KnowledgeFile>,
    pub failures: Vec<ScanFailure>,
}

/// Walk the knowledge root. Fails only when the root itself is missing or
/// a glob is invalid.
pub fn scan_knowledge(config: &KnowledgeConfig) -> Result<KnowledgeScan> {
    let root = &config.root;
    if !root.exists() {
        bail!("Knowledge root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;
    let wanted = |rel: &str| include_set.is_match(rel) && !exclude_set.is_match(rel);

    let mut scan = KnowledgeScan::default();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let source = e
                    .path()
                    .map(|p| relative_source(root, p))
                    .unwrap_or_else(|| root.display().to_string());
                if e.path().is_some() && !wanted(&source) {
                    continue;
                }
                tracing::warn!(source = %source, error = %e, "knowledge entry unreadable");
                scan.failures.push(ScanFailure {
                    source,
                    message: e.to_string(),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let rel_str = relative_source(root, path);
        if !wanted(&rel_str) {
            continue;
        }

        let category = rel_str.split_once('/').map(|(dir, _)| dir.to_string());
        scan.files.push(KnowledgeFile {
            path: path.to_path_buf(),
            format: DocumentFormat::detect(&rel_str),
            category,
            source: rel_str,
        });
    }

    // Sort for deterministic ordering
    scan.files.sort_by(|a, b| a.source.cmp(&b.source));
    scan.failures.sort_by(|a, b| a.source.cmp(&b.source));

    tracing::debug!(
        root = %root.display(),
        files = scan.files.len(),
        failures = scan.failures.len(),
        "knowledge folder scanned"
    );
    Ok(scan)
}

fn relative_source(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &Path) -> KnowledgeConfig {
        KnowledgeConfig {
            root: root.to_path_buf(),
            index: "default".into(),
            include_globs: vec!["**/*.md".into(), "**/*.json".into()],
            exclude_globs: vec!["drafts/**".into()],
            follow_symlinks: false,
            auto_index: false,
            batch_size: 4,
            poll_interval_secs: 30,
        }
    }

    #[test]
    fn test_scan_applies_globs_and_categories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("faq")).unwrap();
        std::fs::create_dir_all(root.join("drafts")).unwrap();
        std::fs::write(root.join("faq/reset.md"), "# Reset\n").unwrap();
        std::fs::write(root.join("intro.md"), "hello").unwrap();
        std::fs::write(root.join("notes.txt"), "skip me").unwrap();
        std::fs::write(root.join("drafts/wip.md"), "skip me too").unwrap();

        let files = scan_knowledge(&config(root)).unwrap().files;
        let sources: Vec<&str> = files.iter().map(|f| f.source.as_str()).collect();
        assert_eq!(sources, vec!["faq/reset.md", "intro.md"]);
        assert_eq!(files[0].category.as_deref(), Some("faq"));
        assert_eq!(files[1].category, None);
        assert_eq!(files[0].format, DocumentFormat::Markdown);
    }

    #[test]
    fn test_missing_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir.path().join("absent"));
        assert!(scan_knowledge(&cfg).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("good.md"), "# Good\n").unwrap();
        std::os::unix::fs::symlink(root.join("gone.md"), root.join("broken.md")).unwrap();
        std::os::unix::fs::symlink(root.join("gone.txt"), root.join("ignored.txt")).unwrap();

        let mut cfg = config(root);
        cfg.follow_symlinks = true;
        let scan = scan_knowledge(&cfg).unwrap();
        let sources: Vec<&str> = scan.files.iter().map(|f| f.source.as_str()).collect();
        assert_eq!(sources, vec!["good.md"]);
        assert_eq!(scan.failures.len(), 1);
        assert_eq!(scan.failures[0].source, "broken.md");
    }

    #[tokio::test]
    async fn test_contents_are_read_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("intro.md"), "hello").unwrap();

        let scan = scan_knowledge(&config(root)).unwrap();
        std::fs::write(root.join("intro.md"), "hello again").unwrap();
        assert_eq!(scan.files[0].read().await.unwrap(), b"hello again");
    }
}
