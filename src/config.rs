//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to serde
//! defaults. [`load_config`] parses the file and validates cross-field
//! constraints before anything touches the database.
//!
//! ```toml
//! [db]
//! path = "./data/kbe.sqlite"
//!
//! [chunking]
//! max_chars = 1000
//! overlap_chars = 100
//! strategy = "paragraph"
//!
//! [embedding]
//! provider = "hash"
//! dims = 256
//!
//! [[indexes]]
//! name = "support"
//! quality_threshold = 0.5
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use knowledge_engine_core::chunk::{ChunkerConfig, SplitStrategy};
use knowledge_engine_core::quality::{HeuristicWeights, OverridePolicy, QualityConfig};
use knowledge_engine_core::search::SearchParams;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub quality: QualitySection,
    #[serde(default)]
    pub knowledge: Option<KnowledgeConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub indexes: Vec<IndexEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    #[serde(default)]
    pub strategy: SplitStrategy,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
            strategy: SplitStrategy::Paragraph,
        }
    }
}

impl ChunkingConfig {
    pub fn chunker(&self) -> ChunkerConfig {
        ChunkerConfig {
            max_chars: self.max_chars,
            overlap_chars: self.overlap_chars,
            strategy: self.strategy,
        }
    }
}

fn default_max_chars() -> usize {
    1000
}
fn default_overlap_chars() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default)]
    pub quality_boost: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_lexical: usize,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: usize,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: default_hybrid_alpha(),
            quality_boost: 0.0,
            candidate_k_lexical: default_candidate_k(),
            candidate_k_vector: default_candidate_k(),
            default_limit: default_limit(),
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> SearchParams {
        SearchParams {
            hybrid_alpha: self.hybrid_alpha,
            quality_boost: self.quality_boost,
            candidate_k_lexical: self.candidate_k_lexical,
            candidate_k_vector: self.candidate_k_vector,
        }
    }
}

fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_candidate_k() -> usize {
    80
}
fn default_limit() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    500
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct QualitySection {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    #[serde(default = "default_quality_max_chars")]
    pub max_chars: usize,
    #[serde(default)]
    pub override_policy: OverridePolicy,
    #[serde(default = "HeuristicWeights::default")]
    pub weights: HeuristicWeights,
}

impl Default for QualitySection {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            min_chars: default_min_chars(),
            max_chars: default_quality_max_chars(),
            override_policy: OverridePolicy::Rescore,
            weights: HeuristicWeights::default(),
        }
    }
}

impl QualitySection {
    pub fn enforcer_config(&self) -> QualityConfig {
        QualityConfig {
            weights: self.weights,
            min_chars: self.min_chars,
            max_chars: self.max_chars,
            default_threshold: self.threshold,
            override_policy: self.override_policy,
        }
    }
}

fn default_threshold() -> f64 {
    0.5
}
fn default_min_chars() -> usize {
    80
}
fn default_quality_max_chars() -> usize {
    4000
}

/// The knowledge folder scanned by `autoindex`.
#[derive(Debug, Deserialize, Clone)]
pub struct KnowledgeConfig {
    pub root: PathBuf,
    #[serde(default = "default_knowledge_index")]
    pub index: String,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Run `autoindex` automatically before every command.
    #[serde(default)]
    pub auto_index: bool,
    #[serde(default = "default_knowledge_batch")]
    pub batch_size: usize,
    /// Seconds between passes of `autoindex --watch`.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_knowledge_index() -> String {
    "default".to_string()
}
fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
        "**/*.json".to_string(),
    ]
}
fn default_knowledge_batch() -> usize {
    16
}
fn default_poll_interval() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    300
}
fn default_max_entries() -> usize {
    256
}

/// An index declared in configuration; created by `kbe init`.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexEntry {
    pub name: String,
    #[serde(default)]
    pub quality_threshold: Option<f64>,
}

impl Config {
    /// Defaults for everything except the database path.
    pub fn with_db(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            quality: QualitySection::default(),
            knowledge: None,
            cache: CacheConfig::default(),
            indexes: Vec::new(),
        }
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        self.chunking.chunker().validate()?;
        self.retrieval.params().validate()?;
        self.quality.enforcer_config().validate()?;

        if self.retrieval.default_limit == 0 {
            bail!("retrieval.default_limit must be >= 1");
        }

        match self.embedding.provider.as_str() {
            "disabled" | "hash" | "openai" | "ollama" | "local" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, hash, openai, ollama, or local.",
                other
            ),
        }
        if matches!(self.embedding.provider.as_str(), "openai" | "ollama") {
            if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                );
            }
        }
        if self.embedding.batch_size == 0 || self.embedding.concurrency == 0 {
            bail!("embedding.batch_size and embedding.concurrency must be > 0");
        }

        if let Some(k) = &self.knowledge {
            if k.batch_size == 0 {
                bail!("knowledge.batch_size must be > 0");
            }
            if k.poll_interval_secs == 0 {
                bail!("knowledge.poll_interval_secs must be > 0");
            }
        }

        for entry in &self.indexes {
            if let Some(t) = entry.quality_threshold {
                if !(0.0..=1.0).contains(&t) {
                    bail!(
                        "indexes.{}.quality_threshold must be in [0.0, 1.0]",
                        entry.name
                    );
                }
            }
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse("[db]\npath = \"kb.sqlite\"\n").unwrap();
        assert_eq!(cfg.chunking.max_chars, 1000);
        assert_eq!(cfg.retrieval.hybrid_alpha, 0.6);
        assert_eq!(cfg.retrieval.quality_boost, 0.0);
        assert_eq!(cfg.cache.ttl_secs, 300);
        assert_eq!(cfg.quality.override_policy, OverridePolicy::Rescore);
        assert!(!cfg.embedding.is_enabled());
    }

    #[test]
    fn test_overlap_must_be_below_max() {
        let err = parse("[db]\npath = \"kb.sqlite\"\n[chunking]\nmax_chars = 100\noverlap_chars = 100\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let toml_str = r#"
[db]
path = "kb.sqlite"
[quality.weights]
length = 0.5
diversity = 0.5
boilerplate = 0.5
structure = 0.5
"#;
        assert!(parse(toml_str).is_err());
    }

    #[test]
    fn test_openai_requires_model_and_dims() {
        let err = parse("[db]\npath = \"kb.sqlite\"\n[embedding]\nprovider = \"openai\"\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_full_config() {
        let toml_str = r#"
[db]
path = "kb.sqlite"

[chunking]
max_chars = 500
overlap_chars = 50
strategy = "sentence"

[retrieval]
hybrid_alpha = 0.4
quality_boost = 0.1

[embedding]
provider = "hash"
dims = 128

[quality]
threshold = 0.6
override_policy = "pin"

[knowledge]
root = "./knowledge"
index = "support"

[[indexes]]
name = "support"
quality_threshold = 0.7
"#;
        let cfg = parse(toml_str).unwrap();
        assert_eq!(cfg.chunking.strategy, SplitStrategy::Sentence);
        assert_eq!(cfg.quality.override_policy, OverridePolicy::Pin);
        let knowledge = cfg.knowledge.unwrap();
        assert_eq!(knowledge.index, "support");
        assert_eq!(knowledge.poll_interval_secs, 30);
        assert_eq!(cfg.indexes[0].quality_threshold, Some(0.7));
    }
}
