//! Chunk quality scoring and index-level validation.
//!
//! The [`QualityEnforcer`] combines four heuristics, each normalized to
//! `[0, 1]`, into a single weighted score:
//!
//! | Heuristic     | Measures                                           |
//! |---------------|----------------------------------------------------|
//! | `length`      | character count against `min_chars` / `max_chars`  |
//! | `diversity`   | type/token ratio of the lowercased word tokens     |
//! | `boilerplate` | share of lines that are not navigation or legalese |
//! | `structure`   | headings, lists, examples, complete sentences      |
//!
//! Scoring is a pure function of (text, configuration, threshold), so the
//! same chunk always yields the same [`QualityVerdict`].

use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::embedding::tokenize;
use crate::error::{EngineError, EngineResult};
use crate::models::{now_ts, Chunk};

/// Heuristic scores below this emit a reason.
const REASON_CUTOFF: f64 = 0.5;

/// Type/token ratio treated as fully diverse.
const DIVERSITY_TARGET: f64 = 0.5;

const BOILERPLATE_PHRASES: &[&str] = &[
    "all rights reserved",
    "click here",
    "cookie",
    "privacy policy",
    "terms of service",
    "terms and conditions",
    "subscribe",
    "sign in",
    "log in",
    "skip to content",
    "back to top",
    "share this",
    "read more",
    "copyright",
    "©",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeuristicWeights {
    pub length: f64,
    pub diversity: f64,
    pub boilerplate: f64,
    pub structure: f64,
}

impl Default for HeuristicWeights {
    fn default() -> Self {
        HeuristicWeights {
            length: 0.30,
            diversity: 0.25,
            boilerplate: 0.25,
            structure: 0.20,
        }
    }
}

impl HeuristicWeights {
    pub fn validate(&self) -> EngineResult<()> {
        let all = [self.length, self.diversity, self.boilerplate, self.structure];
        if all.iter().any(|w| *w < 0.0 || w.is_nan()) {
            return Err(EngineError::Config(
                "quality weights must be non-negative".into(),
            ));
        }
        let sum: f64 = all.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(EngineError::Config(format!(
                "quality weights must sum to 1.0, got {:.4}",
                sum
            )));
        }
        Ok(())
    }
}

/// What happens to a manual score override when the chunk is reembedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverridePolicy {
    /// The next reembed recomputes and overwrites the score.
    #[default]
    Rescore,
    /// Overridden scores survive reembeds and reindexes.
    Pin,
}

impl FromStr for OverridePolicy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rescore" => Ok(OverridePolicy::Rescore),
            "pin" => Ok(OverridePolicy::Pin),
            other => Err(EngineError::Config(format!(
                "unknown override policy '{}'; expected rescore or pin",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    pub weights: HeuristicWeights,
    pub min_chars: usize,
    pub max_chars: usize,
    /// Threshold for indexes that do not set their own.
    pub default_threshold: f64,
    pub override_policy: OverridePolicy,
}

impl Default for QualityConfig {
    fn default() -> Self {
        QualityConfig {
            weights: HeuristicWeights::default(),
            min_chars: 80,
            max_chars: 4000,
            default_threshold: 0.5,
            override_policy: OverridePolicy::Rescore,
        }
    }
}

impl QualityConfig {
    pub fn validate(&self) -> EngineResult<()> {
        self.weights.validate()?;
        if self.min_chars == 0 || self.min_chars >= self.max_chars {
            return Err(EngineError::Config(format!(
                "quality.min_chars ({}) must be positive and below quality.max_chars ({})",
                self.min_chars, self.max_chars
            )));
        }
        if !(0.0..=1.0).contains(&self.default_threshold) {
            return Err(EngineError::Config(
                "quality.threshold must be in [0.0, 1.0]".into(),
            ));
        }
        Ok(())
    }
}

/// Per-heuristic scores, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeuristicScores {
    pub length: f64,
    pub diversity: f64,
    pub boilerplate: f64,
    pub structure: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityVerdict {
    pub score: f64,
    pub passed: bool,
    pub reasons: Vec<String>,
}

/// Anything that can produce a verdict for a stored chunk.
pub trait ChunkScorer: Send + Sync {
    fn score_chunk(&self, chunk: &Chunk, threshold: f64) -> EngineResult<QualityVerdict>;
}

#[derive(Debug, Clone)]
pub struct QualityEnforcer {
    config: QualityConfig,
}

impl QualityEnforcer {
    pub fn new(config: QualityConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(QualityEnforcer { config })
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Score arbitrary text against `threshold`. Nothing is persisted.
    pub fn evaluate(&self, text: &str, threshold: f64) -> QualityVerdict {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return QualityVerdict {
                score: 0.0,
                passed: false,
                reasons: vec!["length: empty after trimming".to_string()],
            };
        }

        let h = self.heuristics(trimmed);
        let w = &self.config.weights;
        let score = (w.length * h.length
            + w.diversity * h.diversity
            + w.boilerplate * h.boilerplate
            + w.structure * h.structure)
            .clamp(0.0, 1.0);

        let mut reasons = Vec::new();
        let chars = trimmed.chars().count();
        if h.length < REASON_CUTOFF {
            if chars < self.config.min_chars {
                reasons.push(format!(
                    "length: {} chars is below the minimum of {}",
                    chars, self.config.min_chars
                ));
            } else {
                reasons.push(format!(
                    "length: {} chars exceeds the maximum of {}",
                    chars, self.config.max_chars
                ));
            }
        }
        if h.diversity < REASON_CUTOFF {
            reasons.push(format!("diversity: low lexical diversity ({:.2})", h.diversity));
        }
        if h.boilerplate < REASON_CUTOFF {
            reasons.push(format!(
                "boilerplate: mostly navigation or boilerplate lines ({:.2})",
                h.boilerplate
            ));
        }
        if h.structure < REASON_CUTOFF {
            reasons.push(format!("structure: few structural cues ({:.2})", h.structure));
        }

        QualityVerdict {
            score,
            passed: score >= threshold,
            reasons,
        }
    }

    /// Raw heuristic scores for already-trimmed, non-empty text.
    pub fn heuristics(&self, text: &str) -> HeuristicScores {
        HeuristicScores {
            length: length_score(text.chars().count(), self.config.min_chars, self.config.max_chars),
            diversity: diversity_score(text),
            boilerplate: boilerplate_score(text),
            structure: structure_score(text),
        }
    }
}

impl ChunkScorer for QualityEnforcer {
    fn score_chunk(&self, chunk: &Chunk, threshold: f64) -> EngineResult<QualityVerdict> {
        Ok(self.evaluate(&chunk.text, threshold))
    }
}

fn length_score(chars: usize, min: usize, max: usize) -> f64 {
    if chars == 0 {
        0.0
    } else if chars < min {
        chars as f64 / min as f64
    } else if chars <= max {
        1.0
    } else {
        (1.0 - (chars - max) as f64 / max as f64).max(0.0)
    }
}

fn diversity_score(text: &str) -> f64 {
    let tokens: Vec<String> = tokenize(text).collect();
    if tokens.is_empty() {
        return 0.0;
    }
    let unique: HashSet<&str> = tokens.iter().map(String::as_str).collect();
    let ttr = unique.len() as f64 / tokens.len() as f64;
    (ttr / DIVERSITY_TARGET).min(1.0)
}

fn boilerplate_score(text: &str) -> f64 {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.is_empty() {
        return 0.0;
    }
    let noisy = lines.iter().filter(|l| is_boilerplate_line(l)).count();
    1.0 - noisy as f64 / lines.len() as f64
}

fn is_boilerplate_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    if BOILERPLATE_PHRASES.iter().any(|p| lower.contains(p)) {
        return true;
    }
    if !line.chars().any(char::is_alphanumeric) {
        return true;
    }
    // Menu trails like "Home | Products | Contact" or "Docs » Guides » Setup".
    let segments: Vec<&str> = line
        .split(|c| c == '|' || c == '»' || c == '›')
        .map(str::trim)
        .collect();
    segments.len() >= 3 && segments.iter().all(|s| s.split_whitespace().count() <= 3)
}

fn structure_score(text: &str) -> f64 {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let has_heading = lines.iter().any(|l| {
        l.starts_with('#')
            || (l.ends_with(':') && l.split_whitespace().count() <= 6 && l.len() > 1)
    });
    let has_list = lines.iter().any(|l| {
        l.starts_with("- ")
            || l.starts_with("* ")
            || l.split_once(". ")
                .is_some_and(|(n, _)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
    });
    let lower = text.to_lowercase();
    let has_example = text.contains("```")
        || lower.contains("example")
        || lower.contains("e.g.")
        || lower.contains("for instance");
    let has_sentence = text.trim_end().ends_with(|c| matches!(c, '.' | '!' | '?'));

    let mut score = 0.0;
    if has_heading {
        score += 0.4;
    }
    if has_list {
        score += 0.2;
    }
    if has_example {
        score += 0.3;
    }
    if has_sentence {
        score += 0.3;
    }
    f64::min(score, 1.0)
}

/// One chunk whose scoring raised an error during validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkError {
    pub chunk_id: String,
    pub code: String,
    pub message: String,
}

/// Aggregate result of scoring every chunk in an index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub index: String,
    pub threshold: f64,
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub errored: u64,
    pub mean_score: Option<f64>,
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p99: Option<f64>,
    pub failing_chunk_ids: Vec<String>,
    pub errors: Vec<ChunkError>,
    pub generated_at: i64,
}

/// Score every chunk, isolating per-chunk failures into the report.
pub fn validate_chunks(
    index: &str,
    threshold: f64,
    chunks: &[Chunk],
    scorer: &dyn ChunkScorer,
) -> ValidationReport {
    let mut scores = Vec::with_capacity(chunks.len());
    let mut passed = 0u64;
    let mut failing_chunk_ids = Vec::new();
    let mut errors = Vec::new();

    for chunk in chunks {
        match scorer.score_chunk(chunk, threshold) {
            Ok(verdict) => {
                scores.push(verdict.score);
                if verdict.passed {
                    passed += 1;
                } else {
                    failing_chunk_ids.push(chunk.id.clone());
                }
            }
            Err(e) => {
                tracing::warn!(chunk_id = %chunk.id, error = %e, "quality scoring failed");
                errors.push(ChunkError {
                    chunk_id: chunk.id.clone(),
                    code: e.code().to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    let mean_score = mean(&scores);
    scores.sort_by(f64::total_cmp);
    ValidationReport {
        index: index.to_string(),
        threshold,
        total: chunks.len() as u64,
        passed,
        failed: failing_chunk_ids.len() as u64,
        errored: errors.len() as u64,
        mean_score,
        p50: percentile(&scores, 50.0),
        p90: percentile(&scores, 90.0),
        p99: percentile(&scores, 99.0),
        failing_chunk_ids,
        errors,
        generated_at: now_ts(),
    }
}

/// Aggregate view of the scores already stored on an index's chunks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityMetrics {
    pub index: String,
    pub threshold: f64,
    pub total: u64,
    pub scored: u64,
    pub unscored: u64,
    pub passed: u64,
    pub failed: u64,
    pub pinned: u64,
    pub mean_score: Option<f64>,
    /// Counts per tenth: `[0.0, 0.1)`, `[0.1, 0.2)`, ... `[0.9, 1.0]`.
    pub histogram: [u64; 10],
}

pub fn quality_metrics(index: &str, threshold: f64, chunks: &[Chunk]) -> QualityMetrics {
    let mut histogram = [0u64; 10];
    let mut scores = Vec::new();
    let mut pinned = 0;
    for chunk in chunks {
        if chunk.quality_pinned {
            pinned += 1;
        }
        if let Some(score) = chunk.quality_score {
            scores.push(score);
            let bucket = ((score * 10.0).floor() as usize).min(9);
            histogram[bucket] += 1;
        }
    }
    let passed = scores.iter().filter(|s| **s >= threshold).count() as u64;
    QualityMetrics {
        index: index.to_string(),
        threshold,
        total: chunks.len() as u64,
        scored: scores.len() as u64,
        unscored: (chunks.len() - scores.len()) as u64,
        passed,
        failed: scores.len() as u64 - passed,
        pinned,
        mean_score: mean(&scores),
        histogram,
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Nearest-rank percentile over sorted values.
fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    Some(sorted[rank.clamp(1, sorted.len()) - 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkState;

    fn enforcer() -> QualityEnforcer {
        QualityEnforcer::new(QualityConfig::default()).unwrap()
    }

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.into(),
            document_id: "d1".into(),
            index: "support".into(),
            ordinal: 0,
            text: text.into(),
            char_len: text.chars().count() as i64,
            overlap_chars: 0,
            hash: String::new(),
            category: None,
            tags: vec![],
            quality_score: None,
            quality_reasons: vec![],
            quality_pinned: false,
            embedding: None,
            embedding_model: None,
            state: ChunkState::Indexed,
            created_at: 0,
            updated_at: 0,
        }
    }

    const GOOD: &str = "# Returns\n\nCustomers may return an item within 30 days of delivery.\n\n- Keep the original receipt.\n- Items must be unused.\n\nFor example, a jacket bought on March 1 can be returned until March 31.";

    #[test]
    fn test_empty_text_fails_on_length() {
        let verdict = enforcer().evaluate("   \n\t ", 0.5);
        assert_eq!(verdict.score, 0.0);
        assert!(!verdict.passed);
        assert!(verdict.reasons[0].starts_with("length"));
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let e = enforcer();
        assert_eq!(e.evaluate(GOOD, 0.5), e.evaluate(GOOD, 0.5));
    }

    #[test]
    fn test_structured_text_passes() {
        let verdict = enforcer().evaluate(GOOD, 0.5);
        assert!(verdict.passed, "verdict: {:?}", verdict);
        assert!(verdict.score > 0.8);
        assert!(verdict.reasons.is_empty());
    }

    #[test]
    fn test_navigation_text_flagged() {
        let nav = "Home | Products | Contact\nSkip to content\nAll rights reserved\nPrivacy Policy | Terms of Service | Cookies";
        let verdict = enforcer().evaluate(nav, 0.5);
        assert!(verdict.score < 0.6);
        assert!(verdict.reasons.iter().any(|r| r.starts_with("boilerplate")));
        assert!(verdict.reasons.iter().any(|r| r.starts_with("structure")));
    }

    #[test]
    fn test_repetitive_text_flagged() {
        let text = "buy now ".repeat(40);
        let verdict = enforcer().evaluate(&text, 0.5);
        assert!(verdict.reasons.iter().any(|r| r.starts_with("diversity")));
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let config = QualityConfig {
            weights: HeuristicWeights {
                length: 0.5,
                diversity: 0.5,
                boilerplate: 0.5,
                structure: 0.0,
            },
            ..Default::default()
        };
        assert!(QualityEnforcer::new(config).is_err());
    }

    struct FlakyScorer {
        inner: QualityEnforcer,
        broken_id: &'static str,
    }

    impl ChunkScorer for FlakyScorer {
        fn score_chunk(&self, chunk: &Chunk, threshold: f64) -> EngineResult<QualityVerdict> {
            if chunk.id == self.broken_id {
                return Err(EngineError::internal(&chunk.id, "scorer crashed"));
            }
            self.inner.score_chunk(chunk, threshold)
        }
    }

    #[test]
    fn test_validation_isolates_errors() {
        let chunks = vec![
            chunk("good-1", GOOD),
            chunk("good-2", GOOD),
            chunk("bad-1", "ok"),
            chunk("bad-2", ""),
            chunk("broken", GOOD),
        ];
        let scorer = FlakyScorer {
            inner: enforcer(),
            broken_id: "broken",
        };
        let report = validate_chunks("support", 0.6, &chunks, &scorer);
        assert_eq!(report.total, 5);
        assert_eq!(report.passed, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(report.errored, 1);
        assert_eq!(report.failing_chunk_ids, vec!["bad-1", "bad-2"]);
        assert_eq!(report.errors[0].chunk_id, "broken");
        assert!(report.p50.is_some());
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let sorted = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0];
        assert_eq!(percentile(&sorted, 50.0), Some(0.5));
        assert_eq!(percentile(&sorted, 90.0), Some(0.9));
        assert_eq!(percentile(&sorted, 99.0), Some(1.0));
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn test_metrics_histogram() {
        let mut a = chunk("a", "x");
        a.quality_score = Some(0.95);
        let mut b = chunk("b", "x");
        b.quality_score = Some(0.2);
        b.quality_pinned = true;
        let c = chunk("c", "x");
        let m = quality_metrics("support", 0.5, &[a, b, c]);
        assert_eq!(m.scored, 2);
        assert_eq!(m.unscored, 1);
        assert_eq!(m.passed, 1);
        assert_eq!(m.failed, 1);
        assert_eq!(m.pinned, 1);
        assert_eq!(m.histogram[9], 1);
        assert_eq!(m.histogram[2], 1);
    }
}
