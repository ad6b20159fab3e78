//! Ranked chunk retrieval with lexical, vector, and hybrid modes.
//!
//! The core search algorithm operates entirely through the [`Store`] trait.
//! The calling application embeds the query (or decides it cannot), picks
//! the mode, and passes the appropriate store implementation.
//!
//! # Hybrid Scoring Algorithm
//!
//! 1. Fetch `candidate_k_lexical` lexical candidates.
//! 2. Fetch `candidate_k_vector` vector candidates (cosine similarity).
//! 3. Normalize both sets to `[0, 1]` using min-max normalization.
//! 4. Merge: `score = (1 - α) × lexical + α × vector + β × quality`.
//! 5. Sort by score (desc), then chunk id (asc).
//! 6. Truncate to `limit`.
//!
//! In lexical mode `α` is forced to `0` and in vector mode to `1`. The
//! explanation always carries all three components; a component the mode
//! did not use is reported with `applicable: false` and value `0.0`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::query::{ChunkFilter, MAX_PAGE_LIMIT};
use crate::store::{ChunkCandidate, Store};

/// Ranking parameters, decoupled from application config.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Vector weight: `hybrid = (1-α)·lexical + α·vector`.
    pub hybrid_alpha: f64,
    /// Weight of the chunk quality score added on top (`β`).
    pub quality_boost: f64,
    pub candidate_k_lexical: usize,
    pub candidate_k_vector: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchParams {
            hybrid_alpha: 0.6,
            quality_boost: 0.0,
            candidate_k_lexical: 80,
            candidate_k_vector: 80,
        }
    }
}

impl SearchParams {
    pub fn validate(&self) -> EngineResult<()> {
        if !(0.0..=1.0).contains(&self.hybrid_alpha) {
            return Err(EngineError::Config(
                "retrieval.hybrid_alpha must be in [0.0, 1.0]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.quality_boost) {
            return Err(EngineError::Config(
                "retrieval.quality_boost must be in [0.0, 1.0]".into(),
            ));
        }
        if self.candidate_k_lexical == 0 || self.candidate_k_vector == 0 {
            return Err(EngineError::Config(
                "retrieval candidate counts must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Lexical,
    Vector,
    #[default]
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Lexical => "lexical",
            SearchMode::Vector => "vector",
            SearchMode::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lexical" | "keyword" => Ok(SearchMode::Lexical),
            "vector" | "semantic" => Ok(SearchMode::Vector),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(EngineError::Query(format!(
                "unknown search mode '{}'; expected lexical, vector, or hybrid",
                other
            ))),
        }
    }
}

/// Bundles all inputs for a single search invocation.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub index: &'a str,
    pub query: &'a str,
    /// Query embedding; required for vector and hybrid modes.
    pub query_vec: Option<&'a [f32]>,
    /// Mode to run. The caller has already applied any fallback.
    pub mode: SearchMode,
    /// Why the caller fell back from the requested mode, if it did.
    pub fallback_reason: Option<String>,
    pub filter: &'a ChunkFilter,
    pub limit: usize,
    pub explain: bool,
    pub params: SearchParams,
}

/// One term of the ranking formula.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponent {
    pub applicable: bool,
    pub value: f64,
    pub weight: f64,
}

impl ScoreComponent {
    fn not_applicable() -> Self {
        ScoreComponent {
            applicable: false,
            value: 0.0,
            weight: 0.0,
        }
    }
}

/// Scoring breakdown for one hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreExplanation {
    /// Normalized lexical score (0.0 if absent from lexical candidates).
    pub lexical: ScoreComponent,
    /// Normalized vector similarity (0.0 if absent from vector candidates).
    pub vector: ScoreComponent,
    /// Stored quality score times `quality_boost`.
    pub quality_boost: ScoreComponent,
    pub lexical_candidates: usize,
    pub vector_candidates: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: String,
    pub ordinal: i64,
    pub score: f64,
    pub snippet: String,
    pub category: Option<String>,
    pub quality_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<ScoreExplanation>,
}

/// Ranked hits plus the mode that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub index: String,
    pub query: String,
    pub mode: SearchMode,
    pub fallback_reason: Option<String>,
    pub hits: Vec<SearchHit>,
    /// Served from cache because the store was unreachable.
    pub stale: bool,
}

/// Validate the caller-controlled parts of a search.
pub fn validate_request(query: &str, limit: usize, filter: &ChunkFilter) -> EngineResult<()> {
    if query.trim().is_empty() {
        return Err(EngineError::Query("query must not be blank".into()));
    }
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return Err(EngineError::Query(format!(
            "limit must be in 1..={}, got {}",
            MAX_PAGE_LIMIT, limit
        )));
    }
    filter.validate()
}

/// Run a search against a [`Store`] backend.
///
/// This is the core function every frontend delegates to. It fetches
/// candidates, normalizes and merges scores, and returns sorted hits.
pub async fn search<S: Store + ?Sized>(
    store: &S,
    req: &SearchRequest<'_>,
) -> EngineResult<SearchOutcome> {
    validate_request(req.query, req.limit, req.filter)?;
    if store.get_index(req.index).await?.is_none() {
        return Err(EngineError::Query(format!("unknown index '{}'", req.index)));
    }

    let uses_lexical = req.mode != SearchMode::Vector;
    let uses_vector = req.mode != SearchMode::Lexical;

    let lexical_candidates = if uses_lexical {
        store
            .lexical_search(req.index, req.query, req.params.candidate_k_lexical, req.filter)
            .await?
    } else {
        Vec::new()
    };

    let vector_candidates = if uses_vector {
        match req.query_vec {
            Some(qv) => {
                store
                    .vector_search(req.index, qv, req.params.candidate_k_vector, req.filter)
                    .await?
            }
            None => {
                return Err(EngineError::Query(format!(
                    "{} search requires a query embedding",
                    req.mode
                )))
            }
        }
    } else {
        Vec::new()
    };

    let alpha = match req.mode {
        SearchMode::Lexical => 0.0,
        SearchMode::Vector => 1.0,
        SearchMode::Hybrid => req.params.hybrid_alpha,
    };
    let beta = req.params.quality_boost;

    let lex_map: HashMap<&str, f64> = normalize_scores(&lexical_candidates)
        .into_iter()
        .map(|(c, s)| (c.chunk_id.as_str(), s))
        .collect();
    let vec_map: HashMap<&str, f64> = normalize_scores(&vector_candidates)
        .into_iter()
        .map(|(c, s)| (c.chunk_id.as_str(), s))
        .collect();

    let mut all: HashMap<&str, &ChunkCandidate> = HashMap::new();
    for c in lexical_candidates.iter().chain(vector_candidates.iter()) {
        all.entry(c.chunk_id.as_str()).or_insert(c);
    }

    let mut hits: Vec<SearchHit> = all
        .into_values()
        .map(|cand| {
            let k = lex_map.get(cand.chunk_id.as_str()).copied().unwrap_or(0.0);
            let v = vec_map.get(cand.chunk_id.as_str()).copied().unwrap_or(0.0);
            let q = cand.quality_score.unwrap_or(0.0);
            let score = (1.0 - alpha) * k + alpha * v + beta * q;

            let explanation = req.explain.then(|| ScoreExplanation {
                lexical: if uses_lexical {
                    ScoreComponent {
                        applicable: true,
                        value: k,
                        weight: 1.0 - alpha,
                    }
                } else {
                    ScoreComponent::not_applicable()
                },
                vector: if uses_vector {
                    ScoreComponent {
                        applicable: true,
                        value: v,
                        weight: alpha,
                    }
                } else {
                    ScoreComponent::not_applicable()
                },
                quality_boost: if beta > 0.0 && cand.quality_score.is_some() {
                    ScoreComponent {
                        applicable: true,
                        value: q,
                        weight: beta,
                    }
                } else {
                    ScoreComponent::not_applicable()
                },
                lexical_candidates: lexical_candidates.len(),
                vector_candidates: vector_candidates.len(),
            });

            SearchHit {
                chunk_id: cand.chunk_id.clone(),
                document_id: cand.document_id.clone(),
                ordinal: cand.ordinal,
                score,
                snippet: cand.snippet.clone(),
                category: cand.category.clone(),
                quality_score: cand.quality_score,
                explanation,
            }
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(req.limit);

    tracing::debug!(
        index = req.index,
        mode = %req.mode,
        lexical = lexical_candidates.len(),
        vector = vector_candidates.len(),
        hits = hits.len(),
        "search complete"
    );

    Ok(SearchOutcome {
        index: req.index.to_string(),
        query: req.query.to_string(),
        mode: req.mode,
        fallback_reason: req.fallback_reason.clone(),
        hits,
        stale: false,
    })
}

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// If all scores are equal, they are normalized to `1.0`.
pub fn normalize_scores(candidates: &[ChunkCandidate]) -> Vec<(&ChunkCandidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkState, Document, DocumentFormat, DocumentStatus, IndexConfig};
    use crate::store::memory::InMemoryStore;

    fn make_candidate(chunk_id: &str, score: f64) -> ChunkCandidate {
        ChunkCandidate {
            chunk_id: chunk_id.to_string(),
            document_id: "d1".to_string(),
            ordinal: 0,
            raw_score: score,
            snippet: String::new(),
            category: None,
            quality_score: None,
        }
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_normalize_single() {
        let candidates = vec![make_candidate("c1", 5.0)];
        let result = normalize_scores(&candidates);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_range() {
        let candidates = vec![
            make_candidate("c1", 10.0),
            make_candidate("c2", 5.0),
            make_candidate("c3", 0.0),
        ];
        let result = normalize_scores(&candidates);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
        assert!((result[1].1 - 0.5).abs() < 1e-9);
        assert!((result[2].1 - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_scores_always_in_unit() {
        let candidates = vec![
            make_candidate("c1", -5.0),
            make_candidate("c2", 100.0),
            make_candidate("c3", 42.0),
        ];
        for (_, score) in normalize_scores(&candidates) {
            assert!((0.0..=1.0).contains(&score), "Score out of range: {}", score);
        }
    }

    async fn store_with(chunks: Vec<(&str, &str, Option<Vec<f32>>)>) -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .create_index(&IndexConfig {
                name: "support".into(),
                embedding_model: "test".into(),
                quality_threshold: 0.5,
            })
            .await
            .unwrap();
        store
            .insert_document(&Document {
                id: "d1".into(),
                index: "support".into(),
                source: "faq.md".into(),
                format: DocumentFormat::Markdown,
                category: None,
                tags: vec![],
                body: String::new(),
                content_hash: String::new(),
                created_at: 0,
                status: DocumentStatus::Chunked,
                failure: None,
            })
            .await
            .unwrap();
        let rows: Vec<Chunk> = chunks
            .into_iter()
            .enumerate()
            .map(|(i, (id, text, embedding))| Chunk {
                id: id.into(),
                document_id: "d1".into(),
                index: "support".into(),
                ordinal: i as i64,
                text: text.into(),
                char_len: text.len() as i64,
                overlap_chars: 0,
                hash: String::new(),
                category: None,
                tags: vec![],
                quality_score: Some(0.5 + i as f64 * 0.1),
                quality_reasons: vec![],
                quality_pinned: false,
                embedding,
                embedding_model: None,
                state: ChunkState::Pending,
                created_at: 0,
                updated_at: 0,
            })
            .collect();
        store.insert_chunks(&rows).await.unwrap();
        store.commit_document("d1").await.unwrap();
        store
    }

    fn request<'a>(
        query: &'a str,
        query_vec: Option<&'a [f32]>,
        mode: SearchMode,
        filter: &'a ChunkFilter,
        params: SearchParams,
    ) -> SearchRequest<'a> {
        SearchRequest {
            index: "support",
            query,
            query_vec,
            mode,
            fallback_reason: None,
            filter,
            limit: 5,
            explain: true,
            params,
        }
    }

    #[tokio::test]
    async fn test_lexical_explanation_marks_vector_not_applicable() {
        let store = store_with(vec![
            ("c1", "Returned item policy: 30 days.", None),
            ("c2", "Shipping times.", None),
        ])
        .await;
        let filter = ChunkFilter::default();
        let req = request("returned item policy", None, SearchMode::Lexical, &filter, SearchParams::default());
        let outcome = search(&store, &req).await.unwrap();
        assert_eq!(outcome.mode, SearchMode::Lexical);
        assert_eq!(outcome.hits.len(), 1);
        let exp = outcome.hits[0].explanation.as_ref().unwrap();
        assert!(exp.lexical.applicable);
        assert!(!exp.vector.applicable);
        assert_eq!(exp.vector.value, 0.0);
        assert!(!exp.quality_boost.applicable);
    }

    #[tokio::test]
    async fn test_hybrid_merges_both_lists() {
        let store = store_with(vec![
            ("c1", "refund policy", Some(vec![0.0, 1.0])),
            ("c2", "unrelated words", Some(vec![1.0, 0.0])),
        ])
        .await;
        let filter = ChunkFilter::default();
        let qv = [1.0f32, 0.0];
        let req = request("refund", Some(&qv), SearchMode::Hybrid, &filter, SearchParams::default());
        let outcome = search(&store, &req).await.unwrap();
        assert_eq!(outcome.hits.len(), 2);
        // c2 wins on vector weight 0.6 versus c1 lexical weight 0.4.
        assert_eq!(outcome.hits[0].chunk_id, "c2");
        let exp = outcome.hits[0].explanation.as_ref().unwrap();
        assert!(exp.lexical.applicable && exp.vector.applicable);
        assert_eq!(exp.lexical.value, 0.0);
    }

    #[tokio::test]
    async fn test_quality_boost_reported() {
        let store = store_with(vec![("c1", "refund policy", None)]).await;
        let filter = ChunkFilter::default();
        let params = SearchParams {
            quality_boost: 0.2,
            ..Default::default()
        };
        let req = request("refund", None, SearchMode::Lexical, &filter, params);
        let outcome = search(&store, &req).await.unwrap();
        let exp = outcome.hits[0].explanation.as_ref().unwrap();
        assert!(exp.quality_boost.applicable);
        assert!((outcome.hits[0].score - (1.0 + 0.2 * 0.5)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_errors_are_query_errors() {
        let store = store_with(vec![("c1", "refund policy", None)]).await;
        let filter = ChunkFilter::default();
        let blank = request("  ", None, SearchMode::Lexical, &filter, SearchParams::default());
        assert!(matches!(search(&store, &blank).await, Err(EngineError::Query(_))));

        let mut unknown = request("refund", None, SearchMode::Lexical, &filter, SearchParams::default());
        unknown.index = "missing";
        assert!(matches!(search(&store, &unknown).await, Err(EngineError::Query(_))));

        let mut zero = request("refund", None, SearchMode::Lexical, &filter, SearchParams::default());
        zero.limit = 0;
        assert!(matches!(search(&store, &zero).await, Err(EngineError::Query(_))));
    }

    #[tokio::test]
    async fn test_empty_result_is_ok() {
        let store = store_with(vec![("c1", "refund policy", None)]).await;
        let filter = ChunkFilter::default();
        let req = request("kubernetes", None, SearchMode::Lexical, &filter, SearchParams::default());
        assert!(search(&store, &req).await.unwrap().hits.is_empty());
    }
}
