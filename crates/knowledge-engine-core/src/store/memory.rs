//! In-memory [`Store`] implementation for tests and embedded use.
//!
//! All state lives behind one `std::sync::RwLock`, so multi-structure
//! updates (delete a chunk and its vector, commit a document) are atomic.
//! Vector search is brute-force cosine similarity. Lexical search scores
//! each matched query term by `tf / (tf + 1)` plus a bonus for the whole
//! phrase.
//!
//! [`InMemoryStore::set_offline`] and [`InMemoryStore::set_write_budget`]
//! simulate an unreachable backend; every affected call fails with
//! [`EngineError::IndexDegraded`].

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::{cosine_similarity, tokenize};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    now_ts, Chunk, ChunkPatch, ChunkState, Document, DocumentStatus, IndexConfig, IndexRecord,
    IndexStats, SavedQuery, StageFailure,
};
use crate::query::{ChunkFilter, ChunkPage, ChunkQuery};

use super::{
    sample_label, snippet, ChunkCandidate, ChunkWrite, Store, VectorSample,
};

const SNIPPET_CHARS: usize = 240;
const STORE_NAME: &str = "memory";

#[derive(Default)]
struct Inner {
    indexes: BTreeMap<String, IndexRecord>,
    documents: HashMap<String, Document>,
    chunks: HashMap<String, Chunk>,
    saved_queries: Vec<SavedQuery>,
}

/// In-memory store.
pub struct InMemoryStore {
    inner: RwLock<Inner>,
    offline: AtomicBool,
    /// Remaining successful writes; negative means unlimited.
    write_budget: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            offline: AtomicBool::new(false),
            write_budget: AtomicI64::new(-1),
        }
    }

    /// Make every call fail as if the backend were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Allow `n` more writes before writes start failing. `None` lifts the limit.
    pub fn set_write_budget(&self, n: Option<u64>) {
        let v = n.map(|n| n as i64).unwrap_or(-1);
        self.write_budget.store(v, Ordering::SeqCst);
    }

    fn check_online(&self) -> EngineResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(EngineError::degraded(STORE_NAME, "store is offline"));
        }
        Ok(())
    }

    fn read(&self) -> EngineResult<RwLockReadGuard<'_, Inner>> {
        self.check_online()?;
        self.inner
            .read()
            .map_err(|_| EngineError::degraded(STORE_NAME, "store lock poisoned"))
    }

    fn write(&self) -> EngineResult<RwLockWriteGuard<'_, Inner>> {
        self.check_online()?;
        let budget = self.write_budget.load(Ordering::SeqCst);
        if budget == 0 {
            return Err(EngineError::degraded(STORE_NAME, "store stopped accepting writes"));
        }
        if budget > 0 {
            self.write_budget.fetch_sub(1, Ordering::SeqCst);
        }
        self.inner
            .write()
            .map_err(|_| EngineError::degraded(STORE_NAME, "store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn without_vector(chunk: &Chunk) -> Chunk {
    Chunk {
        embedding: None,
        ..chunk.clone()
    }
}

fn candidate(chunk: &Chunk, raw_score: f64) -> ChunkCandidate {
    ChunkCandidate {
        chunk_id: chunk.id.clone(),
        document_id: chunk.document_id.clone(),
        ordinal: chunk.ordinal,
        raw_score,
        snippet: snippet(&chunk.text, SNIPPET_CHARS),
        category: chunk.category.clone(),
        quality_score: chunk.quality_score,
    }
}

fn rank(mut candidates: Vec<ChunkCandidate>, limit: usize) -> Vec<ChunkCandidate> {
    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    candidates.truncate(limit);
    candidates
}

fn lexical_score(text: &str, terms: &[String], phrase: &str) -> f64 {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for token in tokenize(text) {
        *counts.entry(token).or_default() += 1;
    }
    let mut score: f64 = terms
        .iter()
        .filter_map(|t| counts.get(t))
        .map(|tf| *tf as f64 / (*tf as f64 + 1.0))
        .sum();
    if score > 0.0 && terms.len() > 1 && text.to_lowercase().contains(phrase) {
        score += 1.0;
    }
    score
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_index(&self, config: &IndexConfig) -> EngineResult<IndexRecord> {
        config.validate()?;
        let mut inner = self.write()?;
        let record = inner
            .indexes
            .entry(config.name.clone())
            .and_modify(|r| r.config = config.clone())
            .or_insert_with(|| IndexRecord {
                config: config.clone(),
                created_at: now_ts(),
                last_reindex_at: None,
                last_reindex_failures: 0,
            });
        Ok(record.clone())
    }

    async fn get_index(&self, name: &str) -> EngineResult<Option<IndexRecord>> {
        Ok(self.read()?.indexes.get(name).cloned())
    }

    async fn list_indexes(&self) -> EngineResult<Vec<IndexRecord>> {
        Ok(self.read()?.indexes.values().cloned().collect())
    }

    async fn record_reindex(&self, name: &str, at: i64, failures: u64) -> EngineResult<()> {
        let mut inner = self.write()?;
        if let Some(record) = inner.indexes.get_mut(name) {
            record.last_reindex_at = Some(at);
            record.last_reindex_failures = failures;
        }
        Ok(())
    }

    async fn insert_document(&self, doc: &Document) -> EngineResult<()> {
        let mut inner = self.write()?;
        inner.documents.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> EngineResult<Option<Document>> {
        Ok(self.read()?.documents.get(id).cloned())
    }

    async fn find_document_by_source(
        &self,
        index: &str,
        source: &str,
    ) -> EngineResult<Option<Document>> {
        let inner = self.read()?;
        Ok(inner
            .documents
            .values()
            .filter(|d| d.index == index && d.source == source)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn set_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        failure: Option<&StageFailure>,
    ) -> EngineResult<()> {
        let mut inner = self.write()?;
        if let Some(doc) = inner.documents.get_mut(id) {
            doc.status = status;
            doc.failure = failure.cloned();
        }
        Ok(())
    }

    async fn delete_document(&self, id: &str) -> EngineResult<bool> {
        let mut inner = self.write()?;
        let existed = inner.documents.remove(id).is_some();
        inner.chunks.retain(|_, c| c.document_id != id);
        Ok(existed)
    }

    async fn insert_chunks(&self, chunks: &[Chunk]) -> EngineResult<()> {
        let mut inner = self.write()?;
        for chunk in chunks {
            if !inner.documents.contains_key(&chunk.document_id) {
                return Err(EngineError::invalid_document(
                    &chunk.document_id,
                    "chunk references a missing document",
                ));
            }
        }
        for chunk in chunks {
            inner.chunks.insert(chunk.id.clone(), chunk.clone());
        }
        Ok(())
    }

    async fn get_chunk(&self, id: &str) -> EngineResult<Option<Chunk>> {
        Ok(self.read()?.chunks.get(id).cloned())
    }

    async fn list_chunks(&self, index: &str, query: &ChunkQuery) -> EngineResult<ChunkPage> {
        let inner = self.read()?;
        let mut matching: Vec<&Chunk> = inner
            .chunks
            .values()
            .filter(|c| c.index == index && query.filter.matches(c))
            .collect();
        matching.sort_by(|a, b| query.sort.compare(a, b));
        let items = matching
            .iter()
            .skip(query.page.offset)
            .take(query.page.limit)
            .map(|c| without_vector(c))
            .collect();
        Ok(ChunkPage {
            items,
            total: matching.len() as u64,
            offset: query.page.offset,
            limit: query.page.limit,
        })
    }

    async fn chunks_for_index(&self, index: &str) -> EngineResult<Vec<Chunk>> {
        let inner = self.read()?;
        let mut chunks: Vec<Chunk> = inner
            .chunks
            .values()
            .filter(|c| c.index == index)
            .map(without_vector)
            .collect();
        chunks.sort_by(|a, b| {
            a.document_id
                .cmp(&b.document_id)
                .then(a.ordinal.cmp(&b.ordinal))
        });
        Ok(chunks)
    }

    async fn chunk_ids(&self, index: &str) -> EngineResult<Vec<String>> {
        Ok(self
            .chunks_for_index(index)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect())
    }

    async fn patch_chunk(
        &self,
        id: &str,
        patch: &ChunkPatch,
        at: i64,
    ) -> EngineResult<Option<Chunk>> {
        let mut inner = self.write()?;
        let Some(chunk) = inner.chunks.get_mut(id) else {
            return Ok(None);
        };
        if let Some(tags) = &patch.tags {
            chunk.tags = tags.clone();
        }
        if let Some(category) = &patch.category {
            chunk.category = Some(category.clone());
        }
        if let Some(score) = patch.quality_score {
            chunk.quality_score = Some(score);
            chunk.quality_reasons = vec!["manual override".to_string()];
            chunk.quality_pinned = true;
        }
        chunk.updated_at = at;
        Ok(Some(chunk.clone()))
    }

    async fn write_chunk_result(&self, write: &ChunkWrite) -> EngineResult<bool> {
        let mut inner = self.write()?;
        let Some(chunk) = inner.chunks.get_mut(&write.chunk_id) else {
            return Ok(false);
        };
        chunk.embedding = write.embedding.clone();
        chunk.embedding_model = write.embedding_model.clone();
        if let Some(verdict) = &write.verdict {
            chunk.quality_score = Some(verdict.score);
            chunk.quality_reasons = verdict.reasons.clone();
            chunk.quality_pinned = false;
        }
        chunk.state = write.state;
        chunk.updated_at = write.updated_at;
        Ok(true)
    }

    async fn delete_chunk(&self, id: &str) -> EngineResult<bool> {
        Ok(self.write()?.chunks.remove(id).is_some())
    }

    async fn commit_document(&self, document_id: &str) -> EngineResult<()> {
        let mut inner = self.write()?;
        for chunk in inner.chunks.values_mut() {
            if chunk.document_id == document_id && chunk.state == ChunkState::Pending {
                chunk.state = ChunkState::Indexed;
            }
        }
        if let Some(doc) = inner.documents.get_mut(document_id) {
            doc.status = DocumentStatus::Stored;
            doc.failure = None;
        }
        Ok(())
    }

    async fn promote_document(&self, document_id: &str) -> EngineResult<bool> {
        let mut inner = self.write()?;
        let incomplete = inner
            .chunks
            .values()
            .any(|c| c.document_id == document_id && c.state != ChunkState::Indexed);
        let Some(doc) = inner.documents.get_mut(document_id) else {
            return Ok(false);
        };
        let failed_at_embedding = doc.status == DocumentStatus::Failed
            && doc
                .failure
                .as_ref()
                .is_some_and(|f| f.stage == DocumentStatus::Embedding);
        if incomplete || !failed_at_embedding {
            return Ok(false);
        }
        doc.status = DocumentStatus::Stored;
        doc.failure = None;
        Ok(true)
    }

    async fn clear_index(&self, index: &str) -> EngineResult<u64> {
        let mut inner = self.write()?;
        let before = inner.chunks.len();
        inner.chunks.retain(|_, c| c.index != index);
        inner.documents.retain(|_, d| d.index != index);
        Ok((before - inner.chunks.len()) as u64)
    }

    async fn index_stats(&self, index: &str) -> EngineResult<IndexStats> {
        let inner = self.read()?;
        let mut stats = IndexStats {
            index: index.to_string(),
            last_reindex_at: inner.indexes.get(index).and_then(|r| r.last_reindex_at),
            ..Default::default()
        };
        let mut score_sum = 0.0;
        let mut last_updated: Option<i64> = None;
        for doc in inner.documents.values().filter(|d| d.index == index) {
            stats.document_count += 1;
            if doc.status == DocumentStatus::Failed {
                stats.failed_document_count += 1;
            }
            last_updated = last_updated.max(Some(doc.created_at));
        }
        for chunk in inner.chunks.values().filter(|c| c.index == index) {
            stats.chunk_count += 1;
            match chunk.state {
                ChunkState::Indexed => stats.indexed_count += 1,
                ChunkState::Unembedded => stats.unembedded_count += 1,
                ChunkState::Pending => {}
            }
            if chunk.embedding.is_some() {
                stats.embedded_count += 1;
            }
            if let Some(score) = chunk.quality_score {
                stats.scored_count += 1;
                score_sum += score;
            }
            last_updated = last_updated.max(Some(chunk.updated_at));
        }
        if stats.scored_count > 0 {
            stats.average_quality = Some(score_sum / stats.scored_count as f64);
        }
        stats.last_updated_at = last_updated;
        Ok(stats)
    }

    async fn lexical_search(
        &self,
        index: &str,
        query: &str,
        limit: usize,
        filter: &ChunkFilter,
    ) -> EngineResult<Vec<ChunkCandidate>> {
        let mut terms: Vec<String> = tokenize(query).collect();
        terms.sort();
        terms.dedup();
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let phrase = query.trim().to_lowercase();
        let inner = self.read()?;
        let candidates = inner
            .chunks
            .values()
            .filter(|c| c.index == index && c.state == ChunkState::Indexed && filter.matches(c))
            .filter_map(|c| {
                let score = lexical_score(&c.text, &terms, &phrase);
                (score > 0.0).then(|| candidate(c, score))
            })
            .collect();
        Ok(rank(candidates, limit))
    }

    async fn vector_search(
        &self,
        index: &str,
        query_vec: &[f32],
        limit: usize,
        filter: &ChunkFilter,
    ) -> EngineResult<Vec<ChunkCandidate>> {
        let inner = self.read()?;
        let candidates = inner
            .chunks
            .values()
            .filter(|c| c.index == index && c.state == ChunkState::Indexed && filter.matches(c))
            .filter_map(|c| {
                let v = c.embedding.as_ref()?;
                Some(candidate(c, cosine_similarity(query_vec, v) as f64))
            })
            .collect();
        Ok(rank(candidates, limit))
    }

    async fn vector_count(&self, index: &str) -> EngineResult<u64> {
        let inner = self.read()?;
        Ok(inner
            .chunks
            .values()
            .filter(|c| {
                c.index == index && c.state == ChunkState::Indexed && c.embedding.is_some()
            })
            .count() as u64)
    }

    async fn sample_vectors(&self, index: &str, limit: usize) -> EngineResult<Vec<VectorSample>> {
        let inner = self.read()?;
        let mut samples: Vec<VectorSample> = inner
            .chunks
            .values()
            .filter(|c| c.index == index && c.state == ChunkState::Indexed)
            .filter_map(|c| {
                Some(VectorSample {
                    chunk_id: c.id.clone(),
                    label: sample_label(c.category.as_deref()),
                    vector: c.embedding.clone()?,
                })
            })
            .collect();
        samples.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));
        samples.truncate(limit);
        Ok(samples)
    }

    async fn insert_saved_query(&self, query: &SavedQuery) -> EngineResult<()> {
        let mut inner = self.write()?;
        if inner.saved_queries.iter().any(|q| q.name == query.name) {
            return Err(EngineError::Query(format!(
                "a saved query named '{}' already exists",
                query.name
            )));
        }
        inner.saved_queries.push(query.clone());
        Ok(())
    }

    async fn get_saved_query(&self, id_or_name: &str) -> EngineResult<Option<SavedQuery>> {
        let inner = self.read()?;
        Ok(inner
            .saved_queries
            .iter()
            .find(|q| q.id == id_or_name)
            .or_else(|| inner.saved_queries.iter().find(|q| q.name == id_or_name))
            .cloned())
    }

    async fn list_saved_queries(&self, index: Option<&str>) -> EngineResult<Vec<SavedQuery>> {
        let inner = self.read()?;
        let mut out: Vec<SavedQuery> = inner
            .saved_queries
            .iter()
            .filter(|q| index.map_or(true, |i| q.index == i))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn delete_saved_query(&self, id: &str) -> EngineResult<bool> {
        let mut inner = self.write()?;
        let before = inner.saved_queries.len();
        inner.saved_queries.retain(|q| q.id != id);
        Ok(inner.saved_queries.len() < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentFormat;

    fn doc(id: &str) -> Document {
        Document {
            id: id.into(),
            index: "support".into(),
            source: format!("{}.md", id),
            format: DocumentFormat::Markdown,
            category: None,
            tags: vec![],
            body: String::new(),
            content_hash: String::new(),
            created_at: 1,
            status: DocumentStatus::Chunked,
            failure: None,
        }
    }

    fn chunk(id: &str, doc_id: &str, ordinal: i64, text: &str) -> Chunk {
        Chunk {
            id: id.into(),
            document_id: doc_id.into(),
            index: "support".into(),
            ordinal,
            text: text.into(),
            char_len: text.chars().count() as i64,
            overlap_chars: 0,
            hash: String::new(),
            category: Some("returns".into()),
            tags: vec![],
            quality_score: None,
            quality_reasons: vec![],
            quality_pinned: false,
            embedding: Some(vec![1.0, 0.0]),
            embedding_model: Some("test".into()),
            state: ChunkState::Pending,
            created_at: 1,
            updated_at: 1,
        }
    }

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.insert_document(&doc("d1")).await.unwrap();
        store
            .insert_chunks(&[
                chunk("c1", "d1", 0, "Returned item policy: items may be returned in 30 days."),
                chunk("c2", "d1", 1, "Shipping takes five days."),
            ])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_pending_chunks_invisible_until_commit() {
        let store = seeded().await;
        let filter = ChunkFilter::default();
        assert!(store
            .lexical_search("support", "returned", 10, &filter)
            .await
            .unwrap()
            .is_empty());
        store.commit_document("d1").await.unwrap();
        let hits = store
            .lexical_search("support", "returned item policy", 10, &filter)
            .await
            .unwrap();
        assert_eq!(hits[0].chunk_id, "c1");
        assert_eq!(
            store.get_document("d1").await.unwrap().unwrap().status,
            DocumentStatus::Stored
        );
    }

    #[tokio::test]
    async fn test_write_after_delete_is_refused() {
        let store = seeded().await;
        assert!(store.delete_chunk("c1").await.unwrap());
        let write = ChunkWrite {
            chunk_id: "c1".into(),
            embedding: Some(vec![0.0, 1.0]),
            embedding_model: Some("test".into()),
            verdict: None,
            state: ChunkState::Indexed,
            updated_at: 2,
        };
        assert!(!store.write_chunk_result(&write).await.unwrap());
        assert!(store.get_chunk("c1").await.unwrap().is_none());
        assert!(!store.delete_chunk("c1").await.unwrap());
    }

    #[tokio::test]
    async fn test_chunks_require_document() {
        let store = InMemoryStore::new();
        let err = store
            .insert_chunks(&[chunk("c1", "missing", 0, "text")])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidDocument { .. }));
    }

    #[tokio::test]
    async fn test_offline_store_is_degraded() {
        let store = seeded().await;
        store.set_offline(true);
        let err = store.get_chunk("c1").await.unwrap_err();
        assert!(err.is_infrastructure());
        store.set_offline(false);
        assert!(store.get_chunk("c1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_write_budget_exhausts() {
        let store = seeded().await;
        store.set_write_budget(Some(1));
        assert!(store.delete_chunk("c1").await.is_ok());
        assert!(store.delete_chunk("c2").await.is_err());
        store.set_write_budget(None);
        assert!(store.delete_chunk("c2").await.unwrap());
    }

    #[tokio::test]
    async fn test_patch_pins_score() {
        let store = seeded().await;
        let patch = ChunkPatch {
            quality_score: Some(0.9),
            ..Default::default()
        };
        let chunk = store.patch_chunk("c1", &patch, 5).await.unwrap().unwrap();
        assert!(chunk.quality_pinned);
        assert_eq!(chunk.quality_score, Some(0.9));
        assert!(store.patch_chunk("nope", &patch, 5).await.unwrap().is_none());
    }
}
