//! TTL cache for search outcomes.
//!
//! Keyed by (index, query, limit, filter, mode, explain). Entries older
//! than the TTL are not served as fresh, but stay available as a stale
//! fallback while the store is degraded. Any write to an index drops that
//! index's entries and bumps its generation; a search that started before
//! the write cannot store its now outdated result.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use knowledge_engine_core::query::ChunkFilter;
use knowledge_engine_core::search::{SearchMode, SearchOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    index: String,
    query: String,
    limit: usize,
    filter: String,
    mode: SearchMode,
    explain: bool,
}

impl CacheKey {
    pub fn new(
        index: &str,
        query: &str,
        limit: usize,
        filter: &ChunkFilter,
        mode: SearchMode,
        explain: bool,
    ) -> Self {
        Self {
            index: index.to_string(),
            query: query.trim().to_string(),
            limit,
            filter: serde_json::to_string(filter).unwrap_or_default(),
            mode,
            explain,
        }
    }
}

struct Entry {
    stored_at: Instant,
    outcome: SearchOutcome,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, Entry>,
    /// Bumped by every invalidation of an index.
    generations: HashMap<String, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub ttl_secs: u64,
}

pub struct SearchCache {
    ttl: Duration,
    max_entries: usize,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SearchCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A cached outcome younger than the TTL.
    pub fn get(&self, key: &CacheKey) -> Option<SearchOutcome> {
        let state = self.lock();
        match state.entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.outcome.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Any cached outcome regardless of age, flagged stale.
    pub fn get_stale(&self, key: &CacheKey) -> Option<SearchOutcome> {
        self.lock().entries.get(key).map(|entry| SearchOutcome {
            stale: true,
            ..entry.outcome.clone()
        })
    }

    /// Current invalidation generation of `index`.
    ///
    /// Read it before running a search and hand it back to [`put`](Self::put).
    pub fn generation(&self, index: &str) -> u64 {
        self.lock().generations.get(index).copied().unwrap_or(0)
    }

    /// Store `outcome` unless `index` was invalidated since `generation`
    /// was read. Returns whether the outcome was stored.
    pub fn put(&self, key: CacheKey, outcome: SearchOutcome, generation: u64) -> bool {
        let mut state = self.lock();
        let current = state.generations.get(&key.index).copied().unwrap_or(0);
        if current != generation {
            tracing::debug!(index = %key.index, generation, current, "discarding search result computed before invalidation");
            return false;
        }

        let entries = &mut state.entries;
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            let ttl = self.ttl;
            entries.retain(|_, e| e.stored_at.elapsed() < ttl);
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.stored_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(
            key,
            Entry {
                stored_at: Instant::now(),
                outcome,
            },
        );
        true
    }

    /// Drop every entry for `index` and bump its generation. Returns how
    /// many entries were removed.
    pub fn invalidate(&self, index: &str) -> usize {
        let mut state = self.lock();
        *state.generations.entry(index.to_string()).or_insert(0) += 1;
        let before = state.entries.len();
        state.entries.retain(|k, _| k.index != index);
        let removed = before - state.entries.len();
        if removed > 0 {
            tracing::debug!(index, removed, "search cache invalidated");
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.lock().entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ttl_secs: self.ttl.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(index: &str) -> SearchOutcome {
        SearchOutcome {
            index: index.into(),
            query: "reset".into(),
            mode: SearchMode::Lexical,
            fallback_reason: None,
            hits: vec![],
            stale: false,
        }
    }

    fn key(index: &str) -> CacheKey {
        CacheKey::new(index, "reset", 10, &ChunkFilter::default(), SearchMode::Hybrid, false)
    }

    #[test]
    fn test_get_after_put() {
        let cache = SearchCache::new(Duration::from_secs(300), 8);
        cache.put(key("support"), outcome("support"), 0);
        assert!(cache.get(&key("support")).is_some());
        assert!(cache.get(&key("other")).is_none());
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn test_expired_entry_is_only_stale() {
        let cache = SearchCache::new(Duration::ZERO, 8);
        cache.put(key("support"), outcome("support"), 0);
        assert!(cache.get(&key("support")).is_none());
        let stale = cache.get_stale(&key("support")).unwrap();
        assert!(stale.stale);
    }

    #[test]
    fn test_invalidate_is_per_index() {
        let cache = SearchCache::new(Duration::from_secs(300), 8);
        cache.put(key("support"), outcome("support"), 0);
        cache.put(key("billing"), outcome("billing"), 0);
        assert_eq!(cache.invalidate("support"), 1);
        assert!(cache.get(&key("support")).is_none());
        assert!(cache.get(&key("billing")).is_some());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = SearchCache::new(Duration::from_secs(300), 2);
        cache.put(key("a"), outcome("a"), 0);
        cache.put(key("b"), outcome("b"), 0);
        cache.put(key("c"), outcome("c"), 0);
        assert_eq!(cache.stats().entries, 2);
        assert!(cache.get(&key("c")).is_some());
    }

    #[test]
    fn test_put_after_invalidation_is_discarded() {
        let cache = SearchCache::new(Duration::from_secs(300), 8);
        let before = cache.generation("support");
        cache.invalidate("support");
        assert!(!cache.put(key("support"), outcome("support"), before));
        assert!(cache.get(&key("support")).is_none());

        let current = cache.generation("support");
        assert_eq!(current, before + 1);
        assert!(cache.put(key("support"), outcome("support"), current));
        assert_eq!(cache.generation("billing"), 0);
    }
}
