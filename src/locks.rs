//! Per-key async locks.
//!
//! Each chunk id maps to its own FIFO [`tokio::sync::Mutex`], so writes to
//! one chunk apply in submission order while different chunks proceed in
//! parallel. Every acquisition takes a ticket before waiting; the mutex
//! records the highest ticket granted, so a holder can tell whether a
//! later request for the same key already ran.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const PRUNE_THRESHOLD: usize = 1024;

pub struct KeyedLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<u64>>>>,
    next_ticket: AtomicU64,
}

/// Exclusive access to one key. Released on drop.
pub struct KeyGuard {
    ticket: u64,
    superseded: bool,
    _guard: OwnedMutexGuard<u64>,
}

impl KeyGuard {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    /// A later-submitted request for this key was granted first.
    pub fn superseded(&self) -> bool {
        self.superseded
    }
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: &str) -> KeyGuard {
        let ticket = self.issue();
        self.acquire_ticket(key, ticket).await
    }

    /// Take the next submission ticket without waiting.
    pub fn issue(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::SeqCst)
    }

    /// Wait for exclusive access to `key` with a ticket from [`issue`](Self::issue).
    pub async fn acquire_ticket(&self, key: &str, ticket: u64) -> KeyGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            if slots.len() > PRUNE_THRESHOLD {
                slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            }
            Arc::clone(
                slots
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(0))),
            )
        };

        let mut guard = slot.lock_owned().await;
        let superseded = *guard > ticket;
        *guard = (*guard).max(ticket);
        tracing::trace!(key, ticket, superseded, "chunk lock acquired");
        KeyGuard {
            ticket,
            superseded,
            _guard: guard,
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for KeyedLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_serialized_in_order() {
        let locks = Arc::new(KeyedLocks::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = locks.acquire("c1").await;
        let mut handles = Vec::new();
        for i in 0..3 {
            let locks = Arc::clone(&locks);
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                let guard = locks.acquire("c1").await;
                log.lock().unwrap().push((i, guard.ticket()));
            }));
            // Queue each waiter before spawning the next.
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        drop(first);
        for h in handles {
            h.await.unwrap();
        }

        let log = log.lock().unwrap();
        let order: Vec<usize> = log.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert!(log.windows(2).all(|w| w[0].1 < w[1].1));
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.acquire("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_older_ticket_granted_late_is_superseded() {
        let locks = KeyedLocks::new();
        let older = locks.issue();
        let newer = locks.issue();

        let guard = locks.acquire_ticket("c1", newer).await;
        assert!(!guard.superseded());
        drop(guard);

        let late = locks.acquire_ticket("c1", older).await;
        assert!(late.superseded());
        drop(late);

        let next = locks.acquire("c1").await;
        assert!(!next.superseded());
        assert!(next.ticket() > newer);
    }
}
