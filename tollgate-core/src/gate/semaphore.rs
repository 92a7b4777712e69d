//! Keyed counting semaphore
//!
//! One limit shared by every key, with an independent in-flight count per
//! key. A single instance can act as a global ceiling (one key), a
//! per-tool-name ceiling (many keys) or a per-tool-instance ceiling (one
//! instance per tool).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Notify;
use tracing::trace;

#[derive(Debug)]
struct SemaphoreInner {
    limit: usize,
    counts: Mutex<HashMap<String, usize>>,
    released: Notify,
    acquired_total: AtomicU64,
    released_total: AtomicU64,
}

/// Counting semaphore with per-key in-flight counts
#[derive(Debug, Clone)]
pub struct KeyedSemaphore {
    inner: Arc<SemaphoreInner>,
}

impl KeyedSemaphore {
    /// Create a semaphore admitting `limit` holders per key (at least one)
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(SemaphoreInner {
                limit: limit.max(1),
                counts: Mutex::new(HashMap::new()),
                released: Notify::new(),
                acquired_total: AtomicU64::new(0),
                released_total: AtomicU64::new(0),
            }),
        }
    }

    /// Per-key limit
    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Wait until `key` has a free slot and take it.
    ///
    /// The slot is returned when the permit drops.
    pub async fn acquire(&self, key: &str) -> SemaphorePermit {
        loop {
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not lost
            notified.as_mut().enable();

            if self.try_take(key) {
                return SemaphorePermit {
                    semaphore: self.clone(),
                    key: key.to_string(),
                };
            }

            trace!(key, limit = self.inner.limit, "waiting for semaphore slot");
            notified.await;
        }
    }

    /// Take a slot for `key` if one is free
    pub fn try_acquire(&self, key: &str) -> Option<SemaphorePermit> {
        self.try_take(key).then(|| SemaphorePermit {
            semaphore: self.clone(),
            key: key.to_string(),
        })
    }

    fn try_take(&self, key: &str) -> bool {
        let mut counts = self.lock_counts();
        let count = counts.entry(key.to_string()).or_insert(0);
        if *count < self.inner.limit {
            *count += 1;
            self.inner.acquired_total.fetch_add(1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// Return a slot for `key` and wake waiters.
    ///
    /// Releasing a key with nothing in flight is a no-op.
    pub fn release(&self, key: &str) {
        {
            let mut counts = self.lock_counts();
            match counts.get_mut(key) {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    if *count == 0 {
                        counts.remove(key);
                    }
                    self.inner.released_total.fetch_add(1, Ordering::SeqCst);
                }
                _ => return,
            }
        }
        // Waiters may be parked on other keys, so wake all of them to re-check
        self.inner.released.notify_waiters();
    }

    /// Slots currently held for `key`
    pub fn in_flight(&self, key: &str) -> usize {
        self.lock_counts().get(key).copied().unwrap_or(0)
    }

    /// Total successful acquisitions since creation
    pub fn acquired_total(&self) -> u64 {
        self.inner.acquired_total.load(Ordering::SeqCst)
    }

    /// Total releases since creation
    pub fn released_total(&self) -> u64 {
        self.inner.released_total.load(Ordering::SeqCst)
    }

    fn lock_counts(&self) -> std::sync::MutexGuard<'_, HashMap<String, usize>> {
        self.inner
            .counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A held semaphore slot, released on drop
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct SemaphorePermit {
    semaphore: KeyedSemaphore,
    key: String,
}

impl SemaphorePermit {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for SemaphorePermit {
    fn drop(&mut self) {
        self.semaphore.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_permit_release_on_drop() {
        let sem = KeyedSemaphore::new(1);
        {
            let permit = sem.acquire("model").await;
            assert_eq!(permit.key(), "model");
            assert_eq!(sem.in_flight("model"), 1);
            assert!(sem.try_acquire("model").is_none());
        }
        assert_eq!(sem.in_flight("model"), 0);
        assert_eq!(sem.acquired_total(), 1);
        assert_eq!(sem.released_total(), 1);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let sem = KeyedSemaphore::new(1);
        let _a = sem.acquire("search").await;
        let b = sem.try_acquire("fetch");
        assert!(b.is_some());
        assert_eq!(sem.in_flight("search"), 1);
        assert_eq!(sem.in_flight("fetch"), 1);
    }

    #[test]
    fn test_release_never_goes_negative() {
        let sem = KeyedSemaphore::new(2);
        sem.release("idle");
        assert_eq!(sem.in_flight("idle"), 0);
        assert_eq!(sem.released_total(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_limit_holds_under_contention() {
        let sem = KeyedSemaphore::new(3);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..40 {
            let sem = sem.clone();
            let current = current.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire("tool").await;
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                assert!(sem.in_flight("tool") <= 3);
                tokio::time::sleep(Duration::from_millis(2)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(sem.in_flight("tool"), 0);
        assert_eq!(sem.acquired_total(), 40);
        assert_eq!(sem.released_total(), 40);
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let sem = KeyedSemaphore::new(1);
        let held = sem.acquire("model").await;

        let waiter = {
            let sem = sem.clone();
            tokio::spawn(async move {
                let _permit = sem.acquire("model").await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sem.in_flight("model"), 0);
    }
}
