//! In-flight request coalescing.
//!
//! [`InFlightRegistry`] maps a key to the single pending operation for it.
//! The first caller for a key starts the operation; callers arriving before
//! it settles await the same shared outcome instead of issuing their own
//! request. Every caller observes the same value or the same error.
//!
//! The operation runs on its own tokio task. A caller that stops waiting
//! (dropped future, navigated away) does not cancel it; the task still
//! settles, updates whatever its body updates, and deregisters the key.
//! Deregistration is unconditional, success or failure, so the next call
//! after settlement starts fresh.
//!
//! [`detach_all`](InFlightRegistry::detach_all) forgets every pending
//! operation without cancelling it, so callers arriving afterwards start
//! their own. A detached task only deregisters its own registration.
//!
//! This only merges concurrent work. It never retries and never caches.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

use crate::telemetry;
use crate::{CoachwayError, Result};

type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T>>>;

struct Pending<T> {
    /// Registration ticket; a task removes its key only while this matches.
    ticket: u64,
    outcome: SharedOutcome<T>,
}

struct PendingMap<T> {
    by_key: HashMap<String, Pending<T>>,
    next_ticket: u64,
}

type SharedPending<T> = Arc<Mutex<PendingMap<T>>>;

fn lock<T>(pending: &SharedPending<T>) -> MutexGuard<'_, PendingMap<T>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of pending operations, at most one per key.
pub struct InFlightRegistry<T = serde_json::Value> {
    pending: SharedPending<T>,
}

impl<T> InFlightRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(PendingMap {
                by_key: HashMap::new(),
                next_ticket: 0,
            })),
        }
    }

    /// Start the operation for `key`, or join the one already running.
    ///
    /// `start` is invoked immediately, and only when no operation for `key`
    /// is pending. Its future is spawned onto the tokio runtime, so this must
    /// be called from within one.
    pub async fn acquire_or_join<F, Fut>(&self, key: impl Into<String>, start: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let key = key.into();
        let outcome = {
            let mut pending = lock(&self.pending);
            match pending.by_key.get(&key) {
                Some(existing) => {
                    metrics::counter!(telemetry::INFLIGHT_JOINS_TOTAL).increment(1);
                    debug!(key = %key, "joining in-flight request");
                    existing.outcome.clone()
                }
                None => {
                    let operation = start();
                    let registry = Arc::clone(&self.pending);
                    let task_key = key.clone();
                    let ticket = pending.next_ticket;
                    pending.next_ticket += 1;
                    // Registered before the task can observe the map: the task
                    // needs this same lock to deregister.
                    let handle = tokio::spawn(async move {
                        let result = operation.await;
                        let mut pending = lock(&registry);
                        if pending
                            .by_key
                            .get(&task_key)
                            .is_some_and(|p| p.ticket == ticket)
                        {
                            pending.by_key.remove(&task_key);
                        }
                        drop(pending);
                        result
                    });
                    let shared = async move {
                        handle.await.unwrap_or_else(|e| {
                            Err(CoachwayError::Internal(format!(
                                "in-flight request task failed: {e}"
                            )))
                        })
                    }
                    .boxed()
                    .shared();
                    pending.by_key.insert(
                        key,
                        Pending {
                            ticket,
                            outcome: shared.clone(),
                        },
                    );
                    shared
                }
            }
        };
        outcome.await
    }

    /// Whether an operation for `key` is currently pending.
    pub fn is_pending(&self, key: &str) -> bool {
        lock(&self.pending).by_key.contains_key(key)
    }

    /// Number of pending operations.
    pub fn len(&self) -> usize {
        lock(&self.pending).by_key.len()
    }

    /// Forget every pending operation. Running operations still settle and
    /// reach the callers already waiting on them, but new callers for the
    /// same keys start fresh. Returns how many were detached.
    pub fn detach_all(&self) -> usize {
        let mut pending = lock(&self.pending);
        let detached = pending.by_key.len();
        pending.by_key.clear();
        detached
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for InFlightRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_share_one_operation() {
        let registry = Arc::new(InFlightRegistry::<u32>::new());
        let starts = Arc::new(AtomicU32::new(0));

        let callers = (0..8).map(|_| {
            let registry = Arc::clone(&registry);
            let starts = Arc::clone(&starts);
            async move {
                registry
                    .acquire_or_join("companies", move || async move {
                        starts.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(42)
                    })
                    .await
            }
        });
        let results = futures_util::future::join_all(callers).await;

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| matches!(r, Ok(42))));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn failure_reaches_every_joiner_and_clears_key() {
        let registry = Arc::new(InFlightRegistry::<u32>::new());

        let callers = (0..3).map(|_| {
            let registry = Arc::clone(&registry);
            async move {
                registry
                    .acquire_or_join("routes", || async {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Err(CoachwayError::Network("connection reset".into()))
                    })
                    .await
            }
        });
        let results = futures_util::future::join_all(callers).await;

        for result in results {
            assert!(matches!(result, Err(CoachwayError::Network(ref m)) if m == "connection reset"));
        }
        assert!(!registry.is_pending("routes"));
    }

    #[tokio::test]
    async fn settled_key_starts_fresh() {
        let registry = InFlightRegistry::<u32>::new();
        let starts = Arc::new(AtomicU32::new(0));

        for expected in 1..=2 {
            let starts = Arc::clone(&starts);
            let value = registry
                .acquire_or_join("cities", move || async move {
                    Ok(starts.fetch_add(1, Ordering::SeqCst) + 1)
                })
                .await
                .unwrap();
            assert_eq!(value, expected);
        }
    }

    #[tokio::test]
    async fn different_keys_do_not_coalesce() {
        let registry = Arc::new(InFlightRegistry::<&'static str>::new());
        let (a, b) = tokio::join!(
            registry.acquire_or_join("a", || async { Ok("a") }),
            registry.acquire_or_join("b", || async { Ok("b") }),
        );
        assert_eq!(a.unwrap(), "a");
        assert_eq!(b.unwrap(), "b");
    }

    #[tokio::test]
    async fn abandoned_caller_does_not_cancel_operation() {
        let registry = Arc::new(InFlightRegistry::<u32>::new());
        let finished = Arc::new(AtomicU32::new(0));

        let flag = Arc::clone(&finished);
        let abandoned = registry.acquire_or_join("k", move || async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        });
        // poll once so the operation is registered, then drop the caller
        let _ = tokio::time::timeout(Duration::from_millis(1), abandoned).await;
        assert!(registry.is_pending("k"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(!registry.is_pending("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn detached_operation_does_not_capture_newcomers() {
        let registry = Arc::new(InFlightRegistry::<&'static str>::new());

        let old = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry
                    .acquire_or_join("profile", || async {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok("alice")
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(registry.detach_all(), 1);

        // the new registration outlives the detached one
        let new = registry.acquire_or_join("profile", || async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok("bob")
        });
        let watcher = Arc::clone(&registry);
        let (old, new, pending_midway) = tokio::join!(old, new, async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            watcher.is_pending("profile")
        });

        assert_eq!(old.unwrap().unwrap(), "alice");
        assert_eq!(new.unwrap(), "bob");
        // the detached task settled at 10ms without removing bob's entry
        assert!(pending_midway);
        assert!(registry.is_empty());
    }
}
