//! Request deduplication for concurrent identical fetches
//!
//! Provides a `RequestDeduplicator` that keeps a registry of in-flight
//! operations keyed by string. While an operation for a key is pending,
//! further callers for the same key attach to it instead of starting their
//! own; every waiter receives the one shared result or error. The entry is
//! removed when the operation settles, so the next request for that key
//! starts fresh.
//!
//! Typical use is in front of an API client: wrap each fetch in
//! `deduplicate` with the request's logical key, and a burst of identical
//! screens loading at once costs one network call instead of five.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;

use crate::error::DedupeError;

type OperationResult<T, E> = Result<Arc<T>, Arc<E>>;

/// Receiving side of one in-flight operation, shareable across waiters
type SettleChannel<T, E> = Shared<oneshot::Receiver<OperationResult<T, E>>>;

/// One registered in-flight operation
struct Pending<T, E> {
    channel: SettleChannel<T, E>,
    /// Identifies this registration, so a settlement that raced `clear`
    /// cannot remove a successor entry registered under the same key
    generation: u64,
}

// derived Clone would demand T: Clone and E: Clone
impl<T, E> Clone for Pending<T, E> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            generation: self.generation,
        }
    }
}

struct Registry<T, E> {
    pending: Mutex<HashMap<String, Pending<T, E>>>,
    next_generation: AtomicU64,
}

/// Coalesces concurrent operations that share a key
///
/// At most one underlying operation per key is ever in flight. The
/// operation is spawned eagerly and runs to its natural completion even if
/// every waiter loses interest — there is no cancellation primitive; a
/// caller that wants a timeout wraps the operation it passes in.
///
/// Cloning a deduplicator is cheap and shares the registry, which is how a
/// process-wide instance is handed to multiple subsystems.
pub struct RequestDeduplicator<T, E> {
    registry: Arc<Registry<T, E>>,
}

impl<T, E> Clone for RequestDeduplicator<T, E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T, E> Default for RequestDeduplicator<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> RequestDeduplicator<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Creates a deduplicator with an empty registry.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                pending: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Runs `operation` under `key`, coalescing with any operation already
    /// in flight for that key.
    ///
    /// The first caller for a key spawns the operation; callers arriving
    /// while it is pending share its outcome without the operation running
    /// again. Success fans out as the same `Arc<T>` to every waiter, and
    /// failure as the same `Arc<E>` inside [`DedupeError::Operation`]. A
    /// panicking operation settles every waiter with
    /// [`DedupeError::OperationPanicked`].
    pub async fn deduplicate<F>(&self, key: &str, operation: F) -> Result<Arc<T>, DedupeError<E>>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let channel = {
            let mut pending = self.registry.pending.lock();
            match pending.get(key) {
                Some(entry) => entry.channel.clone(),
                None => {
                    let entry = self.register(key.to_string(), operation);
                    let channel = entry.channel.clone();
                    pending.insert(key.to_string(), entry);
                    channel
                }
            }
        };

        match channel.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(DedupeError::Operation(err)),
            Err(oneshot::Canceled) => Err(DedupeError::OperationPanicked),
        }
    }

    /// Forgets every pending entry without cancelling the operations.
    ///
    /// In-flight operations still run to completion and settle their
    /// existing waiters; a new request for one of their keys starts a fresh
    /// operation rather than attaching to the forgotten one.
    pub fn clear(&self) {
        self.registry.pending.lock().clear();
    }

    /// Spawns `operation` and returns its registry entry.
    ///
    /// The caller holds the registry lock and inserts the entry; the
    /// spawned task cannot observe the registry until that lock is
    /// released, so the entry is always in place before settlement.
    fn register<F>(&self, key: String, operation: F) -> Pending<T, E>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let generation = self.registry.next_generation.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            // Unregisters on every exit path, including a panic unwinding
            // through `operation`.
            let unregister = CallOnDrop::new(move || {
                let mut pending = registry.pending.lock();
                if pending
                    .get(&key)
                    .is_some_and(|entry| entry.generation == generation)
                {
                    pending.remove(&key);
                }
            });

            let result = match operation.await {
                Ok(value) => Ok(Arc::new(value)),
                Err(err) => Err(Arc::new(err)),
            };

            // Unregister before fan-out: a waiter that immediately retries
            // the key must start a fresh operation, not find this one.
            drop(unregister);
            let _ = sender.send(result);
        });

        Pending {
            channel: receiver.shared(),
            generation,
        }
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.registry.pending.lock().len()
    }
}

impl<T, E> std::fmt::Debug for RequestDeduplicator<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending = self.registry.pending.lock().len();
        f.debug_struct("RequestDeduplicator")
            .field("pending", &pending)
            .finish()
    }
}

/// Runs a closure when dropped, whether the owning scope completed or
/// panicked.
struct CallOnDrop<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> CallOnDrop<F> {
    fn new(f: F) -> Self {
        Self(Some(f))
    }
}

impl<F: FnOnce()> Drop for CallOnDrop<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_operation() {
        let dedupe: RequestDeduplicator<i64, String> = RequestDeduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let slow_fetch = |calls: Arc<AtomicUsize>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_millis(50)).await;
            Ok::<i64, String>(42)
        };

        let (first, second) = tokio::join!(
            dedupe.deduplicate("x", slow_fetch(Arc::clone(&calls))),
            dedupe.deduplicate("x", slow_fetch(Arc::clone(&calls))),
        );

        let first = first.expect("First caller should succeed");
        let second = second.expect("Coalesced caller should succeed");
        assert_eq!(*first, 42);
        assert!(
            Arc::ptr_eq(&first, &second),
            "Both callers must receive the identical result"
        );
        assert_eq!(
            calls.load(Ordering::SeqCst),
            1,
            "The operation body must run exactly once"
        );
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_coalesce() {
        let dedupe: RequestDeduplicator<i64, String> = RequestDeduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let fetch = |calls: Arc<AtomicUsize>, value: i64| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_millis(20)).await;
            Ok::<i64, String>(value)
        };

        let (a, b) = tokio::join!(
            dedupe.deduplicate("a", fetch(Arc::clone(&calls), 1)),
            dedupe.deduplicate("b", fetch(Arc::clone(&calls), 2)),
        );

        assert_eq!(*a.unwrap(), 1);
        assert_eq!(*b.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sequential_calls_run_fresh_operations() {
        let dedupe: RequestDeduplicator<i64, String> = RequestDeduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for expected in 1..=2 {
            let calls_inner = Arc::clone(&calls);
            let result = dedupe
                .deduplicate("x", async move {
                    calls_inner.fetch_add(1, Ordering::SeqCst);
                    Ok::<i64, String>(7)
                })
                .await;

            assert_eq!(*result.unwrap(), 7);
            assert_eq!(
                calls.load(Ordering::SeqCst),
                expected,
                "A settled key must not suppress later operations"
            );
        }

        assert_eq!(dedupe.pending_len(), 0, "Registry should be empty after settling");
    }

    #[tokio::test]
    async fn test_failure_fans_out_identically_to_all_waiters() {
        let dedupe: RequestDeduplicator<i64, String> = RequestDeduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let failing = |calls: Arc<AtomicUsize>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_millis(30)).await;
            Err::<i64, String>("till unreachable".to_string())
        };

        let (first, second) = tokio::join!(
            dedupe.deduplicate("x", failing(Arc::clone(&calls))),
            dedupe.deduplicate("x", failing(Arc::clone(&calls))),
        );

        let first = match first {
            Err(DedupeError::Operation(err)) => err,
            other => panic!("Expected operation error, got {other:?}"),
        };
        let second = match second {
            Err(DedupeError::Operation(err)) => err,
            other => panic!("Expected operation error, got {other:?}"),
        };

        assert_eq!(*first, "till unreachable");
        assert!(
            Arc::ptr_eq(&first, &second),
            "Both waiters must receive the identical error"
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_does_not_stick_to_the_key() {
        let dedupe: RequestDeduplicator<i64, String> = RequestDeduplicator::new();

        let failed = dedupe
            .deduplicate("x", async { Err::<i64, String>("boom".to_string()) })
            .await;
        assert!(matches!(failed, Err(DedupeError::Operation(_))));

        let recovered = dedupe
            .deduplicate("x", async { Ok::<i64, String>(5) })
            .await;
        assert_eq!(*recovered.unwrap(), 5, "A failed key must be retryable");
    }

    #[tokio::test]
    async fn test_clear_makes_next_call_fresh_without_cancelling() {
        let dedupe: RequestDeduplicator<i64, String> = RequestDeduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = {
            let dedupe = dedupe.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                dedupe
                    .deduplicate("x", async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        sleep(Duration::from_millis(80)).await;
                        Ok::<i64, String>(1)
                    })
                    .await
            })
        };

        // Let the first operation get registered, then forget it.
        sleep(Duration::from_millis(20)).await;
        dedupe.clear();

        let second = {
            let calls = Arc::clone(&calls);
            dedupe
                .deduplicate("x", async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<i64, String>(2)
                })
                .await
        };

        assert_eq!(*second.unwrap(), 2, "Post-clear call should run fresh");
        assert_eq!(
            calls.load(Ordering::SeqCst),
            2,
            "Clear must not deduplicate against the forgotten operation"
        );

        let first = first.await.unwrap();
        assert_eq!(
            *first.unwrap(),
            1,
            "The forgotten operation still settles its waiters"
        );

        // The forgotten operation's settlement must not have clobbered
        // anything; a third call runs fresh again.
        let third = dedupe
            .deduplicate("x", async { Ok::<i64, String>(3) })
            .await;
        assert_eq!(*third.unwrap(), 3);
        assert_eq!(dedupe.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_panicking_operation_settles_all_waiters() {
        let dedupe: RequestDeduplicator<i64, String> = RequestDeduplicator::new();

        let doomed = |label: &'static str| async move {
            sleep(Duration::from_millis(20)).await;
            panic!("scanner unplugged mid-{label}");
        };

        let (first, second) = tokio::join!(
            dedupe.deduplicate("x", doomed("read")),
            dedupe.deduplicate("x", doomed("read")),
        );

        assert!(matches!(first, Err(DedupeError::OperationPanicked)));
        assert!(matches!(second, Err(DedupeError::OperationPanicked)));
        assert_eq!(
            dedupe.pending_len(),
            0,
            "A panicked operation must not leave its key registered"
        );

        let after = dedupe
            .deduplicate("x", async { Ok::<i64, String>(9) })
            .await;
        assert_eq!(*after.unwrap(), 9, "The key must be usable again");
    }
}
