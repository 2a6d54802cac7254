/// In-flight request coalescing
///
/// At most one operation per key runs at a time. The first caller spawns the
/// operation as a detached task and registers a shared handle to its result;
/// every caller arriving while that handle is registered awaits the same
/// result instead of starting its own. The registration is removed when the
/// task finishes, whether it succeeded, failed or panicked.
///
/// Because the operation runs in its own task, a waiter giving up (timeout,
/// client disconnect) never cancels work other waiters depend on.
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::debug;

use crate::metrics;

/// Handle to the single in-progress operation for a key
pub type PendingFetch<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

pub struct Coalescer<T, E> {
    pending: Arc<DashMap<String, PendingFetch<T, E>>>,
}

impl<T, E> Clone for Coalescer<T, E> {
    fn clone(&self) -> Self {
        Self {
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<T, E> Default for Coalescer<T, E> {
    fn default() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
        }
    }
}

/// Removes the pending registration when the operation's task ends
struct PendingGuard<T, E> {
    pending: Arc<DashMap<String, PendingFetch<T, E>>>,
    key: String,
}

impl<T, E> Drop for PendingGuard<T, E> {
    fn drop(&mut self) {
        self.pending.remove(&self.key);
        debug!(key = %self.key, "Pending fetch released");
    }
}

impl<T, E> Coalescer<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` for `key` unless one is already in flight, and await the shared result
    pub async fn run_exclusive<F, Fut>(&self, key: &str, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (pending, _started) = self.join_or_start(key, operation);
        pending.await
    }

    /// Register (or join) the in-flight operation for `key` without awaiting it.
    ///
    /// Returns the shared handle and whether this call started the operation.
    /// Registration is synchronous, so a caller that sees `false` knows the
    /// work is already scheduled.
    pub fn join_or_start<F, Fut>(&self, key: &str, operation: F) -> (PendingFetch<T, E>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        match self.pending.entry(key.to_owned()) {
            Entry::Occupied(slot) => {
                debug!(key = %key, "Joined in-flight fetch");
                metrics::record_coalesced_join();
                (slot.get().clone(), false)
            }
            Entry::Vacant(slot) => {
                // Guard after `operation()`: its drop removes from the shard this entry has locked
                let work = operation();
                let guard = PendingGuard {
                    pending: Arc::clone(&self.pending),
                    key: key.to_owned(),
                };
                let handle = tokio::spawn(async move {
                    let _guard = guard;
                    work.await
                });

                let shared = async move { handle.await.unwrap_or_else(|e| Err(E::from(e))) }
                    .boxed()
                    .shared();
                slot.insert(shared.clone());
                debug!(key = %key, "Started fetch");
                (shared, true)
            }
        }
    }

    /// Whether an operation for `key` is currently executing
    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
