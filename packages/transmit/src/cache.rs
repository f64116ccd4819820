//! Keyed single-flight cache
//!
//! The first caller for a key spawns the load on the runtime; later callers
//! for the same key join that load instead of starting another. The spawned
//! task runs to completion even if every waiter is dropped. Successful values
//! stay cached until evicted; failures are not cached, so the next caller
//! retries.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};

/// A spawned load ended without producing a result
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cache load for '{key}' aborted: {reason}")]
pub struct LoadAborted {
    key: String,
    reason: String,
}

type SharedLoad<V, E> = Shared<BoxFuture<'static, Result<Arc<V>, E>>>;

enum Slot<V, E> {
    Ready(Arc<V>),
    Pending { id: u64, load: SharedLoad<V, E> },
}

type Entries<V, E> = DashMap<String, Slot<V, E>>;

/// Hit and load counters of a [`SingleFlightCache`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Calls answered from a cached or in-flight entry
    pub hits: usize,
    /// Loads started
    pub loads: usize,
    /// Entries currently held (ready or in flight)
    pub entries: usize,
}

/// Single-flight cache keyed by string
pub struct SingleFlightCache<V, E> {
    name: &'static str,
    entries: Arc<Entries<V, E>>,
    next_id: AtomicU64,
    hits: AtomicUsize,
    loads: AtomicUsize,
}

impl<V, E> SingleFlightCache<V, E>
where
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + From<LoadAborted> + 'static,
{
    /// Create an empty cache; `name` only appears in log events
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
            hits: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
        }
    }

    /// Return the cached value for `key`, loading it with `load` on a miss
    ///
    /// The spawned load settles its own slot: a success becomes the cached
    /// value and a failure is removed, whether or not anyone still waits.
    ///
    /// # Errors
    ///
    /// Returns the load's error, shared with every caller that joined it, or
    /// a [`LoadAborted`] conversion if the load panicked or was cancelled.
    pub async fn get_or_load<F, Fut>(&self, key: &str, load: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let (id, pending) = match self.entries.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                match entry.get() {
                    Slot::Ready(value) => {
                        tracing::debug!(cache = self.name, key, "cache hit");
                        return Ok(Arc::clone(value));
                    }
                    Slot::Pending { id, load } => {
                        tracing::debug!(cache = self.name, key, "joining in-flight load");
                        (*id, load.clone())
                    }
                }
            }
            Entry::Vacant(entry) => {
                self.loads.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(cache = self.name, key, "cache miss, starting load");
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let task = tokio::spawn(settle(
                    Arc::clone(&self.entries),
                    self.name,
                    key.to_string(),
                    id,
                    load(),
                ));
                let owned_key = key.to_string();
                let pending = async move {
                    task.await.unwrap_or_else(|join| {
                        Err(E::from(LoadAborted {
                            key: owned_key,
                            reason: join.to_string(),
                        }))
                    })
                }
                .boxed()
                .shared();
                entry.insert(Slot::Pending {
                    id,
                    load: pending.clone(),
                });
                (id, pending)
            }
        };

        let result = pending.await;
        if result.is_err() {
            // A cancelled task never settled its slot
            remove_pending(&self.entries, key, id);
        }
        result
    }

    /// Cached value for `key` if its load has completed successfully
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        match self.entries.get(key).as_deref() {
            Some(Slot::Ready(value)) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    /// Drop the entry for `key`; returns whether one existed
    pub fn evict(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            tracing::debug!(cache = self.name, key, "evicted");
        }
        removed
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}

/// Run one load and record its outcome in the map
async fn settle<V, E, Fut>(
    entries: Arc<Entries<V, E>>,
    name: &'static str,
    key: String,
    id: u64,
    load: Fut,
) -> Result<Arc<V>, E>
where
    E: From<LoadAborted>,
    Fut: Future<Output = Result<V, E>>,
{
    let result = match AssertUnwindSafe(load).catch_unwind().await {
        Ok(result) => result.map(Arc::new),
        Err(_) => Err(E::from(LoadAborted {
            key: key.clone(),
            reason: "load panicked".to_string(),
        })),
    };

    match &result {
        Ok(value) => {
            if let Some(mut slot) = entries.get_mut(&key) {
                if matches!(&*slot, Slot::Pending { id: current, .. } if *current == id) {
                    *slot = Slot::Ready(Arc::clone(value));
                }
            }
        }
        Err(_) => {
            tracing::debug!(cache = name, key = %key, "load failed, slot removed");
            remove_pending(&entries, &key, id);
        }
    }
    result
}

fn remove_pending<V, E>(entries: &Entries<V, E>, key: &str, id: u64) {
    entries.remove_if(key, |_, slot| {
        matches!(slot, Slot::Pending { id: current, .. } if *current == id)
    });
}

impl<V, E> std::fmt::Debug for SingleFlightCache<V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlightCache")
            .field("name", &self.name)
            .field("entries", &self.entries.len())
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("loads", &self.loads.load(Ordering::Relaxed))
            .finish()
    }
}
