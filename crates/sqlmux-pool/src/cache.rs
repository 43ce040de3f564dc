//! Keyed loading cache — one loader per key, a listener on every removal.
//!
//! A slot is either `Ready(value)` or `Loading(receiver)`. The first caller
//! for a missing key inserts a `Loading` slot and spawns the loader on
//! tokio; every caller, the first included, awaits the same watch channel,
//! so all of them see one value or one error.
//!
//! The map lock guards lookups and slot transitions only. It is never held
//! across an `.await` or while the removal listener runs, so a slow load for
//! one key never blocks another.
//!
//! ```text
//! miss      → insert Loading(id) → spawn loader → settle(id) → Ready / removed
//! invalidate → remove slot → Ready: listener(Explicit)
//!                          → Loading: loader finds id gone → listener(Discarded)
//! ```

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::watch;

/// Why a value left the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RemovalCause {
    /// Removed through `invalidate` or `invalidate_all`.
    Explicit,
    /// Finished loading after its slot was invalidated. Never handed out.
    Discarded,
    /// The cache was dropped.
    Dropped,
}

/// Called exactly once for every value that leaves the cache.
///
/// Runs without the map lock held, so it may call back into the cache.
pub trait RemovalListener<K, V>: Send + Sync {
    fn on_removal(&self, key: K, value: V, cause: RemovalCause);
}

/// Outcome of a failed [`LoadingCache::try_get_with`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError<E> {
    /// The loader returned an error. Nothing was cached.
    #[error("{0}")]
    Failed(E),
    /// The slot was invalidated while loading; the loaded value was discarded.
    #[error("entry was invalidated while loading")]
    Invalidated,
    /// The loader panicked or was cancelled before producing a result.
    #[error("loader terminated without producing a value")]
    Aborted,
}

type Outcome<V, E> = Option<Result<V, LoadError<E>>>;

enum SlotState<V, E> {
    Ready(V),
    Loading(watch::Receiver<Outcome<V, E>>),
}

struct Slot<V, E> {
    /// Identifies the load that created this slot, so a loader can tell
    /// whether its slot survived until it finished.
    load_id: u64,
    state: SlotState<V, E>,
}

struct Shared<K, V, E> {
    slots: Mutex<HashMap<K, Slot<V, E>>>,
    next_load_id: AtomicU64,
    listener: Arc<dyn RemovalListener<K, V>>,
}

impl<K: Eq + Hash, V, E> Shared<K, V, E> {
    fn lock(&self) -> MutexGuard<'_, HashMap<K, Slot<V, E>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Empty the map, returning the ready values. In-flight loads lose their
    /// slot and discard whatever they produce.
    fn drain(&self) -> Vec<(K, V)> {
        self.lock()
            .drain()
            .filter_map(|(key, slot)| match slot.state {
                SlotState::Ready(value) => Some((key, value)),
                SlotState::Loading(_) => None,
            })
            .collect()
    }

    fn abandon(&self, key: &K, load_id: u64) {
        let mut slots = self.lock();
        if slots.get(key).is_some_and(|slot| slot.load_id == load_id) {
            slots.remove(key);
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone, E> Shared<K, V, E> {
    fn settle(&self, key: &K, load_id: u64, result: Result<V, E>) -> Result<V, LoadError<E>> {
        let mut slots = self.lock();
        let current = slots.get(key).is_some_and(|slot| slot.load_id == load_id);

        match result {
            Ok(value) if current => {
                slots.insert(
                    key.clone(),
                    Slot {
                        load_id,
                        state: SlotState::Ready(value.clone()),
                    },
                );
                Ok(value)
            }
            Ok(value) => {
                drop(slots);
                self.listener
                    .on_removal(key.clone(), value, RemovalCause::Discarded);
                Err(LoadError::Invalidated)
            }
            Err(err) => {
                if current {
                    slots.remove(key);
                }
                Err(LoadError::Failed(err))
            }
        }
    }
}

/// Removes the `Loading` slot if the loader dies before settling.
struct LoadGuard<K: Eq + Hash, V, E> {
    load_id: u64,
    pending: Option<(Arc<Shared<K, V, E>>, K)>,
}

impl<K: Eq + Hash + Clone, V: Clone, E> LoadGuard<K, V, E> {
    fn settle(mut self, result: Result<V, E>) -> Result<V, LoadError<E>> {
        match self.pending.take() {
            Some((shared, key)) => shared.settle(&key, self.load_id, result),
            None => Err(LoadError::Aborted),
        }
    }
}

impl<K: Eq + Hash, V, E> Drop for LoadGuard<K, V, E> {
    fn drop(&mut self) {
        if let Some((shared, key)) = self.pending.take() {
            tracing::warn!(load_id = self.load_id, "cache loader terminated before settling");
            shared.abandon(&key, self.load_id);
        }
    }
}

/// Concurrent map from key to lazily loaded value.
///
/// Failures are never cached: a failed load leaves no slot, so the next
/// call loads again. Dropping the cache hands every ready value to the
/// listener with [`RemovalCause::Dropped`].
pub struct LoadingCache<K: Eq + Hash, V, E> {
    shared: Arc<Shared<K, V, E>>,
}

impl<K: Eq + Hash, V, E> LoadingCache<K, V, E> {
    pub fn new(listener: Arc<dyn RemovalListener<K, V>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                slots: Mutex::new(HashMap::new()),
                next_load_id: AtomicU64::new(1),
                listener,
            }),
        }
    }

    /// Number of ready entries. In-flight loads are not counted.
    pub fn len(&self) -> usize {
        self.shared
            .lock()
            .values()
            .filter(|slot| matches!(slot.state, SlotState::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is ready or currently loading.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shared.lock().contains_key(key)
    }

    pub fn get_if_present<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        match self.shared.lock().get(key).map(|slot| &slot.state) {
            Some(SlotState::Ready(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Remove `key`. A ready value goes to the listener; an in-flight load
    /// is discarded when it finishes. Returns whether anything was removed.
    pub fn invalidate<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let removed = self.shared.lock().remove_entry(key);
        match removed {
            Some((key, Slot {
                state: SlotState::Ready(value),
                ..
            })) => {
                self.shared
                    .listener
                    .on_removal(key, value, RemovalCause::Explicit);
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Remove everything. Returns the number of ready values handed to the listener.
    pub fn invalidate_all(&self) -> usize {
        let drained = self.shared.drain();
        let count = drained.len();
        for (key, value) in drained {
            self.shared
                .listener
                .on_removal(key, value, RemovalCause::Explicit);
        }
        count
    }
}

impl<K, V, E> LoadingCache<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Return the value for `key`, loading it with `init` on a miss.
    ///
    /// `init` is called at most once per miss, by the caller that created
    /// the slot, outside the map lock. The future it returns is spawned, so
    /// the load completes and is published even if that caller is cancelled.
    pub async fn try_get_with<F, Fut>(&self, key: K, init: F) -> Result<V, LoadError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let (mut outcome, pending) = {
            let mut slots = self.shared.lock();
            match slots.get(&key).map(|slot| &slot.state) {
                Some(SlotState::Ready(value)) => return Ok(value.clone()),
                Some(SlotState::Loading(rx)) => (rx.clone(), None),
                None => {
                    let load_id = self.shared.next_load_id.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = watch::channel(None);
                    slots.insert(
                        key.clone(),
                        Slot {
                            load_id,
                            state: SlotState::Loading(rx.clone()),
                        },
                    );
                    (rx, Some((load_id, tx)))
                }
            }
        };

        if let Some((load_id, tx)) = pending {
            let guard = LoadGuard {
                load_id,
                pending: Some((Arc::clone(&self.shared), key)),
            };
            let load = init();
            tokio::spawn(async move {
                let result = load.await;
                let settled = guard.settle(result);
                // Every waiter may already be gone.
                let _ = tx.send(Some(settled));
            });
        }

        let settled = match outcome.wait_for(Option::is_some).await {
            Ok(current) => (*current).clone(),
            Err(_) => None,
        };
        settled.unwrap_or(Err(LoadError::Aborted))
    }
}

impl<K: Eq + Hash, V, E> Drop for LoadingCache<K, V, E> {
    fn drop(&mut self) {
        for (key, value) in self.shared.drain() {
            self.shared
                .listener
                .on_removal(key, value, RemovalCause::Dropped);
        }
    }
}

impl<K: Eq + Hash, V, E> fmt::Debug for LoadingCache<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadingCache")
            .field("slots", &self.shared.lock().len())
            .finish_non_exhaustive()
    }
}
