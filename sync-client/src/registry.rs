//! GlobalEntityRegistry - one canonical value per entity id.
//!
//! Any number of unrelated consumers can read the same entity (a user's
//! profile, say) and be notified when it changes, without sharing a parent.
//! The registry is created with the session and emptied when it ends.
//!
//! [`GlobalEntityRegistry::get_or_fetch`] guarantees at most one fetch per
//! id at a time: the first caller runs the fetch, concurrent callers wait
//! for its result.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use vibe_sync_types::{EntityId, SyncError};

/// Callback invoked with the new canonical value.
pub type EntityListener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by [`GlobalEntityRegistry::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type FetchResult<T> = Option<Result<T, SyncError>>;

struct InFlight<T> {
    token: u64,
    result: watch::Receiver<FetchResult<T>>,
}

/// Removes the in-flight marker however the leading fetch ends.
struct InFlightGuard<'a, T> {
    in_flight: &'a DashMap<EntityId, InFlight<T>>,
    id: EntityId,
    token: u64,
}

impl<T> Drop for InFlightGuard<'_, T> {
    fn drop(&mut self) {
        self.in_flight
            .remove_if(&self.id, |_, entry| entry.token == self.token);
    }
}

/// Canonical values plus per-id listeners.
pub struct GlobalEntityRegistry<T> {
    values: DashMap<EntityId, T>,
    listeners: DashMap<EntityId, Vec<(ListenerId, EntityListener<T>)>>,
    in_flight: DashMap<EntityId, InFlight<T>>,
    next_id: AtomicU64,
    /// Bumped by `clear_all`; fetches started before it do not store.
    generation: AtomicU64,
}

impl<T> std::fmt::Debug for GlobalEntityRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalEntityRegistry")
            .field("values", &self.values.len())
            .field("listeners", &self.listeners.len())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl<T> GlobalEntityRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            values: DashMap::new(),
            listeners: DashMap::new(),
            in_flight: DashMap::new(),
            next_id: AtomicU64::new(1),
            generation: AtomicU64::new(0),
        }
    }

    /// Canonical value of `id`.
    pub fn get(&self, id: &EntityId) -> Option<T> {
        self.values.get(id).map(|value| value.clone())
    }

    /// Whether `id` has a canonical value.
    pub fn contains(&self, id: &EntityId) -> bool {
        self.values.contains_key(id)
    }

    /// Replace the canonical value of `id` and notify each of its listeners once.
    pub fn set(&self, id: &EntityId, value: T) {
        self.values.insert(id.clone(), value.clone());

        let listeners: Vec<(ListenerId, EntityListener<T>)> = self
            .listeners
            .get(id)
            .map(|list| list.clone())
            .unwrap_or_default();

        for (listener, callback) in listeners {
            if catch_unwind(AssertUnwindSafe(|| callback(&value))).is_err() {
                tracing::error!("Registry listener {:?} for {} panicked", listener, id);
            }
        }
    }

    /// Register `callback` for changes of `id`.
    pub fn add_listener<F>(&self, id: &EntityId, callback: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let listener = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .entry(id.clone())
            .or_default()
            .push((listener, Arc::new(callback)));
        listener
    }

    /// Unregister a listener. The canonical value stays cached.
    pub fn remove_listener(&self, id: &EntityId, listener: ListenerId) -> bool {
        let mut removed = false;
        if let Some(mut list) = self.listeners.get_mut(id) {
            let before = list.len();
            list.retain(|(existing, _)| *existing != listener);
            removed = list.len() != before;
        }
        self.listeners.remove_if(id, |_, list| list.is_empty());
        removed
    }

    /// Snapshot of every canonical value.
    pub fn values(&self) -> Vec<T> {
        self.values.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Number of listeners registered for `id`.
    pub fn listener_count(&self, id: &EntityId) -> usize {
        self.listeners.get(id).map(|list| list.len()).unwrap_or(0)
    }

    /// Number of canonical values held.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if no values are held.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drop every value, listener and in-flight marker.
    pub fn clear_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.values.clear();
        self.listeners.clear();
        self.in_flight.clear();
        tracing::debug!("Registry cleared");
    }

    /// The canonical value of `id`, fetching it if absent.
    ///
    /// Concurrent calls for the same id share one fetch. A successful fetch
    /// is stored with [`GlobalEntityRegistry::set`], so listeners hear about
    /// it. Errors are returned to every waiting caller and not cached.
    pub async fn get_or_fetch<F, Fut>(&self, id: &EntityId, fetch: F) -> Result<T, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let (tx, token) = loop {
            if let Some(value) = self.get(id) {
                return Ok(value);
            }

            let mut rx = match self.in_flight.entry(id.clone()) {
                Entry::Occupied(entry) => entry.get().result.clone(),
                Entry::Vacant(entry) => {
                    let (tx, rx) = watch::channel(None);
                    let token = self.next_id.fetch_add(1, Ordering::Relaxed);
                    entry.insert(InFlight { token, result: rx });
                    break (tx, token);
                }
            };

            let waited = rx
                .wait_for(|result| result.is_some())
                .await
                .map(|result| (*result).clone());
            match waited {
                Ok(Some(result)) => return result,
                // The leading fetch was dropped without an answer; try again.
                Ok(None) | Err(_) => continue,
            }
        };

        let _guard = InFlightGuard {
            in_flight: &self.in_flight,
            id: id.clone(),
            token,
        };
        // Another leader may have stored the value just before us.
        if let Some(value) = self.get(id) {
            tx.send_replace(Some(Ok(value.clone())));
            return Ok(value);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        tracing::debug!("Registry: fetching {}", id);
        let result = fetch().await;

        match &result {
            Ok(value) if self.generation.load(Ordering::SeqCst) == generation => {
                self.set(id, value.clone());
            }
            Ok(_) => tracing::debug!("Registry: discarding {} fetched before clear", id),
            Err(e) => tracing::debug!("Registry: fetch of {} failed: {}", id, e),
        }
        tx.send_replace(Some(result.clone()));
        result
    }
}

impl<T> Default for GlobalEntityRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
