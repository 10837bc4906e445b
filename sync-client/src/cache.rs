//! TTL-bounded cache, namespaced by owner.
//!
//! Entries are keyed by `(CacheKey, owner)`. An entry older than its class
//! TTL is treated as absent on read and removed on the spot; the sweeper
//! task (see [`crate::cleanup`]) removes the rest periodically.
//!
//! [`CacheStore::update`] is the only sanctioned read-modify-write: the
//! closure runs while the entry's shard is write-locked, so two concurrent
//! updates of the same key are applied one after the other and neither is
//! lost.

use crate::config::CacheConfig;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::Any;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use vibe_sync_types::UserId;

/// Cache class; selects the default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheClass {
    /// Friend lists and requests.
    Friends,
    /// Stories.
    Stories,
    /// Vibe-reels feed.
    Reels,
    /// Conversation list.
    Conversations,
    /// Message threads.
    Messages,
    /// User profiles.
    Profiles,
}

/// Logical cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    class: CacheClass,
    name: String,
}

impl CacheKey {
    /// Create a key in `class`.
    pub fn new(class: CacheClass, name: impl Into<String>) -> Self {
        Self {
            class,
            name: name.into(),
        }
    }

    /// The key's class.
    pub fn class(&self) -> CacheClass {
        self.class
    }

    /// The key's name within its class.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{}", self.class, self.name)
    }
}

/// Per-class default TTLs.
#[derive(Debug, Clone)]
pub struct ClassTtls {
    friends: Duration,
    stories: Duration,
    reels: Duration,
    conversations: Duration,
    messages: Duration,
    profiles: Duration,
}

impl ClassTtls {
    /// TTLs from the cache section of the config.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            friends: Duration::from_secs(config.friends_ttl_secs),
            stories: Duration::from_secs(config.stories_ttl_secs),
            reels: Duration::from_secs(config.reels_ttl_secs),
            conversations: Duration::from_secs(config.conversations_ttl_secs),
            messages: Duration::from_secs(config.messages_ttl_secs),
            profiles: Duration::from_secs(config.profiles_ttl_secs),
        }
    }

    /// TTL for `class`.
    pub fn get(&self, class: CacheClass) -> Duration {
        match class {
            CacheClass::Friends => self.friends,
            CacheClass::Stories => self.stories,
            CacheClass::Reels => self.reels,
            CacheClass::Conversations => self.conversations,
            CacheClass::Messages => self.messages,
            CacheClass::Profiles => self.profiles,
        }
    }
}

impl Default for ClassTtls {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

type Slot = (CacheKey, Option<UserId>);

struct CacheEntry {
    data: Box<dyn Any + Send + Sync>,
    timestamp: Instant,
}

impl CacheEntry {
    fn new<T: Any + Send + Sync>(data: T) -> Self {
        Self {
            data: Box::new(data),
            timestamp: Instant::now(),
        }
    }

    fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.timestamp)
    }

    fn read<T: Clone + 'static>(&self) -> Option<T> {
        self.data.downcast_ref::<T>().cloned()
    }
}

/// TTL cache shared by every controller of a session.
pub struct CacheStore {
    entries: DashMap<Slot, CacheEntry>,
    ttls: ClassTtls,
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.len())
            .field("ttls", &self.ttls)
            .finish()
    }
}

impl CacheStore {
    /// Create an empty cache with the given class TTLs.
    pub fn new(ttls: ClassTtls) -> Self {
        Self {
            entries: DashMap::new(),
            ttls,
        }
    }

    /// Default TTL of `class`.
    pub fn ttl(&self, class: CacheClass) -> Duration {
        self.ttls.get(class)
    }

    /// Read `key`, treating entries older than `max_age` (default: class TTL)
    /// as absent and deleting them.
    ///
    /// A value stored under a different type also reads as absent.
    pub fn get<T>(
        &self,
        key: &CacheKey,
        owner: Option<&UserId>,
        max_age: Option<Duration>,
    ) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let max_age = max_age.unwrap_or_else(|| self.ttl(key.class));
        let slot = (key.clone(), owner.cloned());

        match self.entries.get(&slot) {
            None => return None,
            Some(entry) if entry.age() <= max_age => return entry.read::<T>(),
            Some(_) => {}
        }

        if self
            .entries
            .remove_if(&slot, |_, entry| entry.age() > max_age)
            .is_some()
        {
            tracing::debug!("Cache: evicted stale {} (owner={:?})", key, owner);
        }
        None
    }

    /// Store `data` under `key`, resetting its timestamp.
    pub fn set<T>(&self, key: &CacheKey, data: T, owner: Option<&UserId>)
    where
        T: Send + Sync + 'static,
    {
        self.entries
            .insert((key.clone(), owner.cloned()), CacheEntry::new(data));
    }

    /// Atomically replace the value under `key` with `f(current)` and return it.
    ///
    /// `current` is `None` when the key is missing, stale or of another type.
    /// The closure runs under the entry lock and must not touch the cache.
    pub fn update<T, F>(&self, key: &CacheKey, f: F, owner: Option<&UserId>) -> T
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(Option<T>) -> T,
    {
        let ttl = self.ttl(key.class);
        match self.entries.entry((key.clone(), owner.cloned())) {
            Entry::Occupied(mut occupied) => {
                let current = {
                    let entry = occupied.get();
                    if entry.age() <= ttl {
                        entry.read::<T>()
                    } else {
                        None
                    }
                };
                let next = f(current);
                occupied.insert(CacheEntry::new(next.clone()));
                next
            }
            Entry::Vacant(vacant) => {
                let next = f(None);
                vacant.insert(CacheEntry::new(next.clone()));
                next
            }
        }
    }

    /// Whether a fresh entry exists for `key`.
    pub fn has(&self, key: &CacheKey, owner: Option<&UserId>, max_age: Option<Duration>) -> bool {
        let max_age = max_age.unwrap_or_else(|| self.ttl(key.class));
        self.entries
            .get(&(key.clone(), owner.cloned()))
            .map(|entry| entry.age() <= max_age)
            .unwrap_or(false)
    }

    /// Drop one entry.
    pub fn remove(&self, key: &CacheKey, owner: Option<&UserId>) {
        self.entries.remove(&(key.clone(), owner.cloned()));
    }

    /// Drop every entry owned by `owner`. Returns how many were removed.
    pub fn clear_owner(&self, owner: &UserId) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|(_, entry_owner), _| entry_owner.as_ref() != Some(owner));
        let removed = before.saturating_sub(self.entries.len());
        tracing::debug!("Cache: cleared {} entries for {:?}", removed, owner);
        removed
    }

    /// Drop everything.
    pub fn clear_all(&self) {
        self.entries.clear();
    }

    /// Remove every entry older than `max_age`, or than its class TTL when
    /// `max_age` is `None`. Returns how many were removed.
    pub fn cleanup(&self, max_age: Option<Duration>) -> usize {
        let before = self.entries.len();
        let ttls = &self.ttls;
        self.entries.retain(|(key, _), entry| {
            let limit = max_age.unwrap_or_else(|| ttls.get(key.class));
            entry.age() <= limit
        });
        before.saturating_sub(self.entries.len())
    }

    /// Number of entries, stale ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(ClassTtls::default())
    }
}
