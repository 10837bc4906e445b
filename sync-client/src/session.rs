//! SyncSession - the per-user composition root.
//!
//! Owns everything with session lifetime: cache, profile registry, channel
//! multiplexer, lifecycle signal, cache sweeper and reconnect driver.
//! Controllers are built from a session and attach themselves to it so that
//! a user switch, logout or auth expiry can stop them before any state of
//! the departing user is cleared.
//!
//! # Example
//!
//! ```ignore
//! let remote = Arc::new(MockRemote::signed_in("alice"));
//! let session = SyncSession::new(remote, SyncConfig::default());
//! let stories = StoriesController::start(&session).await?;
//!
//! // Later: logout
//! session.end().await;
//! ```

use crate::cache::{CacheStore, ClassTtls};
use crate::channel::ChannelMultiplexer;
use crate::cleanup::spawn_cache_sweeper;
use crate::config::SyncConfig;
use crate::lifecycle::{AppLifecycle, LifecycleHandle};
use crate::registry::GlobalEntityRegistry;
use crate::remote::RemoteDataService;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use vibe_sync_core::{ChannelState, ReconnectPolicy};
use vibe_sync_types::{Profile, SyncError, UserId};

/// Capacity of the session event channel.
const EVENT_CAPACITY: usize = 32;

/// Session transitions, broadcast to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A user's session began.
    Started {
        /// The new session user.
        user: UserId,
    },
    /// A user's session ended (logout or user switch).
    Ended {
        /// The departing user.
        user: UserId,
    },
    /// The remote service rejected the credentials; re-authentication needed.
    AuthExpired {
        /// The user whose credentials expired.
        user: UserId,
    },
}

/// Something that must stop when its session ends.
#[async_trait]
pub trait SessionBound: Send + Sync {
    /// Cancel timers and subscriptions. Must be idempotent.
    async fn detach(&self);
}

/// The engine for one signed-in user.
pub struct SyncSession {
    remote: Arc<dyn RemoteDataService>,
    config: SyncConfig,
    cache: Arc<CacheStore>,
    profiles: Arc<GlobalEntityRegistry<Profile>>,
    multiplexer: Arc<ChannelMultiplexer>,
    lifecycle: LifecycleHandle,
    events: broadcast::Sender<SessionEvent>,
    user: RwLock<Option<UserId>>,
    attached: Mutex<Vec<Weak<dyn SessionBound>>>,
    sweeper: JoinHandle<()>,
    reconnector: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("user", &self.user())
            .field("cache", &self.cache)
            .field("multiplexer", &self.multiplexer)
            .finish()
    }
}

impl SyncSession {
    /// Build a session for whoever `remote` reports as signed in.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(remote: Arc<dyn RemoteDataService>, config: SyncConfig) -> Arc<Self> {
        let cache = Arc::new(CacheStore::new(ClassTtls::from_config(&config.cache)));
        let multiplexer = Arc::new(ChannelMultiplexer::new(remote.clone()));
        let lifecycle = LifecycleHandle::new(AppLifecycle::Foreground);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let user = remote.current_user_id();

        let sweeper = spawn_cache_sweeper(cache.clone(), &config.cache, lifecycle.subscribe());
        let reconnector = match config.channel.policy() {
            ReconnectPolicy::Manual => None,
            policy => Some(spawn_reconnector(multiplexer.clone(), policy)),
        };

        tracing::info!("Session started for {:?}", user);
        if let Some(user) = &user {
            let _ = events.send(SessionEvent::Started { user: user.clone() });
        }

        Arc::new(Self {
            remote,
            config,
            cache,
            profiles: Arc::new(GlobalEntityRegistry::new()),
            multiplexer,
            lifecycle,
            events,
            user: RwLock::new(user),
            attached: Mutex::new(Vec::new()),
            sweeper,
            reconnector,
        })
    }

    /// The session user.
    pub fn user(&self) -> Option<UserId> {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The session user, or `AuthExpired` when signed out.
    pub fn require_user(&self) -> Result<UserId, SyncError> {
        self.user().ok_or(SyncError::AuthExpired)
    }

    /// The remote data service.
    pub fn remote(&self) -> &Arc<dyn RemoteDataService> {
        &self.remote
    }

    /// Engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Shared cache.
    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Shared profile registry.
    pub fn profiles(&self) -> &Arc<GlobalEntityRegistry<Profile>> {
        &self.profiles
    }

    /// Shared realtime multiplexer.
    pub fn multiplexer(&self) -> &Arc<ChannelMultiplexer> {
        &self.multiplexer
    }

    /// Lifecycle signal; the host reports foreground/background here.
    pub fn lifecycle(&self) -> &LifecycleHandle {
        &self.lifecycle
    }

    /// Observe session transitions.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Register `bound` to be detached when the session user changes.
    pub fn attach(&self, bound: Weak<dyn SessionBound>) {
        let mut attached = self.attached.lock().unwrap_or_else(PoisonError::into_inner);
        attached.retain(|existing| existing.strong_count() > 0);
        attached.push(bound);
    }

    /// Switch to `next` (or sign out with `None`).
    ///
    /// Everything attached is detached and the departing user's cache and
    /// registry entries are cleared before `next` is published.
    pub async fn switch_user(&self, next: Option<UserId>) {
        let previous = self.user();
        if previous == next {
            return;
        }

        self.shutdown_attached().await;
        if let Some(previous) = &previous {
            self.cache.clear_owner(previous);
        }
        self.profiles.clear_all();
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = next.clone();

        if let Some(previous) = previous {
            tracing::info!("Session ended for {:?}", previous);
            let _ = self.events.send(SessionEvent::Ended { user: previous });
        }
        if let Some(next) = next {
            tracing::info!("Session started for {:?}", next);
            let _ = self.events.send(SessionEvent::Started { user: next });
        }
    }

    /// Log out: detach everything and drop all cached state.
    pub async fn end(&self) {
        self.switch_user(None).await;
        self.cache.clear_all();
    }

    /// Route an error raised by a controller.
    ///
    /// `AuthExpired` ends the session and is broadcast; everything else is
    /// only logged here.
    pub async fn report(&self, error: &SyncError) {
        if !error.is_auth_expired() {
            tracing::debug!("Session: {}", error);
            return;
        }
        let Some(user) = self.user() else {
            return;
        };

        tracing::warn!("Session: credentials expired for {:?}", user);
        self.shutdown_attached().await;
        self.cache.clear_owner(&user);
        self.profiles.clear_all();
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = None;
        let _ = self.events.send(SessionEvent::AuthExpired { user });
    }

    async fn shutdown_attached(&self) {
        let attached: Vec<Arc<dyn SessionBound>> = {
            let mut attached = self.attached.lock().unwrap_or_else(PoisonError::into_inner);
            attached.drain(..).filter_map(|weak| weak.upgrade()).collect()
        };
        for bound in &attached {
            bound.detach().await;
        }
        self.multiplexer.teardown().await;
        tracing::debug!("Session: detached {} controllers", attached.len());
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.sweeper.abort();
        if let Some(reconnector) = &self.reconnector {
            reconnector.abort();
        }
    }
}

/// Reconnect the multiplexer with backoff whenever it is disconnected
/// while subscriptions still need it.
fn spawn_reconnector(
    multiplexer: Arc<ChannelMultiplexer>,
    policy: ReconnectPolicy,
) -> JoinHandle<()> {
    let mut states = multiplexer.watch_state();

    tokio::spawn(async move {
        loop {
            let state = states.borrow_and_update().clone();
            if state == ChannelState::Disconnected && multiplexer.subscription_count() > 0 {
                reconnect_with_backoff(&multiplexer, policy).await;
                // Our own attempts are not a reason to start over.
                let _ = states.borrow_and_update();
            }
            if states.changed().await.is_err() {
                break;
            }
        }
    })
}

async fn reconnect_with_backoff(multiplexer: &ChannelMultiplexer, policy: ReconnectPolicy) {
    let mut attempt = 1;
    while let Some(delay) = policy.next_delay(attempt) {
        tracing::info!("Channel: reconnect attempt {} in {:?}", attempt, delay);
        tokio::time::sleep(delay).await;

        if multiplexer.subscription_count() == 0 {
            return;
        }
        match multiplexer.reconnect().await {
            Ok(()) => return,
            Err(e) => {
                tracing::warn!("Channel: reconnect attempt {} failed: {}", attempt, e);
                attempt += 1;
            }
        }
    }
    tracing::warn!("Channel: giving up after {} reconnect attempts", attempt - 1);
}
