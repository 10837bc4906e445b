//! ChannelMultiplexer - one realtime feed, many named subscriptions.
//!
//! # Architecture
//!
//! ```text
//! RemoteDataService ──feed──► pump task ──► dispatch ──► subscription callbacks
//!                                 │
//!                         ChannelState (sync-core) ──watch──► observers
//! ```
//!
//! The feed is opened lazily by the first `subscribe()` of a session and
//! closed when the last subscription goes away or on `teardown()`. After an
//! error the multiplexer stays `Disconnected` until someone calls
//! [`ChannelMultiplexer::reconnect`]; it never retries by itself.

use crate::remote::{ChangeFeed, RemoteDataService};
use dashmap::DashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use vibe_sync_core::{ChannelAction, ChannelEvent, ChannelState};
use vibe_sync_types::{Change, ChangeFilter, SubscriptionId, SyncError, TableFilter, UserId};

/// Callback invoked for every change a subscription accepts.
pub type ChangeCallback = Arc<dyn Fn(&Change) + Send + Sync>;

struct Subscription {
    filters: Vec<TableFilter>,
    callback: ChangeCallback,
    enabled: bool,
}

impl Subscription {
    fn accepts(&self, change: &Change) -> bool {
        self.enabled && self.filters.iter().any(|filter| filter.matches(change))
    }
}

/// The open (or last attempted) feed of a session.
struct Connection {
    user: Option<UserId>,
    pump: Option<JoinHandle<()>>,
}

struct Shared {
    subscriptions: DashMap<SubscriptionId, Subscription>,
    state: watch::Sender<ChannelState>,
    /// Bumped whenever a feed is replaced; a pump only reports its own end.
    generation: AtomicU64,
}

impl Shared {
    /// Run `event` through the state machine and carry out its actions.
    fn apply(&self, event: ChannelEvent) -> Vec<ChannelAction> {
        let mut actions = Vec::new();
        self.state.send_if_modified(|state| {
            let (next, emitted) = state.clone().on_event(event);
            actions = emitted;
            let changed = *state != next;
            *state = next;
            changed
        });

        for action in &actions {
            match action {
                ChannelAction::PublishState => {
                    tracing::debug!("Channel: {:?}", *self.state.borrow());
                }
                ChannelAction::ReportError(error) => {
                    tracing::warn!("Channel error: {}", error);
                }
                ChannelAction::OpenFeed | ChannelAction::CloseFeed => {}
            }
        }
        actions
    }

    fn dispatch(&self, change: &Change) {
        // Snapshot first so callbacks may (un)subscribe without deadlocking.
        let targets: Vec<(SubscriptionId, ChangeCallback)> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.value().accepts(change))
            .map(|entry| (entry.key().clone(), entry.value().callback.clone()))
            .collect();

        for (id, callback) in targets {
            if catch_unwind(AssertUnwindSafe(|| callback(change))).is_err() {
                tracing::error!(
                    "Subscription {} panicked handling {:?} on {}",
                    id,
                    change.event,
                    change.table
                );
            }
        }
    }
}

/// Routes a single realtime feed to many independent subscriptions.
pub struct ChannelMultiplexer {
    remote: Arc<dyn RemoteDataService>,
    shared: Arc<Shared>,
    connection: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for ChannelMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelMultiplexer")
            .field("state", &*self.shared.state.borrow())
            .field("subscriptions", &self.shared.subscriptions.len())
            .finish()
    }
}

impl ChannelMultiplexer {
    /// Create a multiplexer over `remote`. No feed is opened yet.
    pub fn new(remote: Arc<dyn RemoteDataService>) -> Self {
        let (state, _) = watch::channel(ChannelState::new());
        Self {
            remote,
            shared: Arc::new(Shared {
                subscriptions: DashMap::new(),
                state,
                generation: AtomicU64::new(0),
            }),
            connection: Mutex::new(None),
        }
    }

    /// Register (or replace) subscription `id`.
    ///
    /// Opens the feed if none has been opened for the current session user.
    /// A failed open leaves the registration in place and the channel
    /// `Disconnected`.
    pub async fn subscribe<F>(
        &self,
        id: impl Into<SubscriptionId>,
        filters: Vec<TableFilter>,
        callback: F,
        enabled: bool,
    ) where
        F: Fn(&Change) + Send + Sync + 'static,
    {
        let id = id.into();
        tracing::debug!("Channel: subscribe {} ({} filters)", id, filters.len());
        self.shared.subscriptions.insert(
            id,
            Subscription {
                filters,
                callback: Arc::new(callback),
                enabled,
            },
        );

        let mut connection = self.connection.lock().await;
        let user = self.remote.current_user_id();
        let opened_for_user = connection.as_ref().map(|c| &c.user) == Some(&user);
        if opened_for_user {
            return;
        }
        if user.is_none() {
            tracing::debug!("Channel: no signed-in user, feed not opened");
            return;
        }
        if let Err(e) = self.open(&mut connection, user).await {
            tracing::warn!("Channel: lazy open failed: {}", e);
        }
    }

    /// Replace the filters of subscription `id`. Returns `false` if unknown.
    pub fn update_subscription(&self, id: &SubscriptionId, filters: Vec<TableFilter>) -> bool {
        match self.shared.subscriptions.get_mut(id) {
            Some(mut subscription) => {
                subscription.filters = filters;
                true
            }
            None => false,
        }
    }

    /// Enable or disable delivery to subscription `id`. Returns `false` if unknown.
    pub fn set_enabled(&self, id: &SubscriptionId, enabled: bool) -> bool {
        match self.shared.subscriptions.get_mut(id) {
            Some(mut subscription) => {
                subscription.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Remove subscription `id`; closes the feed if it was the last one.
    pub async fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        let mut connection = self.connection.lock().await;
        let removed = self.shared.subscriptions.remove(id).is_some();
        if removed {
            tracing::debug!("Channel: unsubscribe {}", id);
        }
        if self.shared.subscriptions.is_empty() && connection.is_some() {
            self.close(&mut connection);
        }
        removed
    }

    /// Re-open the feed for the current session user.
    ///
    /// A no-op while a feed is already open or opening.
    pub async fn reconnect(&self) -> Result<(), SyncError> {
        let mut connection = self.connection.lock().await;
        if self.state().is_active() {
            return Ok(());
        }
        let user = self.remote.current_user_id();
        if user.is_none() {
            return Err(SyncError::AuthExpired);
        }
        self.open(&mut connection, user).await
    }

    /// Drop every subscription and close the feed.
    pub async fn teardown(&self) {
        let mut connection = self.connection.lock().await;
        let count = self.shared.subscriptions.len();
        self.shared.subscriptions.clear();
        self.close(&mut connection);
        tracing::info!("Channel: torn down ({} subscriptions dropped)", count);
    }

    /// Current channel state.
    pub fn state(&self) -> ChannelState {
        self.shared.state.borrow().clone()
    }

    /// Watch channel state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    /// Number of registered subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.shared.subscriptions.len()
    }

    /// Whether `id` is registered.
    pub fn is_subscribed(&self, id: &SubscriptionId) -> bool {
        self.shared.subscriptions.contains_key(id)
    }

    async fn open(
        &self,
        connection: &mut Option<Connection>,
        user: Option<UserId>,
    ) -> Result<(), SyncError> {
        // A feed for a previous user must not keep delivering.
        self.close(connection);

        let actions = self.shared.apply(ChannelEvent::ConnectRequested);
        if !actions.contains(&ChannelAction::OpenFeed) {
            return Ok(());
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        match self.remote.subscribe_changes(&ChangeFilter::everything()).await {
            Ok(feed) => {
                self.shared.apply(ChannelEvent::Opened);
                let pump = tokio::spawn(pump(self.shared.clone(), feed, generation));
                *connection = Some(Connection {
                    user,
                    pump: Some(pump),
                });
                tracing::info!("Channel: connected");
                Ok(())
            }
            Err(e) => {
                self.shared.apply(ChannelEvent::Failed {
                    error: e.to_string(),
                });
                *connection = Some(Connection { user, pump: None });
                Err(e.into())
            }
        }
    }

    fn close(&self, connection: &mut Option<Connection>) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.apply(ChannelEvent::TeardownRequested);
        if let Some(Connection {
            pump: Some(pump), ..
        }) = connection.take()
        {
            pump.abort();
        }
    }
}

impl Drop for ChannelMultiplexer {
    fn drop(&mut self) {
        if let Some(Connection {
            pump: Some(pump), ..
        }) = self.connection.get_mut().take()
        {
            pump.abort();
        }
    }
}

async fn pump(shared: Arc<Shared>, mut feed: ChangeFeed, generation: u64) {
    let event = loop {
        match feed.recv().await {
            Some(Ok(change)) => shared.dispatch(&change),
            Some(Err(e)) => {
                break ChannelEvent::Failed {
                    error: e.to_string(),
                }
            }
            None => {
                break ChannelEvent::Closed {
                    reason: "feed ended".into(),
                }
            }
        }
    };

    if shared.generation.load(Ordering::SeqCst) == generation {
        shared.apply(event);
    }
}
