//! Domain controllers.
//!
//! Every list-shaped controller is a thin wrapper over [`Collection`], which
//! wires the shared pieces together:
//!
//! ```text
//! cache seed ──► tracker ──► ControllerState (watch)
//!                  ▲   ▲
//!   full fetch ────┘   └──── throttler batch / direct change
//!        ▲                         ▲
//!   poll tick, refresh()      multiplexer callback
//! ```
//!
//! A collection attaches itself to its [`SyncSession`] and is detached
//! before the session clears any state, so no callback, timer or fetch of
//! a departed user can publish afterwards.

mod conversations;
mod friends;
mod profiles;
mod reels;
mod stories;

pub use conversations::{ConversationsController, MessageThread};
pub use friends::FriendsController;
pub use profiles::ProfileDirectory;
pub use reels::ReelsController;
pub use stories::StoriesController;

use crate::cache::{CacheClass, CacheStore};
use crate::optimistic::OptimisticMutationTracker;
use crate::polling::PollingFallback;
use crate::session::{SessionBound, SyncSession};
use crate::throttle::{
    CacheRoute, HintSender, ReconciledBatch, ReconciliationThrottler, ThrottleSettings,
};
use async_trait::async_trait;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tokio::sync::watch;
use vibe_sync_core::{LoadAction, LoadEvent, LoadState};
use vibe_sync_types::{
    Change, CorrelationId, EntityId, EventKind, Mutation, Predicate, Record, Row, StreamId,
    SubscriptionId, SyncError, TableFilter, UserId,
};

/// What a controller publishes.
#[derive(Debug, Clone)]
pub struct ControllerState<T> {
    /// Load phase.
    pub phase: LoadState,
    /// Visible records, placeholders included.
    pub items: Vec<T>,
    /// Last fetch error. Informational; the items stay usable.
    pub last_error: Option<SyncError>,
}

impl<T> Default for ControllerState<T> {
    fn default() -> Self {
        Self {
            phase: LoadState::Uninitialized,
            items: Vec::new(),
            last_error: None,
        }
    }
}

impl<T> ControllerState<T> {
    /// Whether a blocking spinner is appropriate (first load only).
    pub fn is_loading(&self) -> bool {
        self.phase == LoadState::Loading
    }
}

/// Watch cell driven by the load-state machine.
struct StateCell<T> {
    tx: watch::Sender<ControllerState<T>>,
    name: String,
}

impl<T: Clone + Send + Sync + 'static> StateCell<T> {
    fn new(name: String) -> Self {
        let (tx, _) = watch::channel(ControllerState::default());
        Self { tx, name }
    }

    fn subscribe(&self) -> watch::Receiver<ControllerState<T>> {
        self.tx.subscribe()
    }

    fn snapshot(&self) -> ControllerState<T> {
        self.tx.borrow().clone()
    }

    /// Feed `event` to the machine. Returns `Some(silent)` when a fetch should run.
    fn handle(&self, event: LoadEvent) -> Option<bool> {
        let mut fetch = None;
        self.tx.send_if_modified(|state| {
            let (next, actions) = state.phase.on_event(event);
            let changed = next != state.phase;
            state.phase = next;
            let mut publish = false;
            for action in actions {
                match action {
                    LoadAction::Fetch { silent } => fetch = Some(silent),
                    LoadAction::Publish => publish = true,
                    LoadAction::ReportError(error) => {
                        tracing::warn!("Controller[{}]: fetch failed: {}", self.name, error);
                    }
                }
            }
            if next == LoadState::Uninitialized {
                state.items.clear();
            }
            changed || publish
        });
        fetch
    }

    fn set_items(&self, items: Vec<T>) {
        self.tx.send_modify(|state| state.items = items);
    }

    fn set_error(&self, error: Option<SyncError>) {
        self.tx.send_if_modified(|state| {
            if error.is_none() && state.last_error.is_none() {
                return false;
            }
            state.last_error = error;
            true
        });
    }
}

/// How realtime inserts and updates reach the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RealtimeMode {
    /// Hint the throttler; records are re-fetched in batches.
    Throttled,
    /// Decode the change's row and merge it right away.
    Direct,
}

/// Static description of one collection.
struct CollectionSpec<R> {
    /// Stream and subscription name.
    name: String,
    class: CacheClass,
    route: CacheRoute,
    query: Predicate,
    filters: Vec<TableFilter>,
    realtime: RealtimeMode,
    /// Records failing this are kept in the ledger but not published.
    visible: fn(&R, &UserId) -> bool,
    /// Sort applied to full fetches.
    order: Option<fn(&R, &R) -> CmpOrdering>,
}

fn always_visible<R>(_: &R, _: &UserId) -> bool {
    true
}

/// A live, cached, realtime-backed list of records.
struct Collection<R: Record> {
    session: Arc<SyncSession>,
    spec: CollectionSpec<R>,
    user: UserId,
    stream: StreamId,
    subscription: SubscriptionId,
    state: Arc<StateCell<R>>,
    tracker: Arc<OptimisticMutationTracker<R>>,
    throttler: ReconciliationThrottler<R>,
    poller: PollingFallback,
    detached: Arc<AtomicBool>,
    /// Current server-side scope; starts as `spec.query`.
    query: RwLock<Predicate>,
    /// Bumped by every rescope so fetches of an older scope are dropped.
    scope_generation: AtomicU64,
}

impl<R: Record> std::fmt::Debug for Collection<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.spec.name)
            .field("user", &self.user)
            .field("phase", &self.state.snapshot().phase)
            .finish()
    }
}

impl<R: Record> Collection<R> {
    /// Build, seed, subscribe, schedule polling and run the first fetch.
    async fn start(
        session: &Arc<SyncSession>,
        spec: CollectionSpec<R>,
    ) -> Result<Arc<Self>, SyncError> {
        let user = session.require_user()?;
        let stream = StreamId::new(spec.name.clone());
        let subscription = SubscriptionId::new(spec.name.clone());
        let state = Arc::new(StateCell::new(spec.name.clone()));
        let detached = Arc::new(AtomicBool::new(false));

        let tracker = {
            let state = state.clone();
            let user = user.clone();
            let visible = spec.visible;
            Arc::new(OptimisticMutationTracker::new(Arc::new(
                move |_: &StreamId, items: Vec<R>| {
                    state.set_items(items.into_iter().filter(|r| visible(r, &user)).collect());
                },
            )))
        };

        let throttler = {
            let tracker = tracker.clone();
            let stream = stream.clone();
            let detached = detached.clone();
            ReconciliationThrottler::spawn(
                session.remote().clone(),
                session.cache().clone(),
                user.clone(),
                ThrottleSettings::for_class(&session.config().throttle, spec.class),
                spec.route.clone(),
                Arc::new(move |batch: ReconciledBatch<R>| {
                    if detached.load(Ordering::SeqCst) {
                        return;
                    }
                    for id in &batch.missing {
                        tracker.remove(&stream, id);
                    }
                    for record in batch.all() {
                        tracker.apply_authoritative(&stream, record.clone());
                    }
                }),
            )
        };

        let poller = PollingFallback::new(
            spec.name.clone(),
            session.lifecycle().subscribe(),
            session.config().polling.enabled,
        );

        let query = RwLock::new(spec.query.clone());
        let collection = Arc::new(Self {
            session: session.clone(),
            spec,
            user,
            stream,
            subscription,
            state,
            tracker,
            throttler,
            poller,
            detached,
            query,
            scope_generation: AtomicU64::new(0),
        });
        let bound: Arc<dyn SessionBound> = collection.clone();
        session.attach(Arc::downgrade(&bound));

        let cache_hit = match collection.spec.route.read::<R>(session.cache(), &collection.user) {
            Some(records) => {
                tracing::debug!(
                    "Controller[{}]: seeded {} from cache",
                    collection.spec.name,
                    records.len()
                );
                collection.tracker.replace_stream(&collection.stream, records);
                true
            }
            None => false,
        };
        let first_fetch = collection.state.handle(LoadEvent::Seeded { cache_hit });

        collection.subscribe_realtime().await;
        collection.schedule_polling();

        // The session may have detached us while the feed was opening.
        if collection.is_detached() {
            collection.abandon().await;
            return Ok(collection);
        }

        match first_fetch {
            Some(_) => collection.fetch().await,
            // Revalidate a cache seed in the background of the Ready state.
            None => collection.refresh().await,
        }
        Ok(collection)
    }

    async fn subscribe_realtime(&self) {
        let handler = RealtimeHandler {
            mode: self.spec.realtime,
            detached: self.detached.clone(),
            hinter: self.throttler.hinter(),
            tracker: self.tracker.clone(),
            stream: self.stream.clone(),
            cache: self.session.cache().clone(),
            route: self.spec.route.clone(),
            user: self.user.clone(),
        };
        self.session
            .multiplexer()
            .subscribe(
                self.subscription.clone(),
                self.spec.filters.clone(),
                move |change: &Change| handler.on_change(change),
                true,
            )
            .await;
    }

    fn schedule_polling(self: &Arc<Self>) {
        let period = self.session.config().polling.interval(self.spec.class);
        let weak: Weak<Self> = Arc::downgrade(self);
        self.poller.start(period, move || {
            let weak = weak.clone();
            async move {
                if let Some(collection) = weak.upgrade() {
                    collection.refresh().await;
                }
            }
        });
    }

    /// Silent revalidation. Never blanks the visible list.
    async fn refresh(&self) {
        if self.is_detached() {
            return;
        }
        if self.state.handle(LoadEvent::RefreshRequested).is_some() {
            self.fetch().await;
        }
    }

    /// Undo what `start` registered after a detach raced it.
    async fn abandon(&self) {
        self.poller.stop();
        self.session.multiplexer().unsubscribe(&self.subscription).await;
        tracing::debug!("Controller[{}]: detached while starting", self.spec.name);
    }

    /// Full fetch; the caller has already moved the state machine.
    async fn fetch(&self) {
        let generation = self.scope_generation.load(Ordering::SeqCst);
        let result = self.query().await;
        if self.is_detached() {
            return;
        }
        if generation != self.scope_generation.load(Ordering::SeqCst) {
            // The rescope that moved the generation fetches the new scope.
            self.state.handle(LoadEvent::FetchSucceeded);
            return;
        }

        match result {
            Ok(mut records) => {
                if let Some(order) = self.spec.order {
                    records.sort_by(order);
                }
                tracing::debug!("Controller[{}]: fetched {}", self.spec.name, records.len());
                self.spec
                    .route
                    .replace(self.session.cache(), &self.user, records.clone());
                self.tracker.replace_stream(&self.stream, records);
                self.state.set_error(None);
                self.state.handle(LoadEvent::FetchSucceeded);
            }
            Err(e) => {
                self.state.set_error(Some(e.clone()));
                self.state.handle(LoadEvent::FetchFailed { error: e.to_string() });
                self.escalate(e);
            }
        }
    }

    async fn query(&self) -> Result<Vec<R>, SyncError> {
        let predicate = self.query.read().unwrap_or_else(PoisonError::into_inner).clone();
        let rows = self.session.remote().query(R::TABLE, &predicate).await?;
        Ok(decode_rows(&self.spec.name, &rows))
    }

    /// Move the collection to a new server-side scope and refetch.
    ///
    /// Realtime filters follow the scope. A no-op when the scope is unchanged.
    async fn rescope(&self, query: Predicate, filters: Vec<TableFilter>) {
        if self.is_detached() {
            return;
        }
        {
            let mut current = self.query.write().unwrap_or_else(PoisonError::into_inner);
            if *current == query {
                return;
            }
            *current = query;
        }
        self.scope_generation.fetch_add(1, Ordering::SeqCst);
        self.session
            .multiplexer()
            .update_subscription(&self.subscription, filters);
        tracing::debug!("Controller[{}]: rescoped", self.spec.name);
        self.fetch().await;
    }

    /// Hand auth expiry to the session from a task of its own, since the
    /// session detaches this collection (and aborts its poller) in response.
    fn escalate(&self, error: SyncError) {
        if error.is_auth_expired() {
            let session = self.session.clone();
            tokio::spawn(async move { session.report(&error).await });
        }
    }

    /// Optimistically insert `placeholder`, then write it.
    async fn insert(&self, correlation: CorrelationId, placeholder: R) -> Result<R, SyncError> {
        self.ensure_attached()?;
        let row = Row::from_record(&placeholder)?;
        let result = self
            .tracker
            .perform(&self.stream, correlation, placeholder, self.mutate(Mutation::Insert(row)))
            .await;
        self.settle(result)
    }

    /// Optimistically apply `edit` to record `id`, then send `patch`.
    ///
    /// The server's row replaces the edit on success. The previous record is
    /// restored when the write fails.
    async fn update<F>(
        &self,
        id: &EntityId,
        edit: F,
        patch: serde_json::Value,
    ) -> Result<R, SyncError>
    where
        F: FnOnce(&mut R),
    {
        self.ensure_attached()?;
        let previous = self.find(id).ok_or_else(|| SyncError::NotFound {
            table: R::TABLE,
            id: id.clone(),
        })?;
        let mut edited = previous.clone();
        edit(&mut edited);
        self.tracker.apply_authoritative(&self.stream, edited);

        let result = self.mutate(Mutation::Update { id: id.clone(), patch }).await;
        if !self.is_detached() {
            match &result {
                Ok(record) => self.tracker.apply_authoritative(&self.stream, record.clone()),
                Err(_) => self.tracker.apply_authoritative(&self.stream, previous),
            };
        }
        self.settle(result)
    }

    /// Optimistically remove record `id`, then delete it remotely.
    async fn delete(&self, id: &EntityId) -> Result<(), SyncError> {
        self.ensure_attached()?;
        let removed = self.tracker.remove(&self.stream, id);
        match self.mutate(Mutation::Delete { id: id.clone() }).await {
            Ok(_) => {
                self.spec.route.remove::<R>(self.session.cache(), &self.user, id);
                Ok(())
            }
            Err(e) => {
                if let (Some(record), false) = (removed, self.is_detached()) {
                    self.tracker.apply_authoritative(&self.stream, record);
                }
                self.escalate(e.clone());
                Err(e)
            }
        }
    }

    async fn mutate(&self, mutation: Mutation) -> Result<R, SyncError> {
        self.session.remote().mutate(R::TABLE, mutation).await?.decode::<R>()
    }

    /// Merge a successful write into the cache, escalate a failed one.
    fn settle(&self, result: Result<R, SyncError>) -> Result<R, SyncError> {
        match &result {
            Ok(record) if !self.is_detached() => {
                self.spec
                    .route
                    .upsert(self.session.cache(), &self.user, vec![record.clone()]);
            }
            Ok(_) => {}
            Err(e) => self.escalate(e.clone()),
        }
        result
    }

    fn find(&self, id: &EntityId) -> Option<R> {
        self.tracker
            .items(&self.stream)
            .into_iter()
            .find(|record| record.id() == id)
    }

    fn ensure_attached(&self) -> Result<(), SyncError> {
        if self.is_detached() {
            Err(SyncError::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    fn items(&self) -> Vec<R> {
        self.state.snapshot().items
    }

    /// Pull-to-refresh: flush pending hints, then revalidate.
    async fn pull(&self) {
        self.throttler.flush_now().await;
        self.refresh().await;
    }

    async fn stop(&self) {
        if self.detached.swap(true, Ordering::SeqCst) {
            return;
        }
        self.poller.stop();
        self.throttler.shutdown();
        self.session.multiplexer().unsubscribe(&self.subscription).await;
        self.tracker.clear();
        self.state.set_error(None);
        self.state.handle(LoadEvent::Reset);
        tracing::debug!("Controller[{}]: stopped", self.spec.name);
    }
}

#[async_trait]
impl<R: Record> SessionBound for Collection<R> {
    async fn detach(&self) {
        self.stop().await;
    }
}

/// State captured by a collection's multiplexer callback.
struct RealtimeHandler<R: Record> {
    mode: RealtimeMode,
    detached: Arc<AtomicBool>,
    hinter: HintSender,
    tracker: Arc<OptimisticMutationTracker<R>>,
    stream: StreamId,
    cache: Arc<CacheStore>,
    route: CacheRoute,
    user: UserId,
}

impl<R: Record> RealtimeHandler<R> {
    fn on_change(&self, change: &Change) {
        if self.detached.load(Ordering::SeqCst) {
            return;
        }
        let Some(id) = change.entity_id() else {
            return;
        };

        match (change.event, self.mode) {
            (EventKind::Delete, _) => {
                self.tracker.remove(&self.stream, id);
                self.route.remove::<R>(&self.cache, &self.user, id);
            }
            (_, RealtimeMode::Throttled) => self.hinter.hint(id.clone()),
            (_, RealtimeMode::Direct) => {
                let Some(row) = &change.new_row else {
                    return;
                };
                match row.decode::<R>() {
                    Ok(record) => {
                        self.tracker.apply_authoritative(&self.stream, record.clone());
                        self.route.upsert(&self.cache, &self.user, vec![record]);
                    }
                    Err(e) => {
                        tracing::warn!("Realtime[{}]: skipping change for {}: {}", R::TABLE, id, e);
                    }
                }
            }
        }
    }
}

fn decode_rows<R: Record>(name: &str, rows: &[Row]) -> Vec<R> {
    rows.iter()
        .filter_map(|row| match row.decode::<R>() {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("Controller[{}]: skipping row {}: {}", name, row.id, e);
                None
            }
        })
        .collect()
}
