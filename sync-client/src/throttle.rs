//! ReconciliationThrottler - coalesce change hints into batched fetches.
//!
//! Realtime callbacks hand entity ids to [`HintSender::hint`]; a background
//! task collects them in a [`PendingHints`] set and, once the sliding
//! debounce window closes (or the wait bound is hit), runs one
//! fetch-by-ids round-trip for the whole batch:
//!
//! ```text
//! hint(a) hint(b) hint(a) ... quiet ... ──► query(IdIn[a, b]) ──► cache.update ──► sink
//! ```
//!
//! Fetched records are merged into the cache with one `update()` per key,
//! split into "mine" and "others" by the current session user. Flush errors
//! are logged and swallowed; the ids are not retried until hinted again.

use crate::cache::{CacheClass, CacheKey, CacheStore};
use crate::config::ThrottleConfig;
use crate::remote::RemoteDataService;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use vibe_sync_core::{partition_by_owner, remove_by_id, upsert_many, PendingHints};
use vibe_sync_types::{EntityId, Predicate, Record, UserId};

/// Debounce timing of one throttler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleSettings {
    /// Sliding debounce window.
    pub window: Duration,
    /// Upper bound on total wait from the first hint of a batch.
    pub max_wait: Option<Duration>,
}

impl ThrottleSettings {
    /// Settings for `class` from the throttle section of the config.
    pub fn for_class(config: &ThrottleConfig, class: CacheClass) -> Self {
        Self {
            window: config.debounce(class),
            max_wait: config.max_wait(),
        }
    }
}

/// Where a flush merges its records in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheRoute {
    /// Every record goes into one list.
    Single(CacheKey),
    /// Records owned by the session user go to `mine`, the rest to `others`.
    Split {
        /// List of the session user's own records.
        mine: CacheKey,
        /// List of everyone else's records.
        others: CacheKey,
    },
}

impl CacheRoute {
    /// Cached records for `owner`, or `None` unless every list is fresh.
    pub fn read<R: Record>(&self, cache: &CacheStore, owner: &UserId) -> Option<Vec<R>> {
        match self {
            CacheRoute::Single(key) => cache.get::<Vec<R>>(key, Some(owner), None),
            CacheRoute::Split { mine, others } => {
                let mut records = cache.get::<Vec<R>>(mine, Some(owner), None)?;
                records.extend(cache.get::<Vec<R>>(others, Some(owner), None)?);
                Some(records)
            }
        }
    }

    /// Replace the cached lists with a full authoritative fetch.
    pub fn replace<R: Record>(&self, cache: &CacheStore, owner: &UserId, records: Vec<R>) {
        match self {
            CacheRoute::Single(key) => cache.set(key, records, Some(owner)),
            CacheRoute::Split { mine, others } => {
                let (own, rest) = partition_by_owner(records, owner);
                cache.set(mine, own, Some(owner));
                cache.set(others, rest, Some(owner));
            }
        }
    }

    /// Merge records into the cached lists, one atomic update per key.
    pub fn upsert<R: Record>(&self, cache: &CacheStore, owner: &UserId, records: Vec<R>) {
        self.apply(cache, owner, records, &[]);
    }

    /// Remove `id` from the cached lists.
    pub fn remove<R: Record>(&self, cache: &CacheStore, owner: &UserId, id: &EntityId) {
        self.apply::<R>(cache, owner, Vec::new(), std::slice::from_ref(id));
    }

    fn apply<R: Record>(
        &self,
        cache: &CacheStore,
        owner: &UserId,
        records: Vec<R>,
        missing: &[EntityId],
    ) {
        match self {
            CacheRoute::Single(key) => merge_into(cache, key, owner, records, missing),
            CacheRoute::Split { mine, others } => {
                let (own, rest) = partition_by_owner(records, owner);
                merge_into(cache, mine, owner, own, missing);
                merge_into(cache, others, owner, rest, missing);
            }
        }
    }
}

/// Records produced by one flush.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledBatch<R> {
    /// Fetched records owned by the session user.
    pub mine: Vec<R>,
    /// Fetched records owned by anyone else.
    pub others: Vec<R>,
    /// Hinted ids the service no longer returns.
    pub missing: Vec<EntityId>,
}

impl<R: Record> ReconciledBatch<R> {
    /// Every fetched record, own records first.
    pub fn all(&self) -> impl Iterator<Item = &R> {
        self.mine.iter().chain(self.others.iter())
    }

    /// Number of fetched records.
    pub fn len(&self) -> usize {
        self.mine.len() + self.others.len()
    }

    /// Check if the flush fetched nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receives each flushed batch after the cache has been updated.
pub type BatchSink<R> = Arc<dyn Fn(ReconciledBatch<R>) + Send + Sync>;

enum Command {
    Hint(EntityId),
    Flush(oneshot::Sender<usize>),
}

/// Cloneable handle for feeding hints from realtime callbacks.
#[derive(Debug, Clone)]
pub struct HintSender {
    tx: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Hint(id) => write!(f, "Hint({})", id),
            Command::Flush(_) => f.write_str("Flush"),
        }
    }
}

impl HintSender {
    /// Queue `id` for the next batch. Never blocks; ignored after shutdown.
    pub fn hint(&self, id: EntityId) {
        let _ = self.tx.send(Command::Hint(id));
    }
}

struct FlushContext<R> {
    remote: Arc<dyn RemoteDataService>,
    cache: Arc<CacheStore>,
    owner: UserId,
    route: CacheRoute,
    sink: BatchSink<R>,
    closed: Arc<AtomicBool>,
}

/// Debounced, batched reconciliation for records of type `R`.
pub struct ReconciliationThrottler<R: Record> {
    hints: HintSender,
    task: JoinHandle<()>,
    closed: Arc<AtomicBool>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> std::fmt::Debug for ReconciliationThrottler<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationThrottler")
            .field("table", &R::TABLE)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl<R: Record> ReconciliationThrottler<R> {
    /// Spawn the throttler task for the session user `owner`.
    pub fn spawn(
        remote: Arc<dyn RemoteDataService>,
        cache: Arc<CacheStore>,
        owner: UserId,
        settings: ThrottleSettings,
        route: CacheRoute,
        sink: BatchSink<R>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let ctx = FlushContext {
            remote,
            cache,
            owner,
            route,
            sink,
            closed: closed.clone(),
        };
        let task = tokio::spawn(run(rx, settings, ctx));

        Self {
            hints: HintSender { tx },
            task,
            closed,
            _record: PhantomData,
        }
    }

    /// Queue `id` for the next batch.
    pub fn hint(&self, id: EntityId) {
        self.hints.hint(id);
    }

    /// A cloneable hint handle for realtime callbacks.
    pub fn hinter(&self) -> HintSender {
        self.hints.clone()
    }

    /// Flush pending hints now. Returns how many records were fetched.
    pub async fn flush_now(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.hints.tx.send(Command::Flush(reply)).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Drop pending hints and stop. No flush runs after this returns.
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Throttler[{}]: shut down", R::TABLE);
        }
        self.task.abort();
    }

    /// Whether [`ReconciliationThrottler::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl<R: Record> Drop for ReconciliationThrottler<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run<R: Record>(
    mut rx: mpsc::UnboundedReceiver<Command>,
    settings: ThrottleSettings,
    ctx: FlushContext<R>,
) {
    let mut pending = PendingHints::new(settings.window, settings.max_wait);

    loop {
        let command = match pending.deadline().map(Instant::from_std) {
            Some(deadline) => tokio::select! {
                command = rx.recv() => command,
                _ = sleep_until(deadline) => {
                    flush(&ctx, pending.take()).await;
                    continue;
                }
            },
            None => rx.recv().await,
        };

        match command {
            Some(Command::Hint(id)) => {
                pending.add(id, Instant::now().into_std());
            }
            Some(Command::Flush(reply)) => {
                let fetched = flush(&ctx, pending.take()).await;
                let _ = reply.send(fetched);
            }
            None => break,
        }
    }
}

async fn flush<R: Record>(ctx: &FlushContext<R>, ids: Vec<EntityId>) -> usize {
    if ids.is_empty() || ctx.closed.load(Ordering::SeqCst) {
        return 0;
    }
    let table = R::TABLE;
    tracing::debug!("Throttler[{}]: flushing {} ids", table, ids.len());

    let rows = match ctx.remote.query(table, &Predicate::IdIn(ids.clone())).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(
                "Throttler[{}]: flush failed, dropping {} hints: {}",
                table,
                ids.len(),
                e
            );
            return 0;
        }
    };
    if ctx.closed.load(Ordering::SeqCst) {
        return 0;
    }

    let records: Vec<R> = rows
        .iter()
        .filter_map(|row| match row.decode::<R>() {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("Throttler[{}]: skipping row {}: {}", table, row.id, e);
                None
            }
        })
        .collect();
    let missing: Vec<EntityId> = ids
        .into_iter()
        .filter(|id| !records.iter().any(|record| record.id() == id))
        .collect();

    let (mine, others) = partition_by_owner(records, &ctx.owner);
    let batch = ReconciledBatch {
        mine,
        others,
        missing,
    };
    ctx.route.apply(
        &ctx.cache,
        &ctx.owner,
        batch.all().cloned().collect(),
        &batch.missing,
    );

    let fetched = batch.len();
    tracing::debug!(
        "Throttler[{}]: merged {} records ({} missing)",
        table,
        fetched,
        batch.missing.len()
    );
    (ctx.sink)(batch);
    fetched
}

/// One atomic cache update applying the whole batch to `key`.
fn merge_into<R: Record>(
    cache: &CacheStore,
    key: &CacheKey,
    owner: &UserId,
    incoming: Vec<R>,
    missing: &[EntityId],
) {
    cache.update(
        key,
        |current: Option<Vec<R>>| {
            let mut list = current.unwrap_or_default();
            for id in missing {
                remove_by_id(&mut list, id);
            }
            upsert_many(&mut list, incoming);
            list
        },
        Some(owner),
    );
}
