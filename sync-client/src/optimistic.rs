//! OptimisticMutationTracker - thread-safe front for the optimistic ledger.
//!
//! Wraps [`OptimisticLedger`] from sync-core and reports every change of a
//! stream's visible list to an `on_change` callback, which controllers use
//! to project placeholders into their published state.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use vibe_sync_core::{ListEntry, OptimisticError, OptimisticLedger, ReconcileOutcome};
use vibe_sync_types::{CorrelationId, EntityId, Record, StreamId, SyncError};

/// Called with a stream's visible records after every change to it.
pub type StreamListener<R> = Arc<dyn Fn(&StreamId, Vec<R>) + Send + Sync>;

/// Prefix of ids given to placeholders before the server assigns one.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// A fresh placeholder id.
pub fn local_id() -> EntityId {
    EntityId::new(format!("{}{}", LOCAL_ID_PREFIX, uuid::Uuid::new_v4()))
}

/// Tracks in-flight local writes per stream.
pub struct OptimisticMutationTracker<R: Record> {
    ledger: Mutex<OptimisticLedger<R>>,
    on_change: StreamListener<R>,
}

impl<R: Record> std::fmt::Debug for OptimisticMutationTracker<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimisticMutationTracker")
            .field("table", &R::TABLE)
            .field("outstanding", &self.outstanding_count())
            .finish()
    }
}

impl<R: Record> OptimisticMutationTracker<R> {
    /// Create a tracker reporting to `on_change`.
    pub fn new(on_change: StreamListener<R>) -> Self {
        Self {
            ledger: Mutex::new(OptimisticLedger::new()),
            on_change,
        }
    }

    /// A tracker nobody listens to.
    pub fn detached() -> Self {
        Self::new(Arc::new(|_: &StreamId, _: Vec<R>| {}))
    }

    fn ledger(&self) -> MutexGuard<'_, OptimisticLedger<R>> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on the ledger, then publish `stream`.
    ///
    /// Publishing happens under the ledger lock so listeners observe lists in
    /// the order the ledger produced them.
    fn with_stream<T>(
        &self,
        stream: &StreamId,
        f: impl FnOnce(&mut OptimisticLedger<R>) -> T,
    ) -> T {
        let mut ledger = self.ledger();
        let result = f(&mut ledger);
        (self.on_change)(stream, ledger.items(stream));
        result
    }

    /// Show `placeholder` at the end of `stream` until `correlation` resolves.
    pub fn begin(
        &self,
        stream: &StreamId,
        correlation: CorrelationId,
        placeholder: R,
    ) -> Result<usize, SyncError> {
        let now = Instant::now().into_std();
        let index = self
            .with_stream(stream, |ledger| {
                ledger.begin(stream.clone(), correlation, placeholder, now)
            })
            .map_err(|e| SyncError::ReconcileConflict {
                correlation,
                reason: e.to_string(),
            })?;
        tracing::debug!(
            "Optimistic[{}]: begin {:?} on {} at {}",
            R::TABLE,
            correlation,
            stream,
            index
        );
        Ok(index)
    }

    /// Replace the placeholder of `correlation` with its authoritative record.
    pub fn confirm(
        &self,
        stream: &StreamId,
        correlation: CorrelationId,
        authoritative: R,
    ) -> ReconcileOutcome {
        let outcome = self.with_stream(stream, |ledger| {
            ledger.confirm(stream, correlation, authoritative)
        });
        log_outcome::<R>(correlation, outcome);
        outcome
    }

    /// Remove the placeholder of a failed mutation and hand back `error`.
    ///
    /// The returned error goes to the initiating caller only.
    pub fn fail(&self, correlation: CorrelationId, error: SyncError) -> SyncError {
        let mut ledger = self.ledger();
        match ledger.fail(correlation) {
            Ok(record) => {
                tracing::debug!(
                    "Optimistic[{}]: {:?} failed after {:?}: {}",
                    R::TABLE,
                    correlation,
                    record.inserted_at.elapsed(),
                    error
                );
                (self.on_change)(&record.stream, ledger.items(&record.stream));
            }
            Err(OptimisticError::UnknownCorrelation(_))
            | Err(OptimisticError::AlreadyOutstanding(_)) => {
                tracing::debug!("Optimistic[{}]: fail for unknown {:?}", R::TABLE, correlation);
            }
        }
        error
    }

    /// Merge a record from the feed, a batch fetch or a poll.
    pub fn apply_authoritative(&self, stream: &StreamId, record: R) -> ReconcileOutcome {
        let correlation = record.correlation();
        let outcome =
            self.with_stream(stream, |ledger| ledger.apply_authoritative(stream, record));
        if let Some(correlation) = correlation {
            log_outcome::<R>(correlation, outcome);
        }
        outcome
    }

    /// Replace the confirmed part of `stream` with a full list.
    ///
    /// Unconfirmed placeholders stay visible at the end.
    pub fn replace_stream(&self, stream: &StreamId, records: Vec<R>) -> usize {
        self.with_stream(stream, |ledger| ledger.replace_stream(stream, records))
    }

    /// Remove a confirmed record (server-side delete).
    pub fn remove(&self, stream: &StreamId, id: &EntityId) -> Option<R> {
        self.with_stream(stream, |ledger| ledger.remove(stream, id))
    }

    /// Run a whole optimistic write.
    ///
    /// Shows `placeholder` immediately, awaits `mutation` and reconciles the
    /// outcome. On failure the placeholder is gone and the error is returned.
    pub async fn perform<Fut>(
        &self,
        stream: &StreamId,
        correlation: CorrelationId,
        placeholder: R,
        mutation: Fut,
    ) -> Result<R, SyncError>
    where
        Fut: Future<Output = Result<R, SyncError>>,
    {
        self.begin(stream, correlation, placeholder)?;
        match mutation.await {
            Ok(authoritative) => {
                self.confirm(stream, correlation, authoritative.clone());
                Ok(authoritative)
            }
            Err(e) => Err(self.fail(correlation, e)),
        }
    }

    /// Visible records of `stream`, placeholders included.
    pub fn items(&self, stream: &StreamId) -> Vec<R> {
        self.ledger().items(stream)
    }

    /// Visible entries of `stream` with their pending flag.
    pub fn entries(&self, stream: &StreamId) -> Vec<ListEntry<R>> {
        self.ledger().entries(stream).to_vec()
    }

    /// Whether `correlation` still awaits confirmation.
    pub fn is_outstanding(&self, correlation: &CorrelationId) -> bool {
        self.ledger().is_outstanding(correlation)
    }

    /// Number of in-flight mutations across all streams.
    pub fn outstanding_count(&self) -> usize {
        self.ledger().outstanding_count()
    }

    /// Forget a stream.
    pub fn clear_stream(&self, stream: &StreamId) {
        self.ledger().clear_stream(stream);
    }

    /// Forget everything.
    pub fn clear(&self) {
        self.ledger().clear();
    }
}

fn log_outcome<R: Record>(correlation: CorrelationId, outcome: ReconcileOutcome) {
    match outcome {
        ReconcileOutcome::ReplacedPlaceholder { index } => {
            tracing::debug!("Optimistic[{}]: {:?} confirmed at {}", R::TABLE, correlation, index);
        }
        ReconcileOutcome::Superseded { index } => {
            let conflict = SyncError::ReconcileConflict {
                correlation,
                reason: "confirmed in another stream".into(),
            };
            tracing::debug!(
                "Optimistic[{}]: {} (kept server record at {})",
                R::TABLE,
                conflict,
                index
            );
        }
        ReconcileOutcome::Updated { .. } | ReconcileOutcome::Appended { .. } => {}
    }
}
