//! Optimistic write ledger.
//!
//! Local mutations appear in their stream immediately as placeholders and
//! are later reconciled exactly once against the authoritative record.
//!
//! Lifecycle of one mutation:
//! 1. `begin()` - placeholder appended, correlation registered as outstanding
//! 2. `confirm()` - placeholder replaced at the same index by the server record
//! 3. or `fail()` - placeholder removed, caller restores its input
//!
//! Matching is by [`CorrelationId`] only: the outbound row carries the token
//! and so does every echo of it, whatever id the server assigned. A record
//! that arrives again after confirmation is merged by id and never appended
//! twice.

use std::collections::HashMap;
use std::time::Instant;
use thiserror::Error;
use vibe_sync_types::{CorrelationId, EntityId, Record, StreamId};

/// Ledger errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptimisticError {
    /// No outstanding mutation has this correlation.
    #[error("unknown correlation: {0}")]
    UnknownCorrelation(CorrelationId),

    /// The correlation is already outstanding.
    #[error("correlation already outstanding: {0}")]
    AlreadyOutstanding(CorrelationId),
}

/// An in-flight local mutation.
#[derive(Debug, Clone)]
pub struct OptimisticRecord<R> {
    /// Token linking the mutation to its confirmation.
    pub correlation: CorrelationId,
    /// Stream the placeholder lives in.
    pub stream: StreamId,
    /// The placeholder as shown to the user.
    pub payload: R,
    /// When the mutation began.
    pub inserted_at: Instant,
}

/// One visible entry of a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ListEntry<R> {
    /// Local placeholder awaiting confirmation.
    Pending {
        /// Correlation of the outstanding mutation.
        correlation: CorrelationId,
        /// Placeholder record.
        record: R,
    },
    /// Server-confirmed record.
    Confirmed(R),
}

impl<R> ListEntry<R> {
    /// The record, pending or not.
    pub fn record(&self) -> &R {
        match self {
            ListEntry::Pending { record, .. } => record,
            ListEntry::Confirmed(record) => record,
        }
    }

    /// Whether this entry is a placeholder.
    pub fn is_pending(&self) -> bool {
        matches!(self, ListEntry::Pending { .. })
    }

    fn is_placeholder_for(&self, correlation: &CorrelationId) -> bool {
        matches!(self, ListEntry::Pending { correlation: c, .. } if c == correlation)
    }
}

/// What happened to an authoritative record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// It replaced its placeholder at `index`.
    ReplacedPlaceholder {
        /// Final position.
        index: usize,
    },
    /// It replaced an existing confirmed record at `index` (duplicate echo or update).
    Updated {
        /// Final position.
        index: usize,
    },
    /// It was new and appended at `index`.
    Appended {
        /// Final position.
        index: usize,
    },
    /// It carried the correlation of a placeholder in another stream; the
    /// placeholder was discarded and the record placed at `index`.
    Superseded {
        /// Final position.
        index: usize,
    },
}

impl ReconcileOutcome {
    /// Final position of the record.
    pub fn index(&self) -> usize {
        match self {
            ReconcileOutcome::ReplacedPlaceholder { index }
            | ReconcileOutcome::Updated { index }
            | ReconcileOutcome::Appended { index }
            | ReconcileOutcome::Superseded { index } => *index,
        }
    }
}

/// Per-stream lists plus the outstanding mutation table.
#[derive(Debug, Clone)]
pub struct OptimisticLedger<R> {
    streams: HashMap<StreamId, Vec<ListEntry<R>>>,
    outstanding: HashMap<CorrelationId, OptimisticRecord<R>>,
}

impl<R: Record> OptimisticLedger<R> {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self {
            streams: HashMap::new(),
            outstanding: HashMap::new(),
        }
    }

    /// Append a placeholder to `stream` and register it as outstanding.
    ///
    /// Returns the placeholder's index.
    pub fn begin(
        &mut self,
        stream: StreamId,
        correlation: CorrelationId,
        placeholder: R,
        now: Instant,
    ) -> Result<usize, OptimisticError> {
        if self.outstanding.contains_key(&correlation) {
            return Err(OptimisticError::AlreadyOutstanding(correlation));
        }

        let list = self.streams.entry(stream.clone()).or_default();
        list.push(ListEntry::Pending {
            correlation,
            record: placeholder.clone(),
        });
        let index = list.len() - 1;

        self.outstanding.insert(
            correlation,
            OptimisticRecord {
                correlation,
                stream,
                payload: placeholder,
                inserted_at: now,
            },
        );
        Ok(index)
    }

    /// Reconcile the mutation `correlation` with its authoritative record.
    ///
    /// If the correlation was already reconciled (the echo beat the direct
    /// response), the record is merged by id instead, which is a no-op for an
    /// identical record.
    pub fn confirm(
        &mut self,
        stream: &StreamId,
        correlation: CorrelationId,
        authoritative: R,
    ) -> ReconcileOutcome {
        match self.outstanding.remove(&correlation) {
            Some(record) if &record.stream == stream => {
                self.replace_placeholder(stream, &correlation, authoritative)
            }
            Some(record) => {
                // Authoritative wins; the placeholder in the other stream is dropped.
                self.drop_placeholder(&record.stream, &correlation);
                let index = self.upsert_confirmed(stream, authoritative).index();
                ReconcileOutcome::Superseded { index }
            }
            None => self.upsert_confirmed(stream, authoritative),
        }
    }

    /// Merge an authoritative record that arrived from the feed, a batch
    /// fetch or a poll.
    ///
    /// Records carrying the correlation of an outstanding mutation reconcile
    /// that mutation; everything else is an upsert by id.
    pub fn apply_authoritative(&mut self, stream: &StreamId, authoritative: R) -> ReconcileOutcome {
        match authoritative.correlation() {
            Some(correlation) if self.outstanding.contains_key(&correlation) => {
                self.confirm(stream, correlation, authoritative)
            }
            _ => self.upsert_confirmed(stream, authoritative),
        }
    }

    /// Replace a stream's confirmed contents with a full authoritative list.
    ///
    /// Outstanding placeholders whose correlation appears in the list are
    /// reconciled; the rest stay at the end in their original order. Returns
    /// the number of mutations reconciled.
    pub fn replace_stream(&mut self, stream: &StreamId, authoritative: Vec<R>) -> usize {
        let mut reconciled = 0;
        for record in &authoritative {
            if let Some(correlation) = record.correlation() {
                if self
                    .outstanding
                    .get(&correlation)
                    .map(|r| &r.stream == stream)
                    .unwrap_or(false)
                {
                    self.outstanding.remove(&correlation);
                    reconciled += 1;
                }
            }
        }

        let still_pending: Vec<ListEntry<R>> = self
            .streams
            .remove(stream)
            .unwrap_or_default()
            .into_iter()
            .filter(|entry| match entry {
                ListEntry::Pending { correlation, .. } => {
                    self.outstanding.contains_key(correlation)
                }
                ListEntry::Confirmed(_) => false,
            })
            .collect();

        let mut list: Vec<ListEntry<R>> =
            authoritative.into_iter().map(ListEntry::Confirmed).collect();
        list.extend(still_pending);
        self.streams.insert(stream.clone(), list);
        reconciled
    }

    /// Abandon a failed mutation, removing its placeholder.
    pub fn fail(
        &mut self,
        correlation: CorrelationId,
    ) -> Result<OptimisticRecord<R>, OptimisticError> {
        let record = self
            .outstanding
            .remove(&correlation)
            .ok_or(OptimisticError::UnknownCorrelation(correlation))?;
        self.drop_placeholder(&record.stream, &correlation);
        Ok(record)
    }

    /// Remove a confirmed record (server-side delete).
    pub fn remove(&mut self, stream: &StreamId, id: &EntityId) -> Option<R> {
        let list = self.streams.get_mut(stream)?;
        let index = list
            .iter()
            .position(|entry| !entry.is_pending() && entry.record().id() == id)?;
        match list.remove(index) {
            ListEntry::Confirmed(record) => Some(record),
            ListEntry::Pending { record, .. } => Some(record),
        }
    }

    /// Visible records of `stream`, placeholders included.
    pub fn items(&self, stream: &StreamId) -> Vec<R> {
        self.streams
            .get(stream)
            .map(|list| list.iter().map(|entry| entry.record().clone()).collect())
            .unwrap_or_default()
    }

    /// Entries of `stream` with their pending flag.
    pub fn entries(&self, stream: &StreamId) -> &[ListEntry<R>] {
        self.streams.get(stream).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The outstanding mutation for `correlation`, if any.
    pub fn outstanding(&self, correlation: &CorrelationId) -> Option<&OptimisticRecord<R>> {
        self.outstanding.get(correlation)
    }

    /// Whether `correlation` is still awaiting confirmation.
    pub fn is_outstanding(&self, correlation: &CorrelationId) -> bool {
        self.outstanding.contains_key(correlation)
    }

    /// Number of outstanding mutations across all streams.
    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }

    /// Forget a stream and its outstanding mutations.
    pub fn clear_stream(&mut self, stream: &StreamId) {
        self.streams.remove(stream);
        self.outstanding.retain(|_, record| &record.stream != stream);
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.streams.clear();
        self.outstanding.clear();
    }

    fn replace_placeholder(
        &mut self,
        stream: &StreamId,
        correlation: &CorrelationId,
        authoritative: R,
    ) -> ReconcileOutcome {
        let list = self.streams.entry(stream.clone()).or_default();
        let placeholder = list.iter().position(|e| e.is_placeholder_for(correlation));
        let existing = list
            .iter()
            .position(|e| !e.is_pending() && e.record().id() == authoritative.id());

        match (placeholder, existing) {
            (Some(p), None) => {
                list[p] = ListEntry::Confirmed(authoritative);
                ReconcileOutcome::ReplacedPlaceholder { index: p }
            }
            (Some(p), Some(e)) => {
                // Already merged once without its correlation; keep the placeholder's slot.
                list[p] = ListEntry::Confirmed(authoritative);
                list.remove(e);
                let index = if e < p { p - 1 } else { p };
                ReconcileOutcome::ReplacedPlaceholder { index }
            }
            (None, _) => self.upsert_confirmed(stream, authoritative),
        }
    }

    fn upsert_confirmed(&mut self, stream: &StreamId, authoritative: R) -> ReconcileOutcome {
        let list = self.streams.entry(stream.clone()).or_default();
        match list
            .iter()
            .position(|e| !e.is_pending() && e.record().id() == authoritative.id())
        {
            Some(index) => {
                list[index] = ListEntry::Confirmed(authoritative);
                ReconcileOutcome::Updated { index }
            }
            None => {
                list.push(ListEntry::Confirmed(authoritative));
                ReconcileOutcome::Appended {
                    index: list.len() - 1,
                }
            }
        }
    }

    fn drop_placeholder(&mut self, stream: &StreamId, correlation: &CorrelationId) {
        if let Some(list) = self.streams.get_mut(stream) {
            list.retain(|entry| !entry.is_placeholder_for(correlation));
        }
    }
}

impl<R: Record> Default for OptimisticLedger<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vibe_sync_types::{ChatMessage, UserId};

    fn stream() -> StreamId {
        StreamId::new("conv-1")
    }

    fn msg(id: &str, body: &str, correlation: Option<CorrelationId>) -> ChatMessage {
        ChatMessage {
            id: EntityId::new(id),
            conversation_id: EntityId::new("conv-1"),
            sender: UserId::new("me"),
            body: body.into(),
            sent_at: 0,
            client_ref: correlation,
        }
    }

    fn ledger_with_history() -> OptimisticLedger<ChatMessage> {
        let mut ledger = OptimisticLedger::new();
        ledger.replace_stream(&stream(), vec![msg("m1", "hello", None), msg("m2", "hey", None)]);
        ledger
    }

    #[test]
    fn begin_appends_placeholder() {
        let mut ledger = ledger_with_history();
        let c = CorrelationId::new();

        let index = ledger
            .begin(stream(), c, msg("local-1", "yo", Some(c)), Instant::now())
            .unwrap();

        assert_eq!(index, 2);
        assert_eq!(ledger.items(&stream()).len(), 3);
        assert!(ledger.entries(&stream())[2].is_pending());
        assert!(ledger.is_outstanding(&c));
    }

    #[test]
    fn begin_rejects_reused_correlation() {
        let mut ledger = OptimisticLedger::new();
        let c = CorrelationId::new();
        ledger.begin(stream(), c, msg("l1", "a", Some(c)), Instant::now()).unwrap();
        let again = ledger.begin(stream(), c, msg("l2", "b", Some(c)), Instant::now());
        assert_eq!(again, Err(OptimisticError::AlreadyOutstanding(c)));
    }

    #[test]
    fn confirm_replaces_in_place() {
        let mut ledger = ledger_with_history();
        let c = CorrelationId::new();
        ledger.begin(stream(), c, msg("local-1", "yo", Some(c)), Instant::now()).unwrap();

        let outcome = ledger.confirm(&stream(), c, msg("m3", "yo", Some(c)));

        assert_eq!(outcome, ReconcileOutcome::ReplacedPlaceholder { index: 2 });
        let items = ledger.items(&stream());
        assert_eq!(items.len(), 3);
        assert_eq!(items[2].id, EntityId::new("m3"));
        assert_eq!(items[2].body, "yo");
        assert!(!ledger.is_outstanding(&c));
    }

    #[test]
    fn placeholder_keeps_position_when_later_records_arrive() {
        let mut ledger = ledger_with_history();
        let c = CorrelationId::new();
        ledger.begin(stream(), c, msg("local-1", "mine", Some(c)), Instant::now()).unwrap();

        // Someone else's message lands after our placeholder.
        ledger.apply_authoritative(&stream(), msg("m4", "theirs", None));
        let outcome = ledger.confirm(&stream(), c, msg("m3", "mine", Some(c)));

        assert_eq!(outcome.index(), 2);
        let ids: Vec<_> = ledger.items(&stream()).into_iter().map(|m| m.id).collect();
        assert_eq!(
            ids,
            vec![EntityId::new("m1"), EntityId::new("m2"), EntityId::new("m3"), EntityId::new("m4")]
        );
    }

    #[test]
    fn echo_then_direct_response_never_duplicates() {
        let mut ledger = ledger_with_history();
        let c = CorrelationId::new();
        ledger.begin(stream(), c, msg("local-1", "yo", Some(c)), Instant::now()).unwrap();

        // Realtime echo first.
        let first = ledger.apply_authoritative(&stream(), msg("m3", "yo", Some(c)));
        assert_eq!(first, ReconcileOutcome::ReplacedPlaceholder { index: 2 });

        // Then the direct response for the same mutation.
        let second = ledger.confirm(&stream(), c, msg("m3", "yo", Some(c)));
        assert_eq!(second, ReconcileOutcome::Updated { index: 2 });
        assert_eq!(ledger.items(&stream()).len(), 3);
    }

    #[test]
    fn uncorrelated_echo_then_confirm_collapses_to_one_entry() {
        let mut ledger = ledger_with_history();
        let c = CorrelationId::new();
        ledger.begin(stream(), c, msg("local-1", "yo", Some(c)), Instant::now()).unwrap();

        // Echo without the token gets appended by id.
        ledger.apply_authoritative(&stream(), msg("m3", "yo", None));
        assert_eq!(ledger.items(&stream()).len(), 4);

        let outcome = ledger.confirm(&stream(), c, msg("m3", "yo", Some(c)));
        assert_eq!(outcome, ReconcileOutcome::ReplacedPlaceholder { index: 2 });
        assert_eq!(ledger.items(&stream()).len(), 3);
    }

    #[test]
    fn fail_removes_placeholder() {
        let mut ledger = ledger_with_history();
        let c = CorrelationId::new();
        ledger.begin(stream(), c, msg("local-1", "oops", Some(c)), Instant::now()).unwrap();

        let record = ledger.fail(c).unwrap();

        assert_eq!(record.payload.body, "oops");
        assert_eq!(ledger.items(&stream()).len(), 2);
        assert_eq!(ledger.outstanding_count(), 0);
        assert_eq!(ledger.fail(c).unwrap_err(), OptimisticError::UnknownCorrelation(c));
    }

    #[test]
    fn replace_stream_keeps_unconfirmed_placeholders() {
        let mut ledger = ledger_with_history();
        let c1 = CorrelationId::new();
        let c2 = CorrelationId::new();
        ledger.begin(stream(), c1, msg("local-1", "one", Some(c1)), Instant::now()).unwrap();
        ledger.begin(stream(), c2, msg("local-2", "two", Some(c2)), Instant::now()).unwrap();

        let reconciled = ledger.replace_stream(
            &stream(),
            vec![
                msg("m1", "hello", None),
                msg("m2", "hey", None),
                msg("m3", "one", Some(c1)),
            ],
        );

        assert_eq!(reconciled, 1);
        let items = ledger.items(&stream());
        assert_eq!(items.len(), 4);
        assert_eq!(items[3].id, EntityId::new("local-2"));
        assert!(ledger.is_outstanding(&c2));
        assert!(!ledger.is_outstanding(&c1));
    }

    #[test]
    fn correlation_from_other_stream_supersedes_placeholder() {
        let mut ledger = OptimisticLedger::new();
        let other = StreamId::new("conv-2");
        let c = CorrelationId::new();
        ledger.begin(other.clone(), c, msg("local-1", "x", Some(c)), Instant::now()).unwrap();

        let outcome = ledger.apply_authoritative(&stream(), msg("m9", "x", Some(c)));

        assert_eq!(outcome, ReconcileOutcome::Superseded { index: 0 });
        assert!(ledger.items(&other).is_empty());
        assert_eq!(ledger.items(&stream()).len(), 1);
    }

    #[test]
    fn remove_only_touches_confirmed() {
        let mut ledger = ledger_with_history();
        assert!(ledger.remove(&stream(), &EntityId::new("m1")).is_some());
        assert_eq!(ledger.items(&stream()).len(), 1);
        assert!(ledger.remove(&StreamId::new("nope"), &EntityId::new("m1")).is_none());
    }

    #[test]
    fn clear_stream_drops_its_outstanding() {
        let mut ledger = ledger_with_history();
        let c = CorrelationId::new();
        ledger.begin(stream(), c, msg("local", "x", Some(c)), Instant::now()).unwrap();

        ledger.clear_stream(&stream());

        assert!(ledger.items(&stream()).is_empty());
        assert!(!ledger.is_outstanding(&c));
    }
}
