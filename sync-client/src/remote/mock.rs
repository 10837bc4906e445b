//! Mock remote data service for testing.
//!
//! Holds tables in memory, records every call for verification, lets tests
//! inject failures, hold mutations or feed opens in flight, and push changes
//! into the realtime feed.

use super::{ChangeFeed, RemoteDataService, RemoteError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use vibe_sync_types::{Change, ChangeFilter, EntityId, Mutation, Predicate, Row, Table, UserId};

/// Capacity of each mock change feed.
const FEED_CAPACITY: usize = 256;

/// Mock remote data service for testing.
///
/// Clones share state, so a test can keep one handle while the engine owns
/// another.
#[derive(Debug, Clone)]
pub struct MockRemote {
    inner: Arc<Mutex<MockRemoteInner>>,
    /// `true` while mutations may complete.
    mutation_gate: Arc<watch::Sender<bool>>,
    /// `true` while feeds may open.
    subscribe_gate: Arc<watch::Sender<bool>>,
}

#[derive(Debug, Default)]
struct MockRemoteInner {
    current_user: Option<UserId>,
    tables: HashMap<Table, Vec<Row>>,
    query_calls: Vec<(Table, Predicate)>,
    mutate_calls: Vec<(Table, Mutation)>,
    subscribe_calls: usize,
    feeds: Vec<(ChangeFilter, mpsc::Sender<Result<Change, RemoteError>>)>,
    fail_next_query: Option<RemoteError>,
    fail_next_mutate: Option<RemoteError>,
    fail_next_subscribe: Option<RemoteError>,
    echo_mutations: bool,
    next_id: u64,
}

impl MockRemote {
    /// Create a new mock with no user and empty tables.
    pub fn new() -> Self {
        let (mutation_gate, _) = watch::channel(true);
        let (subscribe_gate, _) = watch::channel(true);
        Self {
            inner: Arc::new(Mutex::new(MockRemoteInner::default())),
            mutation_gate: Arc::new(mutation_gate),
            subscribe_gate: Arc::new(subscribe_gate),
        }
    }

    /// Create a mock signed in as `user`.
    pub fn signed_in(user: &str) -> Self {
        let remote = Self::new();
        remote.set_current_user(Some(UserId::new(user)));
        remote
    }

    /// Set (or clear) the authenticated user.
    pub fn set_current_user(&self, user: Option<UserId>) {
        self.inner.lock().unwrap().current_user = user;
    }

    /// Seed a row without emitting a change.
    pub fn insert_row(&self, table: Table, row: Row) {
        let mut inner = self.inner.lock().unwrap();
        let rows = inner.tables.entry(table).or_default();
        rows.retain(|existing| existing.id != row.id);
        rows.push(row);
    }

    /// Remove a row without emitting a change.
    pub fn remove_row(&self, table: Table, id: &EntityId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let rows = inner.tables.entry(table).or_default();
        let before = rows.len();
        rows.retain(|existing| &existing.id != id);
        rows.len() != before
    }

    /// Current rows of `table`.
    pub fn rows(&self, table: Table) -> Vec<Row> {
        let inner = self.inner.lock().unwrap();
        inner.tables.get(&table).cloned().unwrap_or_default()
    }

    /// Every `query()` call so far.
    pub fn query_calls(&self) -> Vec<(Table, Predicate)> {
        self.inner.lock().unwrap().query_calls.clone()
    }

    /// Number of `query()` calls against `table`.
    pub fn query_count(&self, table: Table) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.query_calls.iter().filter(|(t, _)| *t == table).count()
    }

    /// Every `mutate()` call so far.
    pub fn mutate_calls(&self) -> Vec<(Table, Mutation)> {
        self.inner.lock().unwrap().mutate_calls.clone()
    }

    /// Number of `subscribe_changes()` calls so far.
    pub fn subscribe_calls(&self) -> usize {
        self.inner.lock().unwrap().subscribe_calls
    }

    /// Number of feeds still open.
    pub fn open_feeds(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.feeds.retain(|(_, tx)| !tx.is_closed());
        inner.feeds.len()
    }

    /// Cause the next query() to fail with the given error.
    pub fn fail_next_query(&self, error: RemoteError) {
        self.inner.lock().unwrap().fail_next_query = Some(error);
    }

    /// Cause the next mutate() to fail with the given error.
    pub fn fail_next_mutate(&self, error: RemoteError) {
        self.inner.lock().unwrap().fail_next_mutate = Some(error);
    }

    /// Cause the next subscribe_changes() to fail with the given error.
    pub fn fail_next_subscribe(&self, error: RemoteError) {
        self.inner.lock().unwrap().fail_next_subscribe = Some(error);
    }

    /// Emit a change to the feed for every successful mutation.
    pub fn echo_mutations(&self, enabled: bool) {
        self.inner.lock().unwrap().echo_mutations = enabled;
    }

    /// Block mutations until [`MockRemote::release_mutations`] is called.
    pub fn hold_mutations(&self) {
        self.mutation_gate.send_replace(false);
    }

    /// Let held mutations complete.
    pub fn release_mutations(&self) {
        self.mutation_gate.send_replace(true);
    }

    /// Block feed opens until [`MockRemote::release_subscribes`] is called.
    pub fn hold_subscribes(&self) {
        self.subscribe_gate.send_replace(false);
    }

    /// Let held feed opens complete.
    pub fn release_subscribes(&self) {
        self.subscribe_gate.send_replace(true);
    }

    /// Push a change into every open feed whose filter accepts it.
    pub fn emit(&self, change: Change) {
        let mut inner = self.inner.lock().unwrap();
        inner.feeds.retain(|(_, tx)| !tx.is_closed());
        for (filter, tx) in &inner.feeds {
            if filter.matches(&change) {
                let _ = tx.try_send(Ok(change.clone()));
            }
        }
    }

    /// Report an error on every open feed, then close them.
    pub fn fail_feeds(&self, reason: &str) {
        let mut inner = self.inner.lock().unwrap();
        for (_, tx) in inner.feeds.drain(..) {
            let _ = tx.try_send(Err(RemoteError::StreamClosed(reason.to_string())));
        }
    }

    /// Close every open feed without an error.
    pub fn close_feeds(&self) {
        self.inner.lock().unwrap().feeds.clear();
    }

    /// Clear calls, tables, feeds and injected failures.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = MockRemoteInner::default();
        self.mutation_gate.send_replace(true);
        self.subscribe_gate.send_replace(true);
    }

    fn apply_mutation(
        inner: &mut MockRemoteInner,
        table: Table,
        mutation: Mutation,
    ) -> Result<(Row, Change), RemoteError> {
        match mutation {
            Mutation::Insert(mut row) => {
                inner.next_id += 1;
                let id = EntityId::new(format!("{}-{}", table.as_str(), inner.next_id));
                row.id = id.clone();
                if let Some(object) = row.data.as_object_mut() {
                    object.insert("id".into(), serde_json::Value::String(id.to_string()));
                }
                inner.tables.entry(table).or_default().push(row.clone());
                Ok((row.clone(), Change::insert(table, row)))
            }
            Mutation::Update { id, patch } => {
                let rows = inner.tables.entry(table).or_default();
                let row = rows
                    .iter_mut()
                    .find(|row| row.id == id)
                    .ok_or_else(|| RemoteError::Rejected {
                        table,
                        reason: format!("no row {}", id),
                    })?;
                let old = row.clone();
                if let (Some(target), Some(fields)) =
                    (row.data.as_object_mut(), patch.as_object())
                {
                    for (key, value) in fields {
                        target.insert(key.clone(), value.clone());
                    }
                }
                Ok((row.clone(), Change::update(table, Some(old), row.clone())))
            }
            Mutation::Delete { id } => {
                let rows = inner.tables.entry(table).or_default();
                let index = rows
                    .iter()
                    .position(|row| row.id == id)
                    .ok_or_else(|| RemoteError::Rejected {
                        table,
                        reason: format!("no row {}", id),
                    })?;
                let removed = rows.remove(index);
                Ok((removed.clone(), Change::delete(table, removed)))
            }
        }
    }
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteDataService for MockRemote {
    async fn query(&self, table: Table, predicate: &Predicate) -> Result<Vec<Row>, RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        inner.query_calls.push((table, predicate.clone()));

        if let Some(error) = inner.fail_next_query.take() {
            return Err(error);
        }

        Ok(inner
            .tables
            .get(&table)
            .map(|rows| rows.iter().filter(|row| predicate.matches(row)).cloned().collect())
            .unwrap_or_default())
    }

    async fn mutate(&self, table: Table, mutation: Mutation) -> Result<Row, RemoteError> {
        let mut gate = self.mutation_gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let mut inner = self.inner.lock().unwrap();
        inner.mutate_calls.push((table, mutation.clone()));

        if let Some(error) = inner.fail_next_mutate.take() {
            return Err(error);
        }

        let (row, change) = Self::apply_mutation(&mut inner, table, mutation)?;
        if inner.echo_mutations {
            for (filter, tx) in &inner.feeds {
                if filter.matches(&change) {
                    let _ = tx.try_send(Ok(change.clone()));
                }
            }
        }
        Ok(row)
    }

    async fn subscribe_changes(&self, filter: &ChangeFilter) -> Result<ChangeFeed, RemoteError> {
        let mut gate = self.subscribe_gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let mut inner = self.inner.lock().unwrap();
        inner.subscribe_calls += 1;

        if let Some(error) = inner.fail_next_subscribe.take() {
            return Err(error);
        }

        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        inner.feeds.push((filter.clone(), tx));
        Ok(rx)
    }

    fn current_user_id(&self) -> Option<UserId> {
        self.inner.lock().unwrap().current_user.clone()
    }

    fn resolve_blob_url(&self, path: &str) -> String {
        format!("mock://blobs/{}", path.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: &str, owner: &str) -> Row {
        Row::new(EntityId::new(id), Some(UserId::new(owner)), json!({ "id": id }))
    }

    #[tokio::test]
    async fn query_filters_and_records_calls() {
        let remote = MockRemote::new();
        remote.insert_row(Table::Stories, row("s1", "alice"));
        remote.insert_row(Table::Stories, row("s2", "bob"));

        let rows = remote
            .query(Table::Stories, &Predicate::OwnerIn(vec![UserId::new("bob")]))
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, EntityId::new("s2"));
        assert_eq!(remote.query_count(Table::Stories), 1);
    }

    #[tokio::test]
    async fn insert_assigns_server_id() {
        let remote = MockRemote::new();
        let created = remote
            .mutate(Table::Messages, Mutation::Insert(row("local-1", "alice")))
            .await
            .unwrap();

        assert_eq!(created.id, EntityId::new("messages-1"));
        assert_eq!(created.data["id"], json!("messages-1"));
        assert_eq!(remote.rows(Table::Messages).len(), 1);
    }

    #[tokio::test]
    async fn update_merges_patch() {
        let remote = MockRemote::new();
        remote.insert_row(Table::VibeReels, row("r1", "alice"));

        let updated = remote
            .mutate(
                Table::VibeReels,
                Mutation::Update {
                    id: EntityId::new("r1"),
                    patch: json!({ "like_count": 3 }),
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.data["like_count"], json!(3));
    }

    #[tokio::test]
    async fn update_missing_row_is_rejected() {
        let remote = MockRemote::new();
        let result = remote
            .mutate(
                Table::VibeReels,
                Mutation::Update {
                    id: EntityId::new("nope"),
                    patch: json!({}),
                },
            )
            .await;
        assert!(matches!(result, Err(RemoteError::Rejected { .. })));
    }

    #[tokio::test]
    async fn emit_reaches_matching_feeds_only() {
        let remote = MockRemote::new();
        let mut all = remote.subscribe_changes(&ChangeFilter::everything()).await.unwrap();
        let mut profiles = remote
            .subscribe_changes(&ChangeFilter {
                table: Some(Table::Profiles),
                event: vibe_sync_types::EventKind::Any,
            })
            .await
            .unwrap();

        remote.emit(Change::insert(Table::Stories, row("s1", "alice")));

        assert!(all.try_recv().unwrap().is_ok());
        assert!(profiles.try_recv().is_err());
        assert_eq!(remote.subscribe_calls(), 2);
    }

    #[tokio::test]
    async fn echo_mutations_feeds_inserts() {
        let remote = MockRemote::new();
        remote.echo_mutations(true);
        let mut feed = remote.subscribe_changes(&ChangeFilter::everything()).await.unwrap();

        remote
            .mutate(Table::Messages, Mutation::Insert(row("local", "alice")))
            .await
            .unwrap();

        let change = feed.try_recv().unwrap().unwrap();
        assert_eq!(change.entity_id(), Some(&EntityId::new("messages-1")));
    }

    #[tokio::test]
    async fn forced_failures_are_one_shot() {
        let remote = MockRemote::new();
        remote.fail_next_query(RemoteError::Timeout);

        assert!(remote.query(Table::Stories, &Predicate::All).await.is_err());
        assert!(remote.query(Table::Stories, &Predicate::All).await.is_ok());
    }

    #[tokio::test]
    async fn fail_feeds_sends_error_then_closes() {
        let remote = MockRemote::new();
        let mut feed = remote.subscribe_changes(&ChangeFilter::everything()).await.unwrap();

        remote.fail_feeds("server restart");

        assert!(matches!(feed.recv().await, Some(Err(RemoteError::StreamClosed(_)))));
        assert!(feed.recv().await.is_none());
        assert_eq!(remote.open_feeds(), 0);
    }

    #[tokio::test]
    async fn held_mutations_wait_for_release() {
        let remote = MockRemote::new();
        remote.hold_mutations();

        let pending = {
            let remote = remote.clone();
            tokio::spawn(async move {
                remote
                    .mutate(Table::Messages, Mutation::Insert(row("l", "a")))
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert!(remote.mutate_calls().is_empty());

        remote.release_mutations();
        assert!(pending.await.unwrap().is_ok());
        assert_eq!(remote.mutate_calls().len(), 1);
    }

    #[tokio::test]
    async fn held_subscribes_wait_for_release() {
        let remote = MockRemote::new();
        remote.hold_subscribes();

        let pending = {
            let remote = remote.clone();
            tokio::spawn(async move { remote.subscribe_changes(&ChangeFilter::everything()).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(remote.subscribe_calls(), 0);

        remote.release_subscribes();
        let _feed = pending.await.unwrap().unwrap();
        assert_eq!(remote.open_feeds(), 1);
    }

    #[test]
    fn resolve_blob_url_is_opaque_path_join() {
        let remote = MockRemote::new();
        assert_eq!(remote.resolve_blob_url("/reels/a.mp4"), "mock://blobs/reels/a.mp4");
    }
}
