//! E2E harness - a session wired to a mock remote service.

use std::sync::Arc;
use std::time::Duration;
use sync_client::{MockRemote, SyncConfig, SyncSession};
use sync_types::{Change, EntityId, Friendship, FriendshipStatus, Record, Row, UserId};

/// One signed-in app instance.
pub struct E2eHarness {
    /// The mock backend. Clones share state.
    pub remote: MockRemote,
    /// The session under test.
    pub session: Arc<SyncSession>,
}

impl E2eHarness {
    /// A session for `user` with default configuration.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(user: &str) -> Self {
        Self::with_config(user, SyncConfig::default())
    }

    /// A session for `user` with `config`.
    pub fn with_config(user: &str, config: SyncConfig) -> Self {
        let remote = MockRemote::signed_in(user);
        let session = SyncSession::new(Arc::new(remote.clone()), config);
        Self { remote, session }
    }

    /// The session user.
    pub fn me(&self) -> UserId {
        self.session.user().unwrap_or_else(|| UserId::new(""))
    }

    /// Store `record` server-side without notifying anyone.
    pub fn seed<R: Record>(&self, record: &R) {
        self.remote.insert_row(R::TABLE, row_of(record));
    }

    /// Store an accepted friendship between the session user and `other`.
    pub fn befriend(&self, other: &str) -> Friendship {
        let me = self.me();
        let friendship = Friendship {
            id: EntityId::new(format!("f-{}-{}", me, other)),
            requester: me,
            addressee: UserId::new(other),
            status: FriendshipStatus::Accepted,
            created_at: 0,
            client_ref: None,
        };
        self.seed(&friendship);
        friendship
    }

    /// Store `record` server-side and push an insert on the feed.
    pub fn push_insert<R: Record>(&self, record: &R) {
        let row = row_of(record);
        self.remote.insert_row(R::TABLE, row.clone());
        self.remote.emit(Change::insert(R::TABLE, row));
    }

    /// Replace `record` server-side (as another client would) and push the update.
    pub fn push_update<R: Record>(&self, record: &R) {
        let row = row_of(record);
        self.remote.insert_row(R::TABLE, row.clone());
        self.remote.emit(Change::update(R::TABLE, None, row));
    }

    /// Delete `record` server-side and push the delete.
    pub fn push_delete<R: Record>(&self, record: &R) {
        let row = row_of(record);
        self.remote.remove_row(R::TABLE, record.id());
        self.remote.emit(Change::delete(R::TABLE, row));
    }

    /// Switch the signed-in user, as the auth layer would.
    pub async fn sign_in_as(&self, user: &str) {
        tracing::info!("Harness: switching to {}", user);
        let user = UserId::new(user);
        self.remote.set_current_user(Some(user.clone()));
        self.session.switch_user(Some(user)).await;
    }

    /// Sign out.
    pub async fn sign_out(&self) {
        tracing::info!("Harness: signing out {:?}", self.session.user());
        self.remote.set_current_user(None);
        self.session.end().await;
    }
}

fn row_of<R: Record>(record: &R) -> Row {
    match Row::from_record(record) {
        Ok(row) => row,
        Err(e) => panic!("record of {} does not serialize: {}", R::TABLE, e),
    }
}

/// An id value for tests.
pub fn id(value: &str) -> EntityId {
    EntityId::new(value)
}

/// Let spawned tasks and (paused) timers run for `duration`.
pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
}
