//! Remote data service abstraction.
//!
//! The engine never talks to a concrete backend. Everything it needs from
//! the outside world goes through [`RemoteDataService`]:
//! - `query()` / `mutate()` for request/response CRUD
//! - `subscribe_changes()` for the realtime feed consumed by the multiplexer
//! - `current_user_id()` for cache namespacing and ownership routing
//! - `resolve_blob_url()` for media paths embedded in records
//!
//! # Example
//!
//! ```ignore
//! let remote = MockRemote::new();
//! remote.set_current_user(Some(UserId::new("alice")));
//! let rows = remote.query(Table::Stories, &Predicate::All).await?;
//! ```

mod mock;

pub use mock::MockRemote;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use vibe_sync_types::{Change, ChangeFilter, Mutation, Predicate, Row, SyncError, Table, UserId};

/// Realtime feed handed out by [`RemoteDataService::subscribe_changes`].
///
/// The feed is closed when the sender side is dropped; an `Err` item reports
/// a channel failure and is followed by closure.
pub type ChangeFeed = mpsc::Receiver<Result<Change, RemoteError>>;

/// Remote service errors.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// Network failure.
    #[error("network error: {0}")]
    Network(String),

    /// Request timed out.
    #[error("request timed out")]
    Timeout,

    /// Credentials rejected.
    #[error("unauthorized")]
    Unauthorized,

    /// The service refused the request.
    #[error("{table} request rejected: {reason}")]
    Rejected {
        /// Target table.
        table: Table,
        /// Reason given by the service.
        reason: String,
    },

    /// The realtime feed closed or failed.
    #[error("change feed closed: {0}")]
    StreamClosed(String),
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Network(reason) => SyncError::TransientNetwork(reason),
            RemoteError::Timeout => SyncError::TransientNetwork("request timed out".into()),
            RemoteError::Unauthorized => SyncError::AuthExpired,
            RemoteError::Rejected { table, reason } => SyncError::Mutation { table, reason },
            RemoteError::StreamClosed(reason) => SyncError::Channel(reason),
        }
    }
}

/// The remote data service the engine synchronizes against.
///
/// Implementations handle the concrete backend (hosted database, REST, mock).
#[async_trait]
pub trait RemoteDataService: Send + Sync {
    /// Fetch every row of `table` matching `predicate`.
    async fn query(&self, table: Table, predicate: &Predicate) -> Result<Vec<Row>, RemoteError>;

    /// Apply a write and return the authoritative row.
    async fn mutate(&self, table: Table, mutation: Mutation) -> Result<Row, RemoteError>;

    /// Open a realtime change feed.
    async fn subscribe_changes(&self, filter: &ChangeFilter) -> Result<ChangeFeed, RemoteError>;

    /// The authenticated user, if any.
    fn current_user_id(&self) -> Option<UserId>;

    /// Resolve a storage path to a fetchable URL. Opaque to the engine.
    fn resolve_blob_url(&self, path: &str) -> String;
}
