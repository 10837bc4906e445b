//! Error taxonomy for the sync engine.
//!
//! Each variant maps to one failure class with its own propagation rule:
//! transient network errors are swallowed and retried by the next scheduled
//! attempt, auth expiry ends the session, channel errors degrade to polling,
//! reconcile conflicts are resolved silently, and mutation errors go back to
//! the caller that started the mutation.

use crate::change::Table;
use crate::ids::{CorrelationId, EntityId};
use thiserror::Error;

/// Errors that can occur in sync engine operations.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// Network failure or timeout talking to the remote service.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// The session's credentials are no longer accepted.
    #[error("authentication expired")]
    AuthExpired,

    /// The realtime channel failed or closed.
    #[error("channel error: {0}")]
    Channel(String),

    /// An authoritative record disagreed with an optimistic placeholder.
    #[error("reconcile conflict for {correlation:?}: {reason}")]
    ReconcileConflict {
        /// Correlation of the placeholder that lost.
        correlation: CorrelationId,
        /// What disagreed.
        reason: String,
    },

    /// A local mutation was rejected by the remote service.
    #[error("mutation on {table} rejected: {reason}")]
    Mutation {
        /// Target table.
        table: Table,
        /// Rejection reason.
        reason: String,
    },

    /// A row could not be decoded into its record type.
    #[error("malformed {table} row: {reason}")]
    Decode {
        /// Source table.
        table: Table,
        /// Decoder message.
        reason: String,
    },

    /// The requested entity does not exist.
    #[error("{table} {id} not found")]
    NotFound {
        /// Source table.
        table: Table,
        /// Requested id.
        id: EntityId,
    },

    /// The session was ended while the operation was running.
    #[error("session closed")]
    SessionClosed,
}

impl SyncError {
    /// Whether the next scheduled attempt should simply retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientNetwork(_) | SyncError::Channel(_))
    }

    /// Whether the session layer must prompt for re-authentication.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, SyncError::AuthExpired)
    }
}
