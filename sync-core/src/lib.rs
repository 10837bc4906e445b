//! # sync-core
//!
//! Pure logic for vibe-sync (no I/O, instant tests).
//!
//! This crate implements the state machines and bookkeeping of the client
//! state engine without any network access, timers or locks, enabling fast
//! unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input (including the
//! current time) and produce output without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (remote queries, realtime feed, timers) is performed by
//! `sync-client`, which interprets the actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod merge;
pub mod optimistic;
pub mod pending;
pub mod state;

pub use channel::{calculate_backoff, ChannelAction, ChannelEvent, ChannelState, ReconnectPolicy};
pub use merge::{partition_by_owner, remove_by_id, upsert_by_id, upsert_many};
pub use optimistic::{
    ListEntry, OptimisticError, OptimisticLedger, OptimisticRecord, ReconcileOutcome,
};
pub use pending::PendingHints;
pub use state::{LoadAction, LoadEvent, LoadState};
