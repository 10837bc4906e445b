//! # vibe-sync-e2e
//!
//! End-to-end scenarios for the vibe-sync engine.
//!
//! Every scenario runs a full [`sync_client::SyncSession`] against a
//! [`sync_client::MockRemote`] and drives it the way an app would: start
//! controllers, push realtime changes, write optimistically, switch users.
//!
//! - `realtime` - multiplexer fan-out, unsubscribe, feed loss
//! - `throttle` - burst coalescing and owner routing
//! - `optimistic` - placeholder position, echo handling, rollback
//! - `cache` - TTL, owner isolation, concurrent updates
//! - `registry` - canonical entities and listeners
//! - `session` - user switch, logout and auth expiry

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assertions;
pub mod harness;

pub mod scenarios;
