//! # sync-types
//!
//! Shared types for the vibe-sync client state engine.
//!
//! This crate provides the foundational types used across all vibe-sync crates:
//! - [`UserId`], [`EntityId`], [`CorrelationId`], [`StreamId`], [`SubscriptionId`] - Identity types
//! - [`Row`], [`Change`], [`Predicate`], [`TableFilter`], [`Mutation`] - The engine's view of the
//!   remote service
//! - [`Record`] and the domain records (friendships, stories, reels, conversations, messages,
//!   profiles)
//! - [`SyncError`] - Error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

mod change;
mod error;
mod ids;
mod records;

pub use change::{Change, ChangeFilter, EventKind, Mutation, Predicate, Row, Table, TableFilter};
pub use error::SyncError;
pub use ids::{CorrelationId, EntityId, StreamId, SubscriptionId, UserId};
pub use records::{
    now_millis, ChatMessage, Conversation, Friendship, FriendshipStatus, Profile, Record, Story,
    VibeReel,
};
