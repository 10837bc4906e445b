//! # sync-client
//!
//! Client-side state synchronization engine for the Vibe social app.
//!
//! The engine keeps locally rendered lists (friends, stories, reels,
//! conversations, messages) and shared entities (profiles) consistent with
//! a remote data service while absorbing realtime bursts, hiding write
//! latency and surviving flaky connectivity.
//!
//! ## Components
//!
//! - **CacheStore**: TTL cache namespaced by session user
//! - **ChannelMultiplexer**: one realtime feed fanned out to many subscribers
//! - **ReconciliationThrottler**: debounced, batched re-fetch of hinted ids
//! - **OptimisticMutationTracker**: placeholders reconciled by correlation
//! - **GlobalEntityRegistry**: one canonical value per entity, fetch-once
//! - **PollingFallback**: lifecycle-aware interval refresh
//! - **Controllers**: friends, stories, reels, conversations, profiles
//!
//! ## Example
//!
//! ```ignore
//! use vibe_sync_client::{FriendsController, SyncConfig, SyncSession};
//!
//! let session = SyncSession::new(remote, SyncConfig::default());
//! let friends = FriendsController::start(&session).await?;
//!
//! friends.send_request(&UserId::new("bob")).await?;
//! println!("{:?}", friends.incoming());
//!
//! // Logout
//! session.end().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod channel;
pub mod cleanup;
pub mod config;
pub mod controllers;
pub mod lifecycle;
pub mod optimistic;
pub mod polling;
pub mod registry;
pub mod remote;
pub mod session;
pub mod telemetry;
pub mod throttle;

pub use cache::{CacheClass, CacheKey, CacheStore, ClassTtls};
pub use channel::{ChangeCallback, ChannelMultiplexer};
pub use cleanup::spawn_cache_sweeper;
pub use config::{ConfigError, ReconnectMode, SyncConfig};
pub use controllers::{
    ControllerState, ConversationsController, FriendsController, MessageThread, ProfileDirectory,
    ReelsController, StoriesController,
};
pub use lifecycle::{AppLifecycle, LifecycleHandle};
pub use optimistic::{local_id, OptimisticMutationTracker, LOCAL_ID_PREFIX};
pub use polling::PollingFallback;
pub use registry::{GlobalEntityRegistry, ListenerId};
pub use remote::{ChangeFeed, MockRemote, RemoteDataService, RemoteError};
pub use session::{SessionBound, SessionEvent, SyncSession};
pub use telemetry::init_tracing;
pub use throttle::{
    CacheRoute, HintSender, ReconciledBatch, ReconciliationThrottler, ThrottleSettings,
};

pub use vibe_sync_core::{ChannelState, LoadState, ReconnectPolicy};
pub use vibe_sync_types::*;
