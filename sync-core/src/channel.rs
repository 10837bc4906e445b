//! Realtime channel state machine.
//!
//! The multiplexer owns exactly one logical change feed per session. This
//! module tracks that feed's lifecycle without doing any I/O:
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected
//!      ▲               │              │
//!      └───────────────┴──────────────┘  (error / timeout / close)
//! ```
//!
//! The machine never schedules a reconnect on its own. Whether and when to
//! reconnect is decided by [`ReconnectPolicy`], owned by the session.

use std::time::Duration;

/// Channel state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    /// No feed open.
    Disconnected,
    /// Feed is being opened.
    Connecting,
    /// Feed open and delivering changes.
    Connected,
}

impl ChannelState {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self::Disconnected
    }

    /// Process an event and return the new state plus actions to execute.
    pub fn on_event(self, event: ChannelEvent) -> (Self, Vec<ChannelAction>) {
        match (self, event) {
            (Self::Disconnected, ChannelEvent::ConnectRequested) => {
                (Self::Connecting, vec![ChannelAction::OpenFeed])
            }

            (Self::Connecting, ChannelEvent::Opened) => {
                (Self::Connected, vec![ChannelAction::PublishState])
            }
            (Self::Connecting, ChannelEvent::Failed { error }) => (
                Self::Disconnected,
                vec![
                    ChannelAction::PublishState,
                    ChannelAction::ReportError(error),
                ],
            ),

            (Self::Connected, ChannelEvent::Failed { error })
            | (Self::Connected, ChannelEvent::Closed { reason: error }) => (
                Self::Disconnected,
                vec![
                    ChannelAction::CloseFeed,
                    ChannelAction::PublishState,
                    ChannelAction::ReportError(error),
                ],
            ),

            (Self::Connected, ChannelEvent::TeardownRequested)
            | (Self::Connecting, ChannelEvent::TeardownRequested) => (
                Self::Disconnected,
                vec![ChannelAction::CloseFeed, ChannelAction::PublishState],
            ),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if a feed is open or opening.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl Default for ChannelState {
    fn default() -> Self {
        Self::new()
    }
}

/// Events that can occur in the channel lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A subscription needs the feed.
    ConnectRequested,
    /// The remote service accepted the feed.
    Opened,
    /// Opening failed, or the open feed reported an error.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
    /// The feed ended.
    Closed {
        /// Reason for the close.
        reason: String,
    },
    /// Session ended.
    TeardownRequested,
}

/// Actions to be executed by the multiplexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelAction {
    /// Open the change feed.
    OpenFeed,
    /// Stop the feed pump.
    CloseFeed,
    /// Publish the new state to observers.
    PublishState,
    /// Log and surface a channel error.
    ReportError(String),
}

/// What the session does after the channel drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// Stay disconnected; polling keeps data fresh.
    #[default]
    Manual,
    /// Reconnect with capped exponential backoff.
    Backoff {
        /// Give up after this many consecutive failures.
        max_attempts: u32,
    },
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (1-based), or `None`
    /// when no further attempt should be made.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        match self {
            ReconnectPolicy::Manual => None,
            ReconnectPolicy::Backoff { max_attempts } if attempt <= *max_attempts => {
                Some(calculate_backoff(attempt))
            }
            ReconnectPolicy::Backoff { .. } => None,
        }
    }
}

/// Calculate reconnection backoff with jitter.
///
/// Formula: min(30s, 2^attempt seconds) + random(0..5000ms)
pub fn calculate_backoff(attempt: u32) -> Duration {
    let base_secs = 2u64.pow(attempt.min(5)).min(30);
    Duration::from_secs(base_secs) + Duration::from_millis(random_jitter_ms())
}

/// Random jitter between 0 and 5000 milliseconds; zero if no entropy is available.
fn random_jitter_ms() -> u64 {
    let mut bytes = [0u8; 8];
    match getrandom::getrandom(&mut bytes) {
        Ok(()) => u64::from_le_bytes(bytes) % 5001,
        Err(_) => 0,
    }
}
