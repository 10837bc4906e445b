//! Load-state machine shared by every domain controller.
//!
//! This module provides a pure, side-effect-free state machine for the
//! lifecycle of a controller's read model. The state machine takes events as
//! input and produces a new state plus a list of actions to execute.
//!
//! ```text
//! Uninitialized ──(no cache)──► Loading ──► Ready ◄──► Refreshing
//!        └────────(cache hit)────────────────┘
//! ```
//!
//! A failed fetch never leaves the machine in `Loading`: the first load
//! falls through to an empty `Ready`, a silent refresh returns to `Ready`
//! with the previous data retained. Either way the error is reported
//! out-of-band.

/// Read-model lifecycle - NO I/O, just state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Nothing seeded yet.
    Uninitialized,
    /// First fetch in progress, no usable data.
    Loading,
    /// Data is available.
    Ready,
    /// Serving Ready data while a silent fetch runs.
    Refreshing,
}

impl LoadState {
    /// Create a new state machine in the Uninitialized state.
    pub fn new() -> Self {
        Self::Uninitialized
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (sync-client)
    /// is responsible for executing the returned actions.
    pub fn on_event(self, event: LoadEvent) -> (Self, Vec<LoadAction>) {
        match (self, event) {
            // From Uninitialized
            (Self::Uninitialized, LoadEvent::Seeded { cache_hit: true }) => {
                (Self::Ready, vec![LoadAction::Publish])
            }
            (Self::Uninitialized, LoadEvent::Seeded { cache_hit: false })
            | (Self::Uninitialized, LoadEvent::RefreshRequested) => (
                Self::Loading,
                vec![LoadAction::Publish, LoadAction::Fetch { silent: false }],
            ),

            // From Loading
            (Self::Loading, LoadEvent::FetchSucceeded) => (Self::Ready, vec![LoadAction::Publish]),
            (Self::Loading, LoadEvent::FetchFailed { error }) => (
                Self::Ready,
                vec![LoadAction::Publish, LoadAction::ReportError(error)],
            ),

            // From Ready
            (Self::Ready, LoadEvent::RefreshRequested) => (
                Self::Refreshing,
                vec![LoadAction::Publish, LoadAction::Fetch { silent: true }],
            ),
            (Self::Ready, LoadEvent::FetchSucceeded) => (Self::Ready, vec![LoadAction::Publish]),

            // From Refreshing
            (Self::Refreshing, LoadEvent::FetchSucceeded) => {
                (Self::Ready, vec![LoadAction::Publish])
            }
            (Self::Refreshing, LoadEvent::FetchFailed { error }) => (
                Self::Ready,
                vec![LoadAction::Publish, LoadAction::ReportError(error)],
            ),

            // Teardown from anywhere
            (_, LoadEvent::Reset) => (Self::Uninitialized, vec![LoadAction::Publish]),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Whether renderable data is available.
    pub fn has_data(&self) -> bool {
        matches!(self, Self::Ready | Self::Refreshing)
    }

    /// Whether a fetch is currently in flight.
    pub fn is_fetching(&self) -> bool {
        matches!(self, Self::Loading | Self::Refreshing)
    }
}

impl Default for LoadState {
    fn default() -> Self {
        Self::new()
    }
}

/// Events that can occur in a controller's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadEvent {
    /// Controller started and looked in the cache.
    Seeded {
        /// Whether a fresh cache entry was found.
        cache_hit: bool,
    },
    /// A refresh was requested (poll tick, pull-to-refresh, reconnect).
    RefreshRequested,
    /// The fetch completed and its data was merged.
    FetchSucceeded,
    /// The fetch failed.
    FetchFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Controller torn down or session changed.
    Reset,
}

/// Actions to be executed by the controller.
///
/// These are instructions, not side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadAction {
    /// Fetch from the remote service.
    Fetch {
        /// `true` when existing data stays on screen during the fetch.
        silent: bool,
    },
    /// Push the current snapshot to consumers.
    Publish,
    /// Surface an error out-of-band without clearing data.
    ReportError(String),
}
