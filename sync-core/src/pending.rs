//! Pending change hints for throttled reconciliation.
//!
//! This module provides the bookkeeping behind the debounce window:
//! - Deduplicated set of entity ids awaiting a batched fetch
//! - Sliding deadline that moves forward with every new hint
//! - Optional upper bound on total wait so a steady stream of hints
//!   cannot postpone the flush forever
//!
//! Time is always passed in, never read, so the window logic is testable
//! without a clock.

use std::collections::HashSet;
use std::time::{Duration, Instant};
use vibe_sync_types::EntityId;

/// Deduplicated set of entity ids plus the debounce deadline.
#[derive(Debug, Clone)]
pub struct PendingHints {
    /// Ids in arrival order.
    order: Vec<EntityId>,
    /// Same ids, for O(1) dedup.
    seen: HashSet<EntityId>,
    /// Arrival of the first hint in the current batch.
    first_at: Option<Instant>,
    /// Arrival of the latest hint in the current batch.
    last_at: Option<Instant>,
    /// Sliding debounce window.
    window: Duration,
    /// Upper bound on total wait, measured from the first hint.
    max_wait: Option<Duration>,
}

impl PendingHints {
    /// Create an empty set with the given window and optional wait bound.
    pub fn new(window: Duration, max_wait: Option<Duration>) -> Self {
        Self {
            order: Vec::new(),
            seen: HashSet::new(),
            first_at: None,
            last_at: None,
            window,
            max_wait,
        }
    }

    /// Record a hint for `id` arriving at `now`.
    ///
    /// Every hint slides the window, even a duplicate. Returns `true` if the
    /// id was not already pending.
    pub fn add(&mut self, id: EntityId, now: Instant) -> bool {
        if self.first_at.is_none() {
            self.first_at = Some(now);
        }
        self.last_at = Some(now);

        if self.seen.insert(id.clone()) {
            self.order.push(id);
            true
        } else {
            false
        }
    }

    /// When the batch should flush, or `None` if nothing is pending.
    pub fn deadline(&self) -> Option<Instant> {
        let last = self.last_at?;
        let sliding = last + self.window;
        match (self.max_wait, self.first_at) {
            (Some(max_wait), Some(first)) => Some(sliding.min(first + max_wait)),
            _ => Some(sliding),
        }
    }

    /// Whether the batch should flush at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline().map(|d| now >= d).unwrap_or(false)
    }

    /// Take every pending id, leaving the set empty.
    pub fn take(&mut self) -> Vec<EntityId> {
        self.seen.clear();
        self.first_at = None;
        self.last_at = None;
        std::mem::take(&mut self.order)
    }

    /// Drop every pending id.
    pub fn clear(&mut self) {
        let _ = self.take();
    }

    /// Whether `id` is pending.
    pub fn contains(&self, id: &EntityId) -> bool {
        self.seen.contains(id)
    }

    /// Number of distinct pending ids.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The debounce window.
    pub fn window(&self) -> Duration {
        self.window
    }
}
