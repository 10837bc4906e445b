//! Application lifecycle signal.
//!
//! The host app reports foreground/background transitions here; polling
//! and the cache sweeper watch the resulting channel.

use tokio::sync::watch;

/// Whether the application is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppLifecycle {
    /// On screen; timers run.
    #[default]
    Foreground,
    /// Off screen; timers pause.
    Background,
}

impl AppLifecycle {
    /// Check if the app is foregrounded.
    pub fn is_foreground(&self) -> bool {
        matches!(self, AppLifecycle::Foreground)
    }
}

/// Publisher side of the lifecycle signal.
#[derive(Debug)]
pub struct LifecycleHandle {
    tx: watch::Sender<AppLifecycle>,
}

impl LifecycleHandle {
    /// Start in `initial`.
    pub fn new(initial: AppLifecycle) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Report a transition. Repeating the current state is a no-op.
    pub fn set(&self, next: AppLifecycle) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            tracing::debug!("Lifecycle: now {:?}", next);
        }
    }

    /// Shorthand for `set(Foreground)`.
    pub fn foreground(&self) {
        self.set(AppLifecycle::Foreground);
    }

    /// Shorthand for `set(Background)`.
    pub fn background(&self) {
        self.set(AppLifecycle::Background);
    }

    /// Current state.
    pub fn current(&self) -> AppLifecycle {
        *self.tx.borrow()
    }

    /// Watch transitions.
    pub fn subscribe(&self) -> watch::Receiver<AppLifecycle> {
        self.tx.subscribe()
    }
}

impl Default for LifecycleHandle {
    fn default() -> Self {
        Self::new(AppLifecycle::Foreground)
    }
}
