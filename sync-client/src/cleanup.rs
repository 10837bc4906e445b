//! Background sweeper for stale cache entries.
//!
//! Runs `CacheStore::cleanup` every `sweep_interval_secs` while the app is
//! foregrounded, and once more each time it goes to background.

use crate::cache::CacheStore;
use crate::config::CacheConfig;
use crate::lifecycle::AppLifecycle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Spawn the cache sweeper.
///
/// The task ends when the lifecycle channel closes. Returns a handle that
/// can be used to abort it sooner.
pub fn spawn_cache_sweeper(
    cache: Arc<CacheStore>,
    config: &CacheConfig,
    mut lifecycle: watch::Receiver<AppLifecycle>,
) -> tokio::task::JoinHandle<()> {
    let period = Duration::from_secs(config.sweep_interval_secs);

    tokio::spawn(async move {
        tracing::info!("Cache sweeper started (interval: {}s)", period.as_secs());

        loop {
            if !lifecycle.borrow_and_update().is_foreground() {
                if lifecycle.changed().await.is_err() {
                    break;
                }
                continue;
            }

            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = timer.tick() => sweep(&cache, "interval"),
                    changed = lifecycle.changed() => {
                        if changed.is_err() {
                            tracing::debug!("Cache sweeper stopped");
                            return;
                        }
                        if !lifecycle.borrow_and_update().is_foreground() {
                            sweep(&cache, "background");
                            break;
                        }
                    }
                }
            }
        }

        tracing::debug!("Cache sweeper stopped");
    })
}

fn sweep(cache: &CacheStore, reason: &str) {
    let removed = cache.cleanup(None);
    if removed > 0 {
        tracing::info!("Cache sweep ({}): removed {} stale entries", reason, removed);
    } else {
        tracing::debug!("Cache sweep ({}): nothing stale", reason);
    }
}
