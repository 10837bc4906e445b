//! PollingFallback - interval refresh while the app is foregrounded.
//!
//! Backstop for changes the realtime feed missed. Each controller owns one;
//! starting it again replaces the previous timer, so an interval is never
//! scheduled twice. Ticks pause while backgrounded and one tick runs right
//! away when the app returns to the foreground.

use crate::lifecycle::AppLifecycle;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Interval refresh bound to the app lifecycle.
#[derive(Debug)]
pub struct PollingFallback {
    name: String,
    lifecycle: watch::Receiver<AppLifecycle>,
    enabled: bool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollingFallback {
    /// Create a stopped poller. A disabled poller never ticks.
    pub fn new(
        name: impl Into<String>,
        lifecycle: watch::Receiver<AppLifecycle>,
        enabled: bool,
    ) -> Self {
        Self {
            name: name.into(),
            lifecycle,
            enabled,
            task: Mutex::new(None),
        }
    }

    /// Run `tick` every `period` while foregrounded, replacing any previous schedule.
    pub fn start<F, Fut>(&self, period: Duration, tick: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = task.take() {
            previous.abort();
        }
        if !self.enabled {
            tracing::debug!("Polling[{}]: disabled", self.name);
            return;
        }

        tracing::debug!("Polling[{}]: every {:?}", self.name, period);
        *task = Some(tokio::spawn(poll_loop(
            self.name.clone(),
            period,
            self.lifecycle.clone(),
            tick,
        )));
    }

    /// Cancel the schedule. No tick starts after this returns.
    pub fn stop(&self) {
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
            tracing::debug!("Polling[{}]: stopped", self.name);
        }
    }

    /// Whether a schedule is active.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for PollingFallback {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop<F, Fut>(
    name: String,
    period: Duration,
    mut lifecycle: watch::Receiver<AppLifecycle>,
    tick: F,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut resumed = false;

    loop {
        if !lifecycle.borrow_and_update().is_foreground() {
            tracing::debug!("Polling[{}]: paused", name);
            if lifecycle.changed().await.is_err() {
                return;
            }
            resumed = true;
            continue;
        }

        if resumed {
            tracing::debug!("Polling[{}]: resumed", name);
            tick().await;
            resumed = false;
        }

        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    tracing::trace!("Polling[{}]: tick", name);
                    tick().await;
                }
                changed = lifecycle.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if !lifecycle.borrow_and_update().is_foreground() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleHandle;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_tick(
        count: &Arc<AtomicUsize>,
    ) -> impl Fn() -> std::future::Ready<()> + Send + Sync + 'static {
        let count = count.clone();
        move || {
            count.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_on_interval() {
        let lifecycle = LifecycleHandle::default();
        let poller = PollingFallback::new("test", lifecycle.subscribe(), true);
        let count = Arc::new(AtomicUsize::new(0));

        poller.start(Duration::from_secs(10), counting_tick(&count));
        tokio::time::sleep(Duration::from_secs(35)).await;

        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_never_double_schedules() {
        let lifecycle = LifecycleHandle::default();
        let poller = PollingFallback::new("test", lifecycle.subscribe(), true);
        let count = Arc::new(AtomicUsize::new(0));

        poller.start(Duration::from_secs(10), counting_tick(&count));
        poller.start(Duration::from_secs(10), counting_tick(&count));
        poller.start(Duration::from_secs(10), counting_tick(&count));
        tokio::time::sleep(Duration::from_secs(25)).await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pauses_in_background_and_ticks_on_resume() {
        let lifecycle = LifecycleHandle::default();
        let poller = PollingFallback::new("test", lifecycle.subscribe(), true);
        let count = Arc::new(AtomicUsize::new(0));
        poller.start(Duration::from_secs(10), counting_tick(&count));

        tokio::time::sleep(Duration::from_secs(5)).await;
        lifecycle.background();
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        lifecycle.foreground();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels() {
        let lifecycle = LifecycleHandle::default();
        let poller = PollingFallback::new("test", lifecycle.subscribe(), true);
        let count = Arc::new(AtomicUsize::new(0));

        poller.start(Duration::from_secs(10), counting_tick(&count));
        poller.stop();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_poller_never_ticks() {
        let lifecycle = LifecycleHandle::default();
        let poller = PollingFallback::new("test", lifecycle.subscribe(), false);
        let count = Arc::new(AtomicUsize::new(0));

        poller.start(Duration::from_secs(1), counting_tick(&count));
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!poller.is_running());
    }
}
