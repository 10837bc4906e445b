//! Realtime scenarios: one feed, many subscribers.

#[cfg(test)]
mod tests {
    use crate::harness::{advance, id, E2eHarness};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use sync_client::config::ReconnectMode;
    use sync_client::{StoriesController, SyncConfig};
    use sync_core::ChannelState;
    use sync_types::{Change, Story, SubscriptionId, Table, TableFilter, UserId};

    fn story(name: &str) -> Story {
        Story {
            id: id(name),
            author: UserId::new("bob"),
            media_path: format!("stories/{name}.jpg"),
            caption: None,
            created_at: 0,
            expires_at: i64::MAX,
            viewers: vec![],
        }
    }

    fn counting() -> (Arc<AtomicUsize>, impl Fn(&Change) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (count, move |_: &Change| {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    // ========================================================================
    // Fan-out
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn callback_fires_once_until_unsubscribed() {
        let app = E2eHarness::new("alice");
        let mux = app.session.multiplexer();
        let (count, callback) = counting();
        mux.subscribe("watcher", vec![TableFilter::any(Table::Stories)], callback, true)
            .await;

        app.push_insert(&story("s1"));
        advance(Duration::from_millis(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(mux.unsubscribe(&SubscriptionId::new("watcher")).await);
        app.push_insert(&story("s2"));
        advance(Duration::from_millis(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn only_matching_enabled_subscribers_are_called() {
        let app = E2eHarness::new("alice");
        let mux = app.session.multiplexer();
        let (stories, on_story) = counting();
        let (messages, on_message) = counting();
        let (paused, on_paused) = counting();
        mux.subscribe("stories", vec![TableFilter::any(Table::Stories)], on_story, true)
            .await;
        mux.subscribe("messages", vec![TableFilter::any(Table::Messages)], on_message, true)
            .await;
        mux.subscribe("paused", vec![TableFilter::any(Table::Stories)], on_paused, false)
            .await;

        app.push_insert(&story("s1"));
        advance(Duration::from_millis(1)).await;

        assert_eq!(stories.load(Ordering::SeqCst), 1);
        assert_eq!(messages.load(Ordering::SeqCst), 0);
        assert_eq!(paused.load(Ordering::SeqCst), 0);
        assert_eq!(app.remote.subscribe_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_subscriber_does_not_starve_others() {
        let app = E2eHarness::new("alice");
        let mux = app.session.multiplexer();
        let (count, callback) = counting();
        mux.subscribe(
            "bad",
            vec![TableFilter::any(Table::Stories)],
            |_: &Change| panic!("subscriber bug"),
            true,
        )
        .await;
        mux.subscribe("good", vec![TableFilter::any(Table::Stories)], callback, true)
            .await;

        app.push_insert(&story("s1"));
        app.push_insert(&story("s2"));
        advance(Duration::from_millis(1)).await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(mux.state().is_connected());
    }

    // ========================================================================
    // Feed loss
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn lost_feed_degrades_to_polling() {
        let app = E2eHarness::new("alice");
        app.befriend("bob");
        let stories = StoriesController::start(&app.session).await.unwrap();

        app.remote.fail_feeds("connection reset");
        advance(Duration::from_millis(1)).await;
        assert_eq!(app.session.multiplexer().state(), ChannelState::Disconnected);

        // The change is never pushed; only the poll can find it.
        app.seed(&story("s1"));
        advance(Duration::from_secs(31)).await;

        assert_eq!(stories.stories().len(), 1);
        assert_eq!(app.remote.subscribe_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_policy_reopens_the_feed() {
        let mut config = SyncConfig::default();
        config.channel.reconnect = ReconnectMode::Backoff;
        let app = E2eHarness::with_config("alice", config);
        app.befriend("bob");
        let stories = StoriesController::start(&app.session).await.unwrap();

        app.remote.fail_feeds("connection reset");
        advance(Duration::from_secs(10)).await;

        assert!(app.session.multiplexer().state().is_connected());
        assert_eq!(app.remote.subscribe_calls(), 2);

        app.push_insert(&story("s1"));
        advance(Duration::from_secs(1)).await;
        assert_eq!(stories.stories().len(), 1);
    }
}
