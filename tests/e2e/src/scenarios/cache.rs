//! Cache scenarios: TTL, owner isolation and concurrent updates.

#[cfg(test)]
mod tests {
    use crate::harness::{advance, E2eHarness};
    use std::sync::Arc;
    use std::time::Duration;
    use sync_client::cache::{CacheClass, CacheKey, CacheStore};
    use sync_client::{AppLifecycle, ClassTtls};
    use sync_types::UserId;

    fn counter_key() -> CacheKey {
        CacheKey::new(CacheClass::Messages, "counter")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_lose_nothing() {
        let cache = Arc::new(CacheStore::new(ClassTtls::default()));
        let owner = UserId::new("alice");

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let owner = owner.clone();
                tokio::spawn(async move {
                    for _ in 0..50 {
                        cache.update(
                            &counter_key(),
                            |n: Option<u64>| n.unwrap_or(0) + 1,
                            Some(&owner),
                        );
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(cache.get::<u64>(&counter_key(), Some(&owner), None), Some(400));
    }

    #[tokio::test(start_paused = true)]
    async fn user_switch_clears_only_the_departing_owner() {
        let app = E2eHarness::new("alice");
        let cache = app.session.cache();
        let alice = UserId::new("alice");
        let shared = CacheKey::new(CacheClass::Profiles, "shared");
        cache.set(&counter_key(), 1u64, Some(&alice));
        cache.set(&shared, 7u64, None);

        app.sign_in_as("bob").await;

        assert!(!cache.has(&counter_key(), Some(&alice), None));
        assert_eq!(cache.get::<u64>(&shared, None, None), Some(7));
        assert!(cache.get::<u64>(&counter_key(), Some(&UserId::new("bob")), None).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_and_are_swept() {
        let app = E2eHarness::new("alice");
        let cache = app.session.cache();
        let alice = app.me();
        // Messages live for 60s, the sweeper runs every 60s.
        cache.set(&counter_key(), 1u64, Some(&alice));

        advance(Duration::from_secs(59)).await;
        assert!(cache.has(&counter_key(), Some(&alice), None));
        assert!(!cache.has(&counter_key(), Some(&alice), Some(Duration::from_secs(30))));

        advance(Duration::from_secs(62)).await;
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn backgrounding_sweeps_immediately() {
        let app = E2eHarness::new("alice");
        let cache = app.session.cache();
        let alice = app.me();
        advance(Duration::from_secs(30)).await;
        cache.set(&counter_key(), 1u64, Some(&alice));

        // Stale at t=95 but the next interval sweep is not due until t=120.
        advance(Duration::from_secs(65)).await;
        assert_eq!(cache.len(), 1);

        app.session.lifecycle().set(AppLifecycle::Background);
        advance(Duration::from_millis(1)).await;
        assert!(cache.is_empty());
    }
}
