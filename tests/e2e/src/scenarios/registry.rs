//! Profile registry scenarios: one canonical value, fetched once, pushed
//! to every watcher.

#[cfg(test)]
mod tests {
    use crate::harness::{advance, id, E2eHarness};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use sync_client::ProfileDirectory;
    use sync_types::{Profile, Table, UserId};

    fn profile(user: &str, name: &str) -> Profile {
        Profile {
            id: id(user),
            user_id: UserId::new(user),
            display_name: name.into(),
            avatar_path: None,
            bio: None,
        }
    }

    // =========================================================================
    // Fetching
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn concurrent_lookups_share_one_fetch() {
        let app = E2eHarness::new("alice");
        app.seed(&profile("bob", "Bob"));
        let directory = ProfileDirectory::start(&app.session).await.unwrap();
        let bob = UserId::new("bob");

        let (a, b, c) = tokio::join!(
            directory.profile(&bob),
            directory.profile(&bob),
            directory.profile(&bob)
        );

        assert_eq!(a.unwrap().display_name, "Bob");
        assert_eq!(b.unwrap(), c.unwrap());
        assert_eq!(app.remote.query_count(Table::Profiles), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_profile_is_not_cached() {
        let app = E2eHarness::new("alice");
        let directory = ProfileDirectory::start(&app.session).await.unwrap();
        let ghost = UserId::new("ghost");

        assert!(directory.profile(&ghost).await.is_err());
        app.seed(&profile("ghost", "Casper"));

        assert_eq!(directory.profile(&ghost).await.unwrap().display_name, "Casper");
    }

    // =========================================================================
    // Watching
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn realtime_update_reaches_every_watcher_once() {
        let app = E2eHarness::new("alice");
        app.seed(&profile("bob", "Bob"));
        let directory = ProfileDirectory::start(&app.session).await.unwrap();
        let bob = UserId::new("bob");
        directory.profile(&bob).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let calls = calls.clone();
            directory.watch(&bob, move |p| {
                assert_eq!(p.display_name, "Robert");
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        app.push_update(&profile("bob", "Robert"));
        advance(Duration::from_millis(10)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(directory.peek(&bob).unwrap().display_name, "Robert");
    }

    #[tokio::test(start_paused = true)]
    async fn unwatched_listener_hears_nothing() {
        let app = E2eHarness::new("alice");
        app.seed(&profile("bob", "Bob"));
        let directory = ProfileDirectory::start(&app.session).await.unwrap();
        let bob = UserId::new("bob");
        directory.profile(&bob).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let listener = {
            let calls = calls.clone();
            directory.watch(&bob, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert!(directory.unwatch(&bob, listener));

        app.push_update(&profile("bob", "Robert"));
        advance(Duration::from_millis(10)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(directory.peek(&bob).unwrap().display_name, "Robert");
    }

    #[tokio::test(start_paused = true)]
    async fn own_update_is_visible_to_watchers() {
        let app = E2eHarness::new("alice");
        app.seed(&profile("alice", "Alice"));
        let directory = ProfileDirectory::start(&app.session).await.unwrap();
        let alice = app.me();

        let seen = Arc::new(AtomicUsize::new(0));
        {
            let seen = seen.clone();
            directory.watch(&alice, move |p| {
                if p.bio.as_deref() == Some("hi") {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        let updated = directory.update_own(None, Some("hi".into())).await.unwrap();

        assert_eq!(updated.display_name, "Alice");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
