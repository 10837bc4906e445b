//! Throttling scenarios: bursts of hints become one batched fetch.

#[cfg(test)]
mod tests {
    use crate::assertions::assert_unique;
    use crate::harness::{advance, id, E2eHarness};
    use std::time::Duration;
    use sync_client::cache::{CacheClass, CacheKey};
    use sync_client::{FriendsController, StoriesController, SyncConfig};
    use sync_types::{Friendship, FriendshipStatus, Predicate, Story, Table, UserId};

    fn story(name: &str, author: &str) -> Story {
        Story {
            id: id(name),
            author: UserId::new(author),
            media_path: format!("stories/{name}.jpg"),
            caption: None,
            created_at: 0,
            expires_at: i64::MAX,
            viewers: vec![],
        }
    }

    fn request(name: &str, from: &str, to: &str) -> Friendship {
        Friendship {
            id: id(name),
            requester: UserId::new(from),
            addressee: UserId::new(to),
            status: FriendshipStatus::Pending,
            created_at: 0,
            client_ref: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_within_window_is_one_fetch() {
        let app = E2eHarness::new("alice");
        app.befriend("bob");
        let stories = StoriesController::start(&app.session).await.unwrap();
        let before = app.remote.query_count(Table::Stories);

        for i in 0..20 {
            app.push_insert(&story(&format!("s{i}"), "bob"));
            advance(Duration::from_millis(10)).await;
        }
        advance(Duration::from_secs(1)).await;

        assert_eq!(app.remote.query_count(Table::Stories), before + 1);
        let (_, predicate) = app.remote.query_calls().pop().unwrap();
        assert!(matches!(predicate, Predicate::IdIn(ids) if ids.len() == 20));
        assert_eq!(stories.stories().len(), 20);
        assert_unique(&stories.stories());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_updates_of_one_row_fetch_it_once() {
        let app = E2eHarness::new("alice");
        app.befriend("bob");
        let original = story("s1", "bob");
        app.seed(&original);
        let stories = StoriesController::start(&app.session).await.unwrap();
        let before = app.remote.query_count(Table::Stories);

        for n in 0..5 {
            let mut edited = original.clone();
            edited.caption = Some(format!("edit {n}"));
            app.push_update(&edited);
        }
        advance(Duration::from_secs(1)).await;

        assert_eq!(app.remote.query_count(Table::Stories), before + 1);
        assert_eq!(stories.stories()[0].caption.as_deref(), Some("edit 4"));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_is_routed_by_owner() {
        let app = E2eHarness::new("alice");
        let _friends = FriendsController::start(&app.session).await.unwrap();

        app.push_insert(&request("out", "alice", "bob"));
        app.push_insert(&request("in1", "carol", "alice"));
        app.push_insert(&request("in2", "dave", "alice"));
        advance(Duration::from_secs(1)).await;

        let me = app.me();
        let cache = app.session.cache();
        let mine: Vec<Friendship> = cache
            .get(&CacheKey::new(CacheClass::Friends, "mine"), Some(&me), None)
            .unwrap();
        let others: Vec<Friendship> = cache
            .get(&CacheKey::new(CacheClass::Friends, "others"), Some(&me), None)
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(others.len(), 2);
        assert!(others.iter().all(|f| f.requester != me));
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_stream_is_bounded_by_max_wait() {
        let app = E2eHarness::with_config("alice", SyncConfig::default());
        app.befriend("bob");
        let stories = StoriesController::start(&app.session).await.unwrap();
        let before = app.remote.query_count(Table::Stories);

        // A hint every 200ms keeps pushing a 300ms window forward.
        for i in 0..12 {
            app.push_insert(&story(&format!("s{i}"), "bob"));
            advance(Duration::from_millis(200)).await;
        }

        assert!(app.remote.query_count(Table::Stories) > before);
        assert!(!stories.stories().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_row_leaves_list_without_fetch() {
        let app = E2eHarness::new("alice");
        app.befriend("bob");
        let gone = story("s1", "bob");
        app.seed(&gone);
        app.seed(&story("s2", "bob"));
        let stories = StoriesController::start(&app.session).await.unwrap();
        let before = app.remote.query_count(Table::Stories);

        app.push_delete(&gone);
        advance(Duration::from_secs(1)).await;

        assert_eq!(stories.stories().len(), 1);
        assert_eq!(app.remote.query_count(Table::Stories), before);
    }
}
