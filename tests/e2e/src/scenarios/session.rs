//! Session scenarios: user switches, logout and expired credentials.

#[cfg(test)]
mod tests {
    use crate::harness::{advance, id, E2eHarness};
    use std::time::Duration;
    use sync_client::{FriendsController, ProfileDirectory, RemoteError, SessionEvent};
    use sync_core::LoadState;
    use sync_types::{Friendship, FriendshipStatus, Profile, SyncError, UserId};

    fn friendship(fid: &str, requester: &str, addressee: &str) -> Friendship {
        Friendship {
            id: id(fid),
            requester: UserId::new(requester),
            addressee: UserId::new(addressee),
            status: FriendshipStatus::Accepted,
            created_at: 0,
            client_ref: None,
        }
    }

    fn profile(user: &str) -> Profile {
        Profile {
            id: id(user),
            user_id: UserId::new(user),
            display_name: user.to_uppercase(),
            avatar_path: None,
            bio: None,
        }
    }

    // =========================================================================
    // User switch
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn user_switch_isolates_data() {
        let app = E2eHarness::new("alice");
        app.seed(&friendship("f1", "alice", "carol"));
        app.seed(&friendship("f2", "bob", "dave"));
        let alice_friends = FriendsController::start(&app.session).await.unwrap();
        assert_eq!(alice_friends.friends(), vec![UserId::new("carol")]);

        app.sign_in_as("bob").await;

        assert!(alice_friends.all().is_empty());
        assert_eq!(alice_friends.state().phase, LoadState::Uninitialized);

        let bob_friends = FriendsController::start(&app.session).await.unwrap();
        assert_eq!(bob_friends.friends(), vec![UserId::new("dave")]);
        assert!(alice_friends.all().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_publishes_after_a_switch() {
        let app = E2eHarness::new("alice");
        let friends = FriendsController::start(&app.session).await.unwrap();
        let mut updates = friends.watch();

        // Queued in the throttler when the user changes.
        app.push_insert(&friendship("f1", "alice", "carol"));
        advance(Duration::from_millis(100)).await;
        app.sign_in_as("bob").await;
        let _ = updates.borrow_and_update();

        advance(Duration::from_secs(120)).await;

        assert!(!updates.has_changed().unwrap_or(false));
        assert!(friends.all().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn detached_controller_rejects_writes() {
        let app = E2eHarness::new("alice");
        let friends = FriendsController::start(&app.session).await.unwrap();

        app.sign_in_as("bob").await;

        let err = friends.send_request(&UserId::new("carol")).await.unwrap_err();
        assert!(matches!(err, SyncError::SessionClosed));
        assert!(app.remote.mutate_calls().is_empty());
    }

    // =========================================================================
    // Expiry and logout
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn auth_expiry_during_refresh_ends_the_session_once() {
        let app = E2eHarness::new("alice");
        app.seed(&friendship("f1", "alice", "carol"));
        let friends = FriendsController::start(&app.session).await.unwrap();
        let mut events = app.session.events();

        app.remote.fail_next_query(RemoteError::Unauthorized);
        friends.refresh().await;
        advance(Duration::from_millis(1)).await;

        match events.recv().await.unwrap() {
            SessionEvent::AuthExpired { user } => assert_eq!(user, UserId::new("alice")),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(events.try_recv().is_err());
        assert!(app.session.user().is_none());
        assert!(friends.all().is_empty());
        assert!(app.session.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn logout_clears_cache_and_registry() {
        let app = E2eHarness::new("alice");
        app.seed(&friendship("f1", "alice", "carol"));
        app.seed(&profile("carol"));
        let _friends = FriendsController::start(&app.session).await.unwrap();
        let directory = ProfileDirectory::start(&app.session).await.unwrap();
        directory.profile(&UserId::new("carol")).await.unwrap();
        assert!(!app.session.cache().is_empty());
        assert!(!app.session.profiles().is_empty());

        app.sign_out().await;

        assert!(app.session.cache().is_empty());
        assert!(app.session.profiles().is_empty());
        assert!(app.session.user().is_none());
        assert!(matches!(
            directory.profile(&UserId::new("carol")).await,
            Err(SyncError::SessionClosed)
        ));
    }
}
