//! Optimistic write scenarios.

#[cfg(test)]
mod tests {
    use crate::assertions::{assert_unique, ids, placeholders};
    use crate::harness::{advance, id, E2eHarness};
    use std::sync::Arc;
    use std::time::Duration;
    use sync_client::{MessageThread, RemoteError};
    use sync_types::{ChatMessage, SyncError, Table, UserId};

    fn message(name: &str, sent_at: i64) -> ChatMessage {
        ChatMessage {
            id: id(name),
            conversation_id: id("c1"),
            sender: UserId::new("bob"),
            body: name.into(),
            sent_at,
            client_ref: None,
        }
    }

    async fn thread(app: &E2eHarness) -> Arc<MessageThread> {
        Arc::new(MessageThread::start(&app.session, &id("c1")).await.unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn placeholder_is_replaced_at_its_index() {
        let app = E2eHarness::new("alice");
        app.seed(&message("m1", 1));
        app.seed(&message("m2", 2));
        let thread = thread(&app).await;

        app.remote.hold_mutations();
        let send = {
            let thread = thread.clone();
            tokio::spawn(async move { thread.send("hello").await })
        };
        advance(Duration::from_millis(1)).await;
        let pending = thread.messages();
        assert_eq!(pending.len(), 3);
        assert_eq!(placeholders(&pending), 1);
        assert_eq!(pending[2].body, "hello");

        app.remote.release_mutations();
        let stored = send.await.unwrap().unwrap();
        let after = thread.messages();
        assert_eq!(after.len(), 3);
        assert_eq!(after[2].id, stored.id);
        assert_eq!(placeholders(&after), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn realtime_echo_never_duplicates() {
        let app = E2eHarness::new("alice");
        app.remote.echo_mutations(true);
        let thread = thread(&app).await;

        for n in 0..3 {
            thread.send(format!("hello {n}")).await.unwrap();
        }
        advance(Duration::from_millis(10)).await;

        let messages = thread.messages();
        assert_eq!(messages.len(), 3);
        assert_unique(&messages);
        assert_eq!(placeholders(&messages), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_sends_keep_their_order() {
        let app = E2eHarness::new("alice");
        app.remote.echo_mutations(true);
        let thread = thread(&app).await;

        app.remote.hold_mutations();
        let mut sends = Vec::new();
        for n in 0..3 {
            let thread = thread.clone();
            sends.push(tokio::spawn(async move { thread.send(format!("m{n}")).await }));
            advance(Duration::from_millis(1)).await;
        }
        app.remote.release_mutations();
        for send in sends {
            send.await.unwrap().unwrap();
        }
        advance(Duration::from_millis(10)).await;

        let bodies: Vec<_> = thread.messages().into_iter().map(|m| m.body).collect();
        assert_eq!(bodies, vec!["m0", "m1", "m2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_rolls_back_and_reports_to_caller_only() {
        let app = E2eHarness::new("alice");
        app.seed(&message("m1", 1));
        let thread = thread(&app).await;
        let mut states = thread.watch();
        states.borrow_and_update();
        app.remote.fail_next_mutate(RemoteError::Rejected {
            table: Table::Messages,
            reason: "too long".into(),
        });

        let err = thread.send("nope").await.unwrap_err();

        assert!(matches!(err, SyncError::Mutation { .. }));
        assert_eq!(ids(&thread.messages()), vec![id("m1")]);
        assert!(thread.state().last_error.is_none());
        assert!(states.has_changed().unwrap());
    }
}
