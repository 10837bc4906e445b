//! ConversationsController and MessageThread.
//!
//! The conversation list is throttled like the other feeds. An open thread
//! merges message rows straight from the change feed so new messages show
//! up without a re-fetch, and polls at a short interval as a backstop.

use super::{always_visible, Collection, CollectionSpec, ControllerState, RealtimeMode};
use crate::cache::{CacheClass, CacheKey};
use crate::optimistic::local_id;
use crate::session::SyncSession;
use crate::throttle::CacheRoute;
use dashmap::DashMap;
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use vibe_sync_types::{
    now_millis, ChatMessage, Conversation, CorrelationId, EntityId, Predicate, SyncError, Table,
    TableFilter,
};

fn latest_activity_first(a: &Conversation, b: &Conversation) -> Ordering {
    b.last_message_at.cmp(&a.last_message_at)
}

fn oldest_first(a: &ChatMessage, b: &ChatMessage) -> Ordering {
    a.sent_at.cmp(&b.sent_at)
}

/// Live view of the user's conversations.
#[derive(Debug)]
pub struct ConversationsController {
    session: Arc<SyncSession>,
    inner: Arc<Collection<Conversation>>,
    threads: DashMap<EntityId, Arc<MessageThread>>,
}

impl ConversationsController {
    /// Start for the session user.
    pub async fn start(session: &Arc<SyncSession>) -> Result<Self, SyncError> {
        let me = session.require_user()?;
        let mine = Predicate::contains("participants", me.as_str());
        let spec = CollectionSpec {
            name: "conversations".into(),
            class: CacheClass::Conversations,
            route: CacheRoute::Single(CacheKey::new(CacheClass::Conversations, "list")),
            query: mine.clone(),
            filters: vec![TableFilter::any(Table::Conversations).with_predicate(mine)],
            realtime: RealtimeMode::Throttled,
            visible: always_visible,
            order: Some(latest_activity_first),
        };
        Ok(Self {
            session: session.clone(),
            inner: Collection::start(session, spec).await?,
            threads: DashMap::new(),
        })
    }

    /// Current state.
    pub fn state(&self) -> ControllerState<Conversation> {
        self.inner.state.snapshot()
    }

    /// Observe state changes.
    pub fn watch(&self) -> watch::Receiver<ControllerState<Conversation>> {
        self.inner.state.subscribe()
    }

    /// Conversations, most recent activity first.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.inner.items()
    }

    /// Open (or return the already open) message thread of `conversation`.
    pub async fn open(&self, conversation: &EntityId) -> Result<Arc<MessageThread>, SyncError> {
        if let Some(thread) = self.threads.get(conversation) {
            if !thread.inner.is_detached() {
                return Ok(thread.clone());
            }
        }
        let thread = Arc::new(MessageThread::start(&self.session, conversation).await?);
        self.threads.insert(conversation.clone(), thread.clone());
        Ok(thread)
    }

    /// Send `body` to `conversation`, opening its thread if needed.
    pub async fn send_message(
        &self,
        conversation: &EntityId,
        body: impl Into<String>,
    ) -> Result<ChatMessage, SyncError> {
        self.open(conversation).await?.send(body).await
    }

    /// Close the thread of `conversation`, if open.
    pub async fn close(&self, conversation: &EntityId) {
        if let Some((_, thread)) = self.threads.remove(conversation) {
            thread.stop().await;
        }
    }

    /// Number of open threads.
    pub fn open_threads(&self) -> usize {
        self.threads.len()
    }

    /// Pull-to-refresh.
    pub async fn refresh(&self) {
        self.inner.pull().await;
    }

    /// Stop the list and every open thread.
    pub async fn stop(&self) {
        let threads: Vec<_> = self.threads.iter().map(|entry| entry.value().clone()).collect();
        self.threads.clear();
        for thread in threads {
            thread.stop().await;
        }
        self.inner.stop().await;
    }
}

/// Messages of one conversation.
#[derive(Debug)]
pub struct MessageThread {
    conversation: EntityId,
    inner: Arc<Collection<ChatMessage>>,
}

impl MessageThread {
    /// Start a thread for `conversation`.
    pub async fn start(
        session: &Arc<SyncSession>,
        conversation: &EntityId,
    ) -> Result<Self, SyncError> {
        let in_conversation = Predicate::field_eq("conversation_id", conversation.as_str());
        let spec = CollectionSpec {
            name: format!("messages:{}", conversation),
            class: CacheClass::Messages,
            route: CacheRoute::Single(CacheKey::new(CacheClass::Messages, conversation.as_str())),
            query: in_conversation.clone(),
            filters: vec![TableFilter::any(Table::Messages).with_predicate(in_conversation)],
            realtime: RealtimeMode::Direct,
            visible: always_visible,
            order: Some(oldest_first),
        };
        Ok(Self {
            conversation: conversation.clone(),
            inner: Collection::start(session, spec).await?,
        })
    }

    /// The conversation this thread shows.
    pub fn conversation(&self) -> &EntityId {
        &self.conversation
    }

    /// Current state.
    pub fn state(&self) -> ControllerState<ChatMessage> {
        self.inner.state.snapshot()
    }

    /// Observe state changes.
    pub fn watch(&self) -> watch::Receiver<ControllerState<ChatMessage>> {
        self.inner.state.subscribe()
    }

    /// Messages, oldest first, unsent ones at the end.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.items()
    }

    /// Send `body`. It shows up at the end of the thread right away and is
    /// replaced in place by the stored message.
    pub async fn send(&self, body: impl Into<String>) -> Result<ChatMessage, SyncError> {
        let body = body.into();
        if body.trim().is_empty() {
            return Err(SyncError::Mutation {
                table: Table::Messages,
                reason: "empty message".into(),
            });
        }
        let correlation = CorrelationId::new();
        let placeholder = ChatMessage {
            id: local_id(),
            conversation_id: self.conversation.clone(),
            sender: self.inner.user.clone(),
            body,
            sent_at: now_millis(),
            client_ref: Some(correlation),
        };
        self.inner.insert(correlation, placeholder).await
    }

    /// Delete one of the thread's messages.
    pub async fn delete(&self, id: &EntityId) -> Result<(), SyncError> {
        self.inner.delete(id).await
    }

    /// Pull-to-refresh.
    pub async fn refresh(&self) {
        self.inner.pull().await;
    }

    /// Stop realtime and polling for this thread.
    pub async fn stop(&self) {
        self.inner.stop().await;
    }
}
