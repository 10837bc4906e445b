//! StoriesController - the story feed.
//!
//! The feed holds the session user's stories and those of accepted friends.
//! Its author scope is resolved from the friendships table at start, again
//! whenever a friendship involving the user changes on the feed, and on
//! pull-to-refresh. Rescopes run one at a time.
//!
//! Expired stories stay in the ledger until the next full fetch drops them
//! but are never published.

use super::friends::involves;
use super::{Collection, CollectionSpec, ControllerState, RealtimeMode};
use crate::cache::{CacheClass, CacheKey};
use crate::session::SyncSession;
use crate::throttle::CacheRoute;
use std::cmp::Ordering;
use std::sync::{Arc, PoisonError, Weak};
use tokio::sync::{watch, Mutex};
use vibe_sync_types::{
    now_millis, Change, EntityId, Friendship, Predicate, Story, SubscriptionId, SyncError, Table,
    TableFilter, UserId,
};

/// Multiplexer subscription that tracks the friend list.
const FRIENDS_SUBSCRIPTION: &str = "stories:friends";

/// Live view of active stories.
#[derive(Debug)]
pub struct StoriesController {
    inner: Arc<Collection<Story>>,
    rescoping: Arc<Mutex<()>>,
}

fn active(story: &Story, _: &UserId) -> bool {
    story.is_active(now_millis())
}

fn newest_first(a: &Story, b: &Story) -> Ordering {
    b.created_at.cmp(&a.created_at)
}

/// `me` plus every user with an accepted friendship with `me`, sorted.
///
/// Falls back to `me` alone when the lookup fails.
async fn feed_authors(session: &SyncSession, me: &UserId) -> Vec<UserId> {
    let accepted = Predicate::And(vec![involves(me), Predicate::field_eq("status", "accepted")]);
    let mut authors = vec![me.clone()];
    match session.remote().query(Table::Friendships, &accepted).await {
        Ok(rows) => authors.extend(
            rows.iter()
                .filter_map(|row| row.decode::<Friendship>().ok())
                .map(|friendship| friendship.other_party(me).clone()),
        ),
        Err(e) => tracing::warn!("Controller[stories]: friend lookup failed: {}", e),
    }
    authors.sort();
    authors.dedup();
    authors
}

/// Query and realtime filters for stories by `authors`.
fn author_scope(authors: &[UserId]) -> (Predicate, Vec<TableFilter>) {
    let predicate = Predicate::FieldIn {
        field: "author".into(),
        values: authors.iter().map(|a| a.as_str().into()).collect(),
    };
    let filters = vec![TableFilter::any(Table::Stories).with_predicate(predicate.clone())];
    (predicate, filters)
}

/// Re-resolve the author scope and move the collection to it.
async fn rescope(inner: &Collection<Story>, rescoping: &Mutex<()>) {
    let _serial = rescoping.lock().await;
    if inner.is_detached() {
        return;
    }
    let authors = feed_authors(&inner.session, &inner.user).await;
    let (query, filters) = author_scope(&authors);
    inner.rescope(query, filters).await;
}

impl StoriesController {
    /// Start for the session user.
    pub async fn start(session: &Arc<SyncSession>) -> Result<Self, SyncError> {
        let me = session.require_user()?;
        let (query, filters) = author_scope(&feed_authors(session, &me).await);
        let spec = CollectionSpec {
            name: "stories".into(),
            class: CacheClass::Stories,
            route: CacheRoute::Single(CacheKey::new(CacheClass::Stories, "feed")),
            query,
            filters,
            realtime: RealtimeMode::Throttled,
            visible: active,
            order: Some(newest_first),
        };
        let controller = Self {
            inner: Collection::start(session, spec).await?,
            rescoping: Arc::new(Mutex::new(())),
        };
        controller.watch_friendships().await;
        Ok(controller)
    }

    async fn watch_friendships(&self) {
        let inner: Weak<Collection<Story>> = Arc::downgrade(&self.inner);
        let rescoping = self.rescoping.clone();
        let multiplexer = self.inner.session.multiplexer();
        let id = SubscriptionId::new(FRIENDS_SUBSCRIPTION);
        let filter =
            TableFilter::any(Table::Friendships).with_predicate(involves(&self.inner.user));
        multiplexer
            .subscribe(
                id.clone(),
                vec![filter],
                move |_: &Change| {
                    let inner = inner.clone();
                    let rescoping = rescoping.clone();
                    tokio::spawn(async move {
                        if let Some(inner) = inner.upgrade() {
                            rescope(&inner, &rescoping).await;
                        }
                    });
                },
                true,
            )
            .await;
        if self.inner.is_detached() {
            multiplexer.unsubscribe(&id).await;
        }
    }

    /// Current state.
    pub fn state(&self) -> ControllerState<Story> {
        self.inner.state.snapshot()
    }

    /// Observe state changes.
    pub fn watch(&self) -> watch::Receiver<ControllerState<Story>> {
        self.inner.state.subscribe()
    }

    /// Active stories, newest first.
    pub fn stories(&self) -> Vec<Story> {
        self.inner.items()
    }

    /// Users whose stories the feed currently covers.
    pub fn authors(&self) -> Vec<UserId> {
        let query = self
            .inner
            .query
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match query {
            Predicate::FieldIn { values, .. } => values
                .iter()
                .filter_map(|v| v.as_str().map(UserId::new))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Active stories grouped by author, in feed order.
    pub fn by_author(&self) -> Vec<(UserId, Vec<Story>)> {
        let mut groups: Vec<(UserId, Vec<Story>)> = Vec::new();
        for story in self.stories() {
            match groups.iter_mut().find(|(author, _)| author == &story.author) {
                Some((_, stories)) => stories.push(story),
                None => groups.push((story.author.clone(), vec![story])),
            }
        }
        groups
    }

    /// Whether the session user has seen `story`.
    pub fn is_viewed(&self, story: &Story) -> bool {
        story.viewers.contains(&self.inner.user)
    }

    /// Record that the session user viewed story `id`.
    pub async fn mark_viewed(&self, id: &EntityId) -> Result<Story, SyncError> {
        let me = self.inner.user.clone();
        let current = self
            .stories()
            .into_iter()
            .find(|s| &s.id == id)
            .ok_or_else(|| SyncError::NotFound {
                table: Table::Stories,
                id: id.clone(),
            })?;
        if current.viewers.contains(&me) {
            return Ok(current);
        }

        let mut viewers = current.viewers.clone();
        viewers.push(me);
        let patch = serde_json::json!({ "viewers": viewers });
        self.inner.update(id, move |s| s.viewers = viewers, patch).await
    }

    /// Resolve a story's media path to a fetchable URL.
    pub fn media_url(&self, story: &Story) -> String {
        self.inner.session.remote().resolve_blob_url(&story.media_path)
    }

    /// Pull-to-refresh. Re-resolves the friend list first.
    pub async fn refresh(&self) {
        rescope(&self.inner, &self.rescoping).await;
        self.inner.pull().await;
    }

    /// Stop realtime, polling and pending fetches.
    pub async fn stop(&self) {
        self.inner.stop().await;
        self.inner
            .session
            .multiplexer()
            .unsubscribe(&SubscriptionId::new(FRIENDS_SUBSCRIPTION))
            .await;
    }
}
