//! FriendsController - the signed-in user's friendships and requests.
//!
//! Friendship rows are cached split by ownership: requests the user sent
//! ("mine") and rows where they are the addressee ("others"). Realtime
//! changes are batched through the throttler.

use super::{Collection, CollectionSpec, ControllerState, RealtimeMode};
use crate::cache::{CacheClass, CacheKey};
use crate::optimistic::local_id;
use crate::session::SyncSession;
use crate::throttle::CacheRoute;
use std::sync::Arc;
use tokio::sync::watch;
use vibe_sync_types::{
    now_millis, CorrelationId, EntityId, Friendship, FriendshipStatus, Predicate, SyncError, Table,
    TableFilter, UserId,
};

/// Live view of the user's friendships.
#[derive(Debug)]
pub struct FriendsController {
    inner: Arc<Collection<Friendship>>,
}

pub(super) fn involves(me: &UserId) -> Predicate {
    Predicate::Or(vec![
        Predicate::field_eq("requester", me.as_str()),
        Predicate::field_eq("addressee", me.as_str()),
    ])
}

fn newest_first(a: &Friendship, b: &Friendship) -> std::cmp::Ordering {
    b.created_at.cmp(&a.created_at)
}

fn not_declined(friendship: &Friendship, _: &UserId) -> bool {
    friendship.status != FriendshipStatus::Declined
}

impl FriendsController {
    /// Start for the session user.
    pub async fn start(session: &Arc<SyncSession>) -> Result<Self, SyncError> {
        let me = session.require_user()?;
        let spec = CollectionSpec {
            name: "friends".into(),
            class: CacheClass::Friends,
            route: CacheRoute::Split {
                mine: CacheKey::new(CacheClass::Friends, "mine"),
                others: CacheKey::new(CacheClass::Friends, "others"),
            },
            query: involves(&me),
            filters: vec![TableFilter::any(Table::Friendships).with_predicate(involves(&me))],
            realtime: RealtimeMode::Throttled,
            visible: not_declined,
            order: Some(newest_first),
        };
        Ok(Self {
            inner: Collection::start(session, spec).await?,
        })
    }

    /// Current state.
    pub fn state(&self) -> ControllerState<Friendship> {
        self.inner.state.snapshot()
    }

    /// Observe state changes.
    pub fn watch(&self) -> watch::Receiver<ControllerState<Friendship>> {
        self.inner.state.subscribe()
    }

    /// Every visible friendship row, requests included.
    pub fn all(&self) -> Vec<Friendship> {
        self.inner.items()
    }

    /// Users the session user is friends with.
    pub fn friends(&self) -> Vec<UserId> {
        self.all()
            .iter()
            .filter(|f| f.status == FriendshipStatus::Accepted)
            .map(|f| f.other_party(&self.inner.user).clone())
            .collect()
    }

    /// Pending requests addressed to the session user.
    pub fn incoming(&self) -> Vec<Friendship> {
        self.pending(|f, me| &f.addressee == me)
    }

    /// Pending requests the session user sent.
    pub fn outgoing(&self) -> Vec<Friendship> {
        self.pending(|f, me| &f.requester == me)
    }

    fn pending(&self, side: impl Fn(&Friendship, &UserId) -> bool) -> Vec<Friendship> {
        self.all()
            .into_iter()
            .filter(|f| f.status == FriendshipStatus::Pending && side(f, &self.inner.user))
            .collect()
    }

    /// Send a friend request to `to`. Visible as pending immediately.
    pub async fn send_request(&self, to: &UserId) -> Result<Friendship, SyncError> {
        if to == &self.inner.user {
            return Err(SyncError::Mutation {
                table: Table::Friendships,
                reason: "cannot befriend yourself".into(),
            });
        }
        if self
            .all()
            .iter()
            .any(|f| {
                f.other_party(&self.inner.user) == to && f.status != FriendshipStatus::Declined
            })
        {
            return Err(SyncError::Mutation {
                table: Table::Friendships,
                reason: format!("friendship with {} already exists", to),
            });
        }

        let correlation = CorrelationId::new();
        let placeholder = Friendship {
            id: local_id(),
            requester: self.inner.user.clone(),
            addressee: to.clone(),
            status: FriendshipStatus::Pending,
            created_at: now_millis(),
            client_ref: Some(correlation),
        };
        self.inner.insert(correlation, placeholder).await
    }

    /// Accept or decline an incoming request.
    pub async fn respond(&self, id: &EntityId, accept: bool) -> Result<Friendship, SyncError> {
        let status = if accept {
            FriendshipStatus::Accepted
        } else {
            FriendshipStatus::Declined
        };
        let patch = serde_json::json!({ "status": status });
        self.inner.update(id, |f| f.status = status, patch).await
    }

    /// Remove a friendship or withdraw a request.
    pub async fn remove(&self, id: &EntityId) -> Result<(), SyncError> {
        self.inner.delete(id).await
    }

    /// Pull-to-refresh.
    pub async fn refresh(&self) {
        self.inner.pull().await;
    }

    /// Stop realtime, polling and pending fetches.
    pub async fn stop(&self) {
        self.inner.stop().await;
    }
}
