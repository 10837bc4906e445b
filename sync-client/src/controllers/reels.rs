//! ReelsController - the vibe-reel feed.

use super::{always_visible, Collection, CollectionSpec, ControllerState, RealtimeMode};
use crate::cache::{CacheClass, CacheKey};
use crate::session::SyncSession;
use crate::throttle::CacheRoute;
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use vibe_sync_types::{EntityId, Predicate, SyncError, Table, TableFilter, VibeReel};

/// Live view of the reel feed.
#[derive(Debug)]
pub struct ReelsController {
    inner: Arc<Collection<VibeReel>>,
}

fn newest_first(a: &VibeReel, b: &VibeReel) -> Ordering {
    b.created_at.cmp(&a.created_at)
}

impl ReelsController {
    /// Start for the session user.
    pub async fn start(session: &Arc<SyncSession>) -> Result<Self, SyncError> {
        let spec = CollectionSpec {
            name: "reels".into(),
            class: CacheClass::Reels,
            route: CacheRoute::Single(CacheKey::new(CacheClass::Reels, "feed")),
            query: Predicate::All,
            filters: vec![TableFilter::any(Table::VibeReels)],
            realtime: RealtimeMode::Throttled,
            visible: always_visible,
            order: Some(newest_first),
        };
        Ok(Self {
            inner: Collection::start(session, spec).await?,
        })
    }

    /// Current state.
    pub fn state(&self) -> ControllerState<VibeReel> {
        self.inner.state.snapshot()
    }

    /// Observe state changes.
    pub fn watch(&self) -> watch::Receiver<ControllerState<VibeReel>> {
        self.inner.state.subscribe()
    }

    /// Reels, newest first.
    pub fn reels(&self) -> Vec<VibeReel> {
        self.inner.items()
    }

    /// Toggle the session user's like on reel `id`.
    ///
    /// The count and like list flip immediately and flip back if the write
    /// is rejected.
    pub async fn like(&self, id: &EntityId) -> Result<VibeReel, SyncError> {
        let me = self.inner.user.clone();
        let mut reel = self
            .reels()
            .into_iter()
            .find(|r| &r.id == id)
            .ok_or_else(|| SyncError::NotFound {
                table: Table::VibeReels,
                id: id.clone(),
            })?;

        if reel.is_liked_by(&me) {
            reel.liked_by.retain(|u| u != &me);
            reel.like_count = reel.like_count.saturating_sub(1);
        } else {
            reel.liked_by.push(me);
            reel.like_count += 1;
        }
        let patch = serde_json::json!({
            "like_count": reel.like_count,
            "liked_by": reel.liked_by,
        });
        self.inner
            .update(
                id,
                move |r| {
                    r.like_count = reel.like_count;
                    r.liked_by = reel.liked_by;
                },
                patch,
            )
            .await
    }

    /// Resolve a reel's video path to a fetchable URL.
    pub fn media_url(&self, reel: &VibeReel) -> String {
        self.inner.session.remote().resolve_blob_url(&reel.media_path)
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
