//! ProfileDirectory - canonical user profiles.
//!
//! Profiles appear all over the app (friend rows, story headers, message
//! senders), so they live in the session's [`GlobalEntityRegistry`] rather
//! than in a list. Every screen showing a user reads the same value and
//! hears about every update to it.
//!
//! [`GlobalEntityRegistry`]: crate::registry::GlobalEntityRegistry

use crate::cache::{CacheClass, CacheKey};
use crate::polling::PollingFallback;
use crate::registry::ListenerId;
use crate::session::{SessionBound, SyncSession};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use vibe_sync_types::{
    Change, EntityId, EventKind, Mutation, Predicate, Profile, SubscriptionId, SyncError, Table,
    TableFilter, UserId,
};

const SUBSCRIPTION: &str = "profiles";

fn cache_key(user: &UserId) -> CacheKey {
    CacheKey::new(CacheClass::Profiles, user.as_str())
}

/// Cache first, then the remote service.
async fn fetch_profile(
    session: &SyncSession,
    viewer: &UserId,
    user: &UserId,
) -> Result<Profile, SyncError> {
    let key = cache_key(user);
    if let Some(profile) = session.cache().get::<Profile>(&key, Some(viewer), None) {
        return Ok(profile);
    }
    let rows = session
        .remote()
        .query(Table::Profiles, &Predicate::field_eq("user_id", user.as_str()))
        .await?;
    let row = rows.first().ok_or_else(|| SyncError::NotFound {
        table: Table::Profiles,
        id: EntityId::from(user.clone()),
    })?;
    let profile = row.decode::<Profile>()?;
    session.cache().set(&key, profile.clone(), Some(viewer));
    Ok(profile)
}

/// Shared profile lookups for one session.
#[derive(Debug)]
pub struct ProfileDirectory {
    session: Arc<SyncSession>,
    viewer: UserId,
    poller: PollingFallback,
    detached: Arc<AtomicBool>,
}

impl ProfileDirectory {
    /// Start listening for profile changes.
    pub async fn start(session: &Arc<SyncSession>) -> Result<Arc<Self>, SyncError> {
        let viewer = session.require_user()?;
        let directory = Arc::new(Self {
            session: session.clone(),
            viewer,
            poller: PollingFallback::new(
                SUBSCRIPTION,
                session.lifecycle().subscribe(),
                session.config().polling.enabled,
            ),
            detached: Arc::new(AtomicBool::new(false)),
        });
        let bound: Arc<dyn SessionBound> = directory.clone();
        session.attach(Arc::downgrade(&bound));

        let callback = {
            let weak: Weak<Self> = Arc::downgrade(&directory);
            move |change: &Change| {
                if let Some(directory) = weak.upgrade() {
                    directory.on_change(change);
                }
            }
        };
        session
            .multiplexer()
            .subscribe(
                SUBSCRIPTION,
                vec![
                    TableFilter::on(Table::Profiles, EventKind::Insert),
                    TableFilter::on(Table::Profiles, EventKind::Update),
                ],
                callback,
                true,
            )
            .await;

        let weak: Weak<Self> = Arc::downgrade(&directory);
        directory
            .poller
            .start(session.config().polling.interval(CacheClass::Profiles), move || {
                let weak = weak.clone();
                async move {
                    if let Some(directory) = weak.upgrade() {
                        directory.refresh_known().await;
                    }
                }
            });
        Ok(directory)
    }

    /// Profile of `user`, fetched at most once however many callers ask.
    ///
    /// A fresh cache entry is used before going to the remote service.
    pub async fn profile(&self, user: &UserId) -> Result<Profile, SyncError> {
        if self.is_detached() {
            return Err(SyncError::SessionClosed);
        }
        let result = self
            .session
            .profiles()
            .get_or_fetch(&EntityId::from(user.clone()), || {
                fetch_profile(&self.session, &self.viewer, user)
            })
            .await;
        if let Err(e) = &result {
            if e.is_auth_expired() {
                let session = self.session.clone();
                let e = e.clone();
                tokio::spawn(async move { session.report(&e).await });
            }
        }
        result
    }

    /// Profile of `user` if already known, without fetching.
    pub fn peek(&self, user: &UserId) -> Option<Profile> {
        self.session.profiles().get(&EntityId::from(user.clone()))
    }

    /// Call `f` with every new value of `user`'s profile.
    pub fn watch<F>(&self, user: &UserId, f: F) -> ListenerId
    where
        F: Fn(&Profile) + Send + Sync + 'static,
    {
        self.session
            .profiles()
            .add_listener(&EntityId::from(user.clone()), f)
    }

    /// Stop a [`ProfileDirectory::watch`] callback.
    pub fn unwatch(&self, user: &UserId, listener: ListenerId) -> bool {
        self.session
            .profiles()
            .remove_listener(&EntityId::from(user.clone()), listener)
    }

    /// Update the session user's own profile.
    pub async fn update_own(
        &self,
        display_name: Option<String>,
        bio: Option<String>,
    ) -> Result<Profile, SyncError> {
        let mut patch = serde_json::Map::new();
        if let Some(name) = display_name {
            patch.insert("display_name".into(), serde_json::Value::String(name));
        }
        if let Some(bio) = bio {
            patch.insert("bio".into(), serde_json::Value::String(bio));
        }
        let current = self.profile(&self.viewer).await?;
        let row = self
            .session
            .remote()
            .mutate(
                Table::Profiles,
                Mutation::Update {
                    id: current.id.clone(),
                    patch: serde_json::Value::Object(patch),
                },
            )
            .await?;
        let profile = row.decode::<Profile>()?;
        self.store(profile.clone());
        Ok(profile)
    }

    /// Re-fetch every profile already in the registry in one query.
    async fn refresh_known(&self) {
        let known = self.known_users();
        if known.is_empty() || self.is_detached() {
            return;
        }
        let predicate = Predicate::OwnerIn(known);
        match self.session.remote().query(Table::Profiles, &predicate).await {
            Ok(rows) => {
                for row in rows {
                    match row.decode::<Profile>() {
                        Ok(profile) => self.store(profile),
                        Err(e) => tracing::warn!("Profiles: skipping row {}: {}", row.id, e),
                    }
                }
            }
            Err(e) => tracing::debug!("Profiles: refresh failed: {}", e),
        }
    }

    fn known_users(&self) -> Vec<UserId> {
        self.session
            .profiles()
            .values()
            .into_iter()
            .map(|profile| profile.user_id)
            .collect()
    }

    fn on_change(&self, change: &Change) {
        if self.is_detached() {
            return;
        }
        let Some(row) = &change.new_row else {
            return;
        };
        match row.decode::<Profile>() {
            Ok(profile) => self.store(profile),
            Err(e) => tracing::warn!("Profiles: skipping change for {}: {}", row.id, e),
        }
    }

    fn store(&self, profile: Profile) {
        if self.is_detached() {
            return;
        }
        self.session
            .cache()
            .set(&cache_key(&profile.user_id), profile.clone(), Some(&self.viewer));
        self.session
            .profiles()
            .set(&EntityId::from(profile.user_id.clone()), profile);
    }

    fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Stop listening for profile changes.
    pub async fn stop(&self) {
        if self.detached.swap(true, Ordering::SeqCst) {
            return;
        }
        self.poller.stop();
        self.session
            .multiplexer()
            .unsubscribe(&SubscriptionId::from(SUBSCRIPTION))
            .await;
    }
}

#[async_trait]
impl SessionBound for ProfileDirectory {
    async fn detach(&self) {
        self.stop().await;
    }
}
