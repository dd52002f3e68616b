/// Process-wide cache store, one lock per resource kind
use crate::cache::{
    EntityCache, ListSnapshot, MessageCache, NotificationCache, ProfileCache, SearchCache,
    ValueCache,
};
use crate::error::{Result, SyncError};
use crate::model::{Event, Group, Post, Settings, User};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// Every cache the sync layer maintains.
///
/// Cloning shares the same caches. The epoch advances on each [`Store::reset`]
/// (logout, credential change) so a response to a request started under the
/// previous session can be recognised and dropped.
#[derive(Clone)]
pub struct Store {
    epoch: Arc<AtomicU64>,
    user: Arc<RwLock<ValueCache<User>>>,
    events: Arc<RwLock<EntityCache<Event>>>,
    groups: Arc<RwLock<EntityCache<Group>>>,
    posts: Arc<RwLock<EntityCache<Post>>>,
    notifications: Arc<RwLock<NotificationCache>>,
    messages: Arc<RwLock<MessageCache>>,
    profile: Arc<RwLock<ProfileCache>>,
    settings: Arc<RwLock<ValueCache<Settings>>>,
    search: Arc<RwLock<SearchCache>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            epoch: Arc::new(AtomicU64::new(0)),
            user: Arc::new(RwLock::new(ValueCache::default())),
            events: Arc::new(RwLock::new(EntityCache::new("events"))),
            groups: Arc::new(RwLock::new(EntityCache::new("groups"))),
            posts: Arc::new(RwLock::new(EntityCache::new("posts"))),
            notifications: Arc::new(RwLock::new(NotificationCache::default())),
            messages: Arc::new(RwLock::new(MessageCache::default())),
            profile: Arc::new(RwLock::new(ProfileCache::default())),
            settings: Arc::new(RwLock::new(ValueCache::default())),
            search: Arc::new(RwLock::new(SearchCache::default())),
        }
    }

    /// Current session epoch
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn is_epoch(&self, epoch: u64) -> bool {
        self.epoch() == epoch
    }

    /// Fails when a reset happened since `epoch` was read.
    /// Check it while holding the write guard the response goes into.
    pub fn ensure_epoch(&self, epoch: u64) -> Result<()> {
        if self.is_epoch(epoch) {
            Ok(())
        } else {
            debug!("Dropping response from epoch {} (now {})", epoch, self.epoch());
            Err(SyncError::SessionChanged)
        }
    }

    /// Drop all cached state and start a new epoch
    pub async fn reset(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.user.write().await.clear();
        self.events.write().await.clear();
        self.groups.write().await.clear();
        self.posts.write().await.clear();
        self.notifications.write().await.clear();
        self.messages.write().await.clear();
        self.profile.write().await.clear();
        self.settings.write().await.clear();
        self.search.write().await.clear();
        info!("Caches cleared (epoch {})", epoch);
    }

    /// The signed-in user, once validated
    pub async fn user(&self) -> RwLockReadGuard<'_, ValueCache<User>> {
        self.user.read().await
    }

    pub async fn user_mut(&self) -> RwLockWriteGuard<'_, ValueCache<User>> {
        self.user.write().await
    }

    pub async fn events(&self) -> RwLockReadGuard<'_, EntityCache<Event>> {
        self.events.read().await
    }

    pub async fn events_mut(&self) -> RwLockWriteGuard<'_, EntityCache<Event>> {
        self.events.write().await
    }

    pub async fn groups(&self) -> RwLockReadGuard<'_, EntityCache<Group>> {
        self.groups.read().await
    }

    pub async fn groups_mut(&self) -> RwLockWriteGuard<'_, EntityCache<Group>> {
        self.groups.write().await
    }

    pub async fn posts(&self) -> RwLockReadGuard<'_, EntityCache<Post>> {
        self.posts.read().await
    }

    pub async fn posts_mut(&self) -> RwLockWriteGuard<'_, EntityCache<Post>> {
        self.posts.write().await
    }

    pub async fn notifications(&self) -> RwLockReadGuard<'_, NotificationCache> {
        self.notifications.read().await
    }

    pub async fn notifications_mut(&self) -> RwLockWriteGuard<'_, NotificationCache> {
        self.notifications.write().await
    }

    pub async fn messages(&self) -> RwLockReadGuard<'_, MessageCache> {
        self.messages.read().await
    }

    pub async fn messages_mut(&self) -> RwLockWriteGuard<'_, MessageCache> {
        self.messages.write().await
    }

    pub async fn profile(&self) -> RwLockReadGuard<'_, ProfileCache> {
        self.profile.read().await
    }

    pub async fn profile_mut(&self) -> RwLockWriteGuard<'_, ProfileCache> {
        self.profile.write().await
    }

    pub async fn settings(&self) -> RwLockReadGuard<'_, ValueCache<Settings>> {
        self.settings.read().await
    }

    pub async fn settings_mut(&self) -> RwLockWriteGuard<'_, ValueCache<Settings>> {
        self.settings.write().await
    }

    pub async fn search(&self) -> RwLockReadGuard<'_, SearchCache> {
        self.search.read().await
    }

    pub async fn search_mut(&self) -> RwLockWriteGuard<'_, SearchCache> {
        self.search.write().await
    }

    // ─── Snapshots ───────────────────────────────────────────────────────────

    pub async fn events_snapshot(&self) -> ListSnapshot<Event> {
        self.events.read().await.snapshot()
    }

    pub async fn groups_snapshot(&self) -> ListSnapshot<Group> {
        self.groups.read().await.snapshot()
    }

    pub async fn posts_snapshot(&self) -> ListSnapshot<Post> {
        self.posts.read().await.snapshot()
    }

    pub async fn unread_count(&self) -> u32 {
        self.notifications.read().await.unread()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Notification, NotificationKind};
    use chrono::Utc;

    #[tokio::test]
    async fn test_reset_clears_and_advances_epoch() {
        let store = Store::new();
        let before = store.epoch();

        store.notifications_mut().await.apply_pushed(Notification {
            id: "n1".to_string(),
            kind: NotificationKind::Message,
            content: "hi".to_string(),
            read: false,
            created_at: Utc::now(),
            sender: None,
            related_id: None,
        });
        store.search_mut().await.dispatch("x", Default::default());
        assert_eq!(store.unread_count().await, 1);

        store.reset().await;

        assert!(!store.is_epoch(before));
        assert!(matches!(store.ensure_epoch(before), Err(SyncError::SessionChanged)));
        assert_eq!(store.unread_count().await, 0);
        assert!(store.notifications().await.list.is_empty());
        assert!(store.search().await.query().is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = Store::new();
        let other = store.clone();
        other.posts_mut().await.begin_fetch();
        assert!(store.posts().await.is_loading());
        assert!(store.events_snapshot().await.items.is_empty());
    }
}
