/// Sync client: wires the session, push channel, caches and search together
/// and exposes the user intents
use crate::api::ApiClient;
use crate::cache::WriteOrigin;
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::model::{
    Conversation, Event, Group, Message, NewEvent, NewGroup, Notification, Post, Profile,
    ProfileUpdate, SearchFilter, Settings, SettingsPatch, User,
};
use crate::push::{
    ConnectionManager, ConnectionOptions, ConnectionState, Dispatcher, PushTransport,
    TypingIndicators,
};
use crate::search::SearchDispatcher;
use crate::session::{Session, SessionBinding};
use crate::store::Store;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prefix of ids given to entities created locally before the server assigns one
pub const TEMP_ID_PREFIX: &str = "tmp-";

pub struct SyncClient {
    session: Session,
    store: Store,
    api: Arc<dyn ApiClient>,
    connection: ConnectionManager,
    typing: TypingIndicators,
    search: SearchDispatcher,
    binding: SessionBinding,
    dispatch: JoinHandle<()>,
}

impl SyncClient {
    /// Build every component and start the background tasks.
    /// Must be called inside a Tokio runtime.
    pub fn create(
        config: Config,
        session: Session,
        api: Arc<dyn ApiClient>,
        transport: Arc<dyn PushTransport>,
    ) -> Self {
        let store = Store::new();
        let typing = TypingIndicators::new();

        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_buffer);
        let connection =
            ConnectionManager::new(transport, ConnectionOptions::from(&config), inbound_tx);
        let dispatch = Dispatcher::new(store.clone(), typing.clone(), connection.generations())
            .spawn(inbound_rx);

        let search = SearchDispatcher::spawn(
            store.clone(),
            api.clone(),
            config.search_debounce,
            config.search_cancel_superseded,
        );
        let binding =
            SessionBinding::spawn(&session, connection.clone(), store.clone(), typing.clone());

        info!("Sync client started");
        Self {
            session,
            store,
            api,
            connection,
            typing,
            search,
            binding,
            dispatch,
        }
    }

    /// Stop every background task and release the push connection
    pub async fn teardown(self) {
        self.binding.join().await;
        self.connection.shutdown().await;
        self.search.stop();
        // the dispatch loop ends once the connection's sender is gone; don't wait on other clones
        self.dispatch.abort();
        let _ = self.dispatch.await;
        info!("Sync client stopped");
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn typing(&self) -> &TypingIndicators {
        &self.typing
    }

    // ─── Session ─────────────────────────────────────────────────────────────

    /// Check the bound credential against the server. Any failure rejects it.
    pub async fn validate_session(&self) -> Result<Option<User>> {
        let credential = match self.session.current() {
            Some(credential) => credential,
            None => return Ok(None),
        };
        let epoch = self.store.epoch();
        match self.api.current_user().await {
            Ok(user) => {
                let mut cache = self.store.user_mut().await;
                self.store.ensure_epoch(epoch)?;
                cache.complete_fetch(user.clone());
                info!("Session validated for {}", user.username);
                Ok(Some(user))
            }
            Err(e) => {
                warn!("Session validation failed: {}", e);
                self.session.reject(&credential);
                Err(e.into())
            }
        }
    }

    /// Cached signed-in user, fetched on first use
    pub async fn current_user(&self) -> Result<User> {
        if let Some(user) = self.store.user().await.get() {
            return Ok(user.clone());
        }
        let epoch = self.store.epoch();
        let user = self.api.current_user().await?;
        let mut cache = self.store.user_mut().await;
        self.store.ensure_epoch(epoch)?;
        cache.complete_fetch(user.clone());
        Ok(user)
    }

    // ─── Events ──────────────────────────────────────────────────────────────

    pub async fn fetch_events(&self) -> Result<()> {
        let epoch = self.store.epoch();
        self.store.events_mut().await.begin_fetch();
        let result = self.api.events().await;

        let mut events = self.store.events_mut().await;
        self.store.ensure_epoch(epoch)?;
        match result {
            Ok(items) => {
                events.complete_fetch(items);
                Ok(())
            }
            Err(e) => {
                events.fail_fetch(e.message.clone());
                Err(e.into())
            }
        }
    }

    /// Refresh one event. On failure a cached copy stays, flagged with the error.
    pub async fn fetch_event(&self, id: &str) -> Result<Event> {
        let epoch = self.store.epoch();
        let result = self.api.event(id).await;
        let mut events = self.store.events_mut().await;
        self.store.ensure_epoch(epoch)?;
        match result {
            Ok(event) => {
                events.upsert_entity(event.clone(), WriteOrigin::Confirmed);
                Ok(event)
            }
            Err(e) => {
                events.mark_entry_error(id, e.message.clone());
                Err(e.into())
            }
        }
    }

    pub async fn create_event(&self, draft: NewEvent) -> Result<Event> {
        let store = self.store.clone();
        let api = self.api.clone();
        detached(async move {
            let epoch = store.epoch();
            let event = api.create_event(&draft).await?;
            let mut events = store.events_mut().await;
            store.ensure_epoch(epoch)?;
            events.upsert_entity(event.clone(), WriteOrigin::Confirmed);
            events.prepend(event.id.clone());
            Ok(event)
        })
        .await
    }

    pub async fn attend_event(&self, id: &str) -> Result<Event> {
        let epoch = self.store.epoch();
        let event = self.api.attend_event(id).await?;
        let mut events = self.store.events_mut().await;
        self.store.ensure_epoch(epoch)?;
        events.upsert_entity(event.clone(), WriteOrigin::Confirmed);
        Ok(event)
    }

    // ─── Groups ──────────────────────────────────────────────────────────────

    pub async fn fetch_groups(&self) -> Result<()> {
        let epoch = self.store.epoch();
        self.store.groups_mut().await.begin_fetch();
        let result = self.api.groups().await;

        let mut groups = self.store.groups_mut().await;
        self.store.ensure_epoch(epoch)?;
        match result {
            Ok(items) => {
                groups.complete_fetch(items);
                Ok(())
            }
            Err(e) => {
                groups.fail_fetch(e.message.clone());
                Err(e.into())
            }
        }
    }

    pub async fn fetch_group(&self, id: &str) -> Result<Group> {
        let epoch = self.store.epoch();
        let result = self.api.group(id).await;
        let mut groups = self.store.groups_mut().await;
        self.store.ensure_epoch(epoch)?;
        match result {
            Ok(group) => {
                groups.upsert_entity(group.clone(), WriteOrigin::Confirmed);
                Ok(group)
            }
            Err(e) => {
                groups.mark_entry_error(id, e.message.clone());
                Err(e.into())
            }
        }
    }

    pub async fn create_group(&self, draft: NewGroup) -> Result<Group> {
        let store = self.store.clone();
        let api = self.api.clone();
        detached(async move {
            let epoch = store.epoch();
            let group = api.create_group(&draft).await?;
            let mut groups = store.groups_mut().await;
            store.ensure_epoch(epoch)?;
            groups.upsert_entity(group.clone(), WriteOrigin::Confirmed);
            groups.prepend(group.id.clone());
            Ok(group)
        })
        .await
    }

    pub async fn join_group(&self, id: &str) -> Result<Group> {
        let epoch = self.store.epoch();
        let group = self.api.join_group(id).await?;
        let mut groups = self.store.groups_mut().await;
        self.store.ensure_epoch(epoch)?;
        groups.upsert_entity(group.clone(), WriteOrigin::Confirmed);
        Ok(group)
    }

    // ─── Posts ───────────────────────────────────────────────────────────────

    pub async fn fetch_posts(&self) -> Result<()> {
        let epoch = self.store.epoch();
        self.store.posts_mut().await.begin_fetch();
        let result = self.api.posts().await;

        let mut posts = self.store.posts_mut().await;
        self.store.ensure_epoch(epoch)?;
        match result {
            Ok(items) => {
                posts.complete_fetch(items);
                Ok(())
            }
            Err(e) => {
                posts.fail_fetch(e.message.clone());
                Err(e.into())
            }
        }
    }

    /// Show the post at the top of the feed right away under a temporary id,
    /// then swap in the server's copy (or drop it if the server refuses).
    pub async fn create_post(&self, content: &str) -> Result<Post> {
        let author = self.current_user().await?;
        let now = Utc::now();
        let temp_id = format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4());
        let draft = Post {
            id: temp_id.clone(),
            content: content.to_string(),
            author,
            created_at: now,
            updated_at: now,
            likes: 0,
            comments: 0,
            liked: false,
        };

        let epoch = self.store.epoch();
        {
            let mut posts = self.store.posts_mut().await;
            self.store.ensure_epoch(epoch)?;
            posts.upsert(temp_id.clone(), draft, WriteOrigin::Optimistic);
            posts.prepend(temp_id.clone());
        }

        let store = self.store.clone();
        let api = self.api.clone();
        let content = content.to_string();
        detached(async move {
            let result = api.create_post(&content).await;
            let mut posts = store.posts_mut().await;
            // a reset already dropped the placeholder
            store.ensure_epoch(epoch)?;
            posts.remove(&temp_id);
            match result {
                Ok(post) => {
                    debug!("Post {} confirmed as {}", temp_id, post.id);
                    posts.upsert_entity(post.clone(), WriteOrigin::Confirmed);
                    posts.prepend(post.id.clone());
                    Ok(post)
                }
                Err(e) => {
                    warn!("Post rejected: {}", e);
                    Err(e.into())
                }
            }
        })
        .await
    }

    pub async fn like_post(&self, id: &str) -> Result<Post> {
        let epoch = self.store.epoch();
        let post = self.api.like_post(id).await?;
        let mut posts = self.store.posts_mut().await;
        self.store.ensure_epoch(epoch)?;
        posts.upsert_entity(post.clone(), WriteOrigin::Confirmed);
        Ok(post)
    }

    // ─── Messages ────────────────────────────────────────────────────────────

    pub async fn fetch_conversations(&self) -> Result<()> {
        let epoch = self.store.epoch();
        self.store.messages_mut().await.begin_fetch();
        let result = self.api.conversations().await;

        let mut messages = self.store.messages_mut().await;
        self.store.ensure_epoch(epoch)?;
        match result {
            Ok(items) => {
                messages.complete_fetch(items);
                Ok(())
            }
            Err(e) => {
                messages.conversations.fail_fetch(e.message.clone());
                Err(e.into())
            }
        }
    }

    /// Select a cached conversation, or clear the selection with `None`.
    /// Returns false when the conversation is not cached.
    pub async fn select_conversation(&self, conversation_id: Option<&str>) -> bool {
        self.store.messages_mut().await.select(conversation_id)
    }

    pub async fn start_conversation(&self, user_id: &str) -> Result<Conversation> {
        let store = self.store.clone();
        let api = self.api.clone();
        let user_id = user_id.to_string();
        detached(async move {
            let epoch = store.epoch();
            let conversation = api.start_conversation(&user_id).await?;
            let mut messages = store.messages_mut().await;
            store.ensure_epoch(epoch)?;
            messages.add_started(conversation.clone());
            Ok(conversation)
        })
        .await
    }

    /// Send a message through the REST API and append the confirmed copy
    pub async fn post_message(&self, conversation_id: &str, content: &str) -> Result<Message> {
        let store = self.store.clone();
        let api = self.api.clone();
        let conversation_id = conversation_id.to_string();
        let content = content.to_string();
        detached(async move {
            let epoch = store.epoch();
            let message = api.post_message(&conversation_id, &content).await?;
            let mut messages = store.messages_mut().await;
            store.ensure_epoch(epoch)?;
            messages.apply_message(message.clone(), WriteOrigin::Confirmed);
            Ok(message)
        })
        .await
    }

    // ─── Notifications ───────────────────────────────────────────────────────

    pub async fn fetch_notifications(&self) -> Result<()> {
        let epoch = self.store.epoch();
        self.store.notifications_mut().await.list.begin_fetch();
        let result = self.api.notifications().await;

        let mut notifications = self.store.notifications_mut().await;
        self.store.ensure_epoch(epoch)?;
        match result {
            Ok(items) => {
                notifications.list.complete_fetch(items);
                let unread = notifications.count_unread();
                notifications.set_unread(unread);
                Ok(())
            }
            Err(e) => {
                notifications.list.fail_fetch(e.message.clone());
                Err(e.into())
            }
        }
    }

    /// Recount unread notifications from the server without touching the list
    pub async fn refresh_unread_count(&self) -> Result<u32> {
        let epoch = self.store.epoch();
        let items = self.api.notifications().await?;
        let unread = items.iter().filter(|n| !n.read).count() as u32;
        let mut notifications = self.store.notifications_mut().await;
        self.store.ensure_epoch(epoch)?;
        notifications.set_unread(unread);
        Ok(unread)
    }

    pub async fn mark_notification_read(&self, id: &str) -> Result<Notification> {
        let epoch = self.store.epoch();
        let notification = self.api.mark_notification_read(id).await?;
        let mut notifications = self.store.notifications_mut().await;
        self.store.ensure_epoch(epoch)?;
        notifications.apply_read(notification.clone());
        Ok(notification)
    }

    pub async fn mark_all_notifications_read(&self) -> Result<()> {
        let epoch = self.store.epoch();
        self.api.mark_all_notifications_read().await?;
        let mut notifications = self.store.notifications_mut().await;
        self.store.ensure_epoch(epoch)?;
        notifications.apply_all_read();
        Ok(())
    }

    // ─── Profile ─────────────────────────────────────────────────────────────

    pub async fn fetch_profile(&self, username: &str) -> Result<Profile> {
        let epoch = self.store.epoch();
        self.store.profile_mut().await.profile.begin_fetch();
        let result = self.api.profile(username).await;

        let mut profile = self.store.profile_mut().await;
        self.store.ensure_epoch(epoch)?;
        match result {
            Ok(value) => {
                profile.profile.complete_fetch(value.clone());
                Ok(value)
            }
            Err(e) => {
                profile.profile.fail_fetch(e.message.clone());
                Err(e.into())
            }
        }
    }

    pub async fn update_profile(&self, user_id: &str, update: ProfileUpdate) -> Result<Profile> {
        let epoch = self.store.epoch();
        let updated = self.api.update_profile(user_id, &update).await?;
        let mut profile = self.store.profile_mut().await;
        self.store.ensure_epoch(epoch)?;
        let shown = profile.profile.get().map(|p| p.id.clone());
        match shown {
            Some(id) if id != updated.id => {
                debug!("Updated profile {} is not the one shown", updated.id)
            }
            _ => profile.profile.set(updated.clone()),
        }
        Ok(updated)
    }

    pub async fn fetch_user_events(&self, user_id: &str) -> Result<()> {
        let epoch = self.store.epoch();
        self.store.profile_mut().await.events.begin_fetch();
        let result = self.api.user_events(user_id).await;

        let mut profile = self.store.profile_mut().await;
        self.store.ensure_epoch(epoch)?;
        match result {
            Ok(items) => {
                profile.events.complete_fetch(items);
                Ok(())
            }
            Err(e) => {
                profile.events.fail_fetch(e.message.clone());
                Err(e.into())
            }
        }
    }

    pub async fn fetch_user_groups(&self, user_id: &str) -> Result<()> {
        let epoch = self.store.epoch();
        self.store.profile_mut().await.groups.begin_fetch();
        let result = self.api.user_groups(user_id).await;

        let mut profile = self.store.profile_mut().await;
        self.store.ensure_epoch(epoch)?;
        match result {
            Ok(items) => {
                profile.groups.complete_fetch(items);
                Ok(())
            }
            Err(e) => {
                profile.groups.fail_fetch(e.message.clone());
                Err(e.into())
            }
        }
    }

    // ─── Settings ────────────────────────────────────────────────────────────

    pub async fn fetch_settings(&self) -> Result<Settings> {
        let epoch = self.store.epoch();
        self.store.settings_mut().await.begin_fetch();
        let result = self.api.settings().await;

        let mut settings = self.store.settings_mut().await;
        self.store.ensure_epoch(epoch)?;
        match result {
            Ok(value) => {
                settings.complete_fetch(value.clone());
                Ok(value)
            }
            Err(e) => {
                settings.fail_fetch(e.message.clone());
                Err(e.into())
            }
        }
    }

    pub async fn update_settings(&self, patch: SettingsPatch) -> Result<Settings> {
        let epoch = self.store.epoch();
        let updated = self.api.update_settings(&patch).await?;
        let mut settings = self.store.settings_mut().await;
        self.store.ensure_epoch(epoch)?;
        settings.complete_fetch(updated.clone());
        Ok(updated)
    }

    // ─── Realtime ────────────────────────────────────────────────────────────

    /// Send over the push channel; silently dropped unless connected
    pub async fn send_message(&self, conversation_id: &str, content: &str) {
        self.connection.send_message(conversation_id, content).await;
    }

    pub async fn signal_typing_start(&self, conversation_id: &str) {
        self.connection.signal_typing_start(conversation_id).await;
    }

    pub async fn signal_typing_stop(&self, conversation_id: &str) {
        self.connection.signal_typing_stop(conversation_id).await;
    }

    // ─── Search ──────────────────────────────────────────────────────────────

    pub async fn on_query_changed(&self, text: &str, filter: SearchFilter) {
        self.search.on_query_changed(text, filter).await;
    }
}

/// Run `work` on its own task so dropping the caller's future cannot cut a
/// cache write in half
async fn detached<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    tokio::spawn(work)
        .await
        .map_err(|e| SyncError::Closed(format!("Intent task failed: {}", e)))?
}
