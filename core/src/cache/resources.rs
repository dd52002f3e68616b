/// Resource caches with more structure than a single entity map
use super::entity_cache::{EntityCache, ListStatus, UpsertOutcome, WriteOrigin};
use super::ValueCache;
use crate::model::{Conversation, Event, Group, Message, Notification, Profile};
use std::collections::HashMap;

/// Notifications, most recent first, with the unread counter
#[derive(Debug, Clone)]
pub struct NotificationCache {
    pub list: EntityCache<Notification>,
    unread: u32,
}

impl Default for NotificationCache {
    fn default() -> Self {
        Self {
            list: EntityCache::new("notifications"),
            unread: 0,
        }
    }
}

impl NotificationCache {
    pub fn unread(&self) -> u32 {
        self.unread
    }

    pub fn set_unread(&mut self, count: u32) {
        self.unread = count;
    }

    /// Unread count derived from the cached list
    pub fn count_unread(&self) -> u32 {
        self.list.ordered().filter(|(_, n)| !n.read).count() as u32
    }

    /// Apply a pushed notification: front of the list, one more unread.
    /// A replayed id replaces the entry without counting twice.
    pub fn apply_pushed(&mut self, notification: Notification) -> UpsertOutcome {
        let id = notification.id.clone();
        let outcome = self.list.upsert(id.clone(), notification, WriteOrigin::Pushed);
        self.list.prepend(id);
        if outcome == UpsertOutcome::Inserted {
            self.unread = self.unread.saturating_add(1);
        }
        outcome
    }

    /// Server confirmed a notification as read
    pub fn apply_read(&mut self, notification: Notification) {
        let was_unread = self.list.get(&notification.id).map_or(true, |n| !n.read);
        let id = notification.id.clone();
        self.list.upsert(id, notification, WriteOrigin::Confirmed);
        if was_unread {
            self.unread = self.unread.saturating_sub(1);
        }
    }

    /// Server confirmed every notification as read
    pub fn apply_all_read(&mut self) {
        let updated: Vec<Notification> = self
            .list
            .ordered()
            .filter(|(_, n)| !n.read)
            .map(|(_, n)| Notification {
                read: true,
                ..n.clone()
            })
            .collect();
        for n in updated {
            let id = n.id.clone();
            self.list.upsert(id, n, WriteOrigin::Confirmed);
        }
        self.unread = 0;
    }

    pub fn clear(&mut self) {
        self.list.clear();
        self.unread = 0;
    }
}

/// Conversations plus one ordered message thread per conversation
#[derive(Debug, Clone)]
pub struct MessageCache {
    pub conversations: EntityCache<Conversation>,
    threads: HashMap<String, EntityCache<Message>>,
    selected: Option<String>,
}

impl Default for MessageCache {
    fn default() -> Self {
        Self {
            conversations: EntityCache::new("conversations"),
            threads: HashMap::new(),
            selected: None,
        }
    }
}

impl MessageCache {
    fn thread_mut(&mut self, conversation_id: &str) -> &mut EntityCache<Message> {
        self.threads
            .entry(conversation_id.to_string())
            .or_insert_with(|| EntityCache::new("messages"))
    }

    pub fn thread(&self, conversation_id: &str) -> Option<&EntityCache<Message>> {
        self.threads.get(conversation_id)
    }

    /// Messages of a conversation, oldest first
    pub fn thread_messages(&self, conversation_id: &str) -> Vec<Message> {
        self.threads
            .get(conversation_id)
            .map(|t| t.ordered().map(|(_, m)| m.clone()).collect())
            .unwrap_or_default()
    }

    /// Write a message into its conversation's thread and append it.
    ///
    /// The conversation does not have to be cached: a thread is created on
    /// demand so pushed messages are never dropped.
    pub fn apply_message(&mut self, message: Message, origin: WriteOrigin) -> UpsertOutcome {
        let conversation_id = message.conversation_id.clone();
        let id = message.id.clone();

        let thread = self.thread_mut(&conversation_id);
        let outcome = thread.upsert(id.clone(), message, origin);
        if outcome.applied() {
            thread.append(id);
            if self.conversations.contains(&conversation_id) {
                self.conversations.prepend(conversation_id);
            }
        }
        outcome
    }

    /// Split embedded messages into threads and cache the conversation itself
    fn ingest(&mut self, mut conversation: Conversation) -> Conversation {
        let messages = std::mem::take(&mut conversation.messages);
        self.thread_mut(&conversation.id)
            .complete_fetch_appending(messages);
        conversation
    }

    /// Conversation list fetch started. Threads are refreshed by the same
    /// response, so their push windows open too.
    pub fn begin_fetch(&mut self) {
        self.conversations.begin_fetch();
        for thread in self.threads.values_mut() {
            thread.open_fetch_window();
        }
    }

    pub fn complete_fetch(&mut self, conversations: Vec<Conversation>) {
        let stripped: Vec<Conversation> = conversations
            .into_iter()
            .map(|c| self.ingest(c))
            .collect();
        self.conversations.complete_fetch(stripped);
        let gone = self
            .selected
            .as_deref()
            .is_some_and(|id| !self.conversations.contains(id));
        if gone {
            self.selected = None;
        }
    }

    /// A conversation the user just started: listed first and selected
    pub fn add_started(&mut self, conversation: Conversation) {
        let conversation = self.ingest(conversation);
        let id = conversation.id.clone();
        self.conversations
            .upsert(id.clone(), conversation, WriteOrigin::Confirmed);
        self.conversations.prepend(id.clone());
        self.selected = Some(id);
    }

    pub fn select(&mut self, conversation_id: Option<&str>) -> bool {
        match conversation_id {
            None => {
                self.selected = None;
                true
            }
            Some(id) if self.conversations.contains(id) => {
                self.selected = Some(id.to_string());
                true
            }
            Some(_) => false,
        }
    }

    pub fn selected(&self) -> Option<&Conversation> {
        self.selected
            .as_deref()
            .and_then(|id| self.conversations.get(id))
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn status(&self) -> ListStatus {
        self.conversations.status()
    }

    pub fn clear(&mut self) {
        self.conversations.clear();
        self.threads.clear();
        self.selected = None;
    }
}

/// A viewed profile with the user's events and groups
#[derive(Debug, Clone)]
pub struct ProfileCache {
    pub profile: ValueCache<Profile>,
    pub events: EntityCache<Event>,
    pub groups: EntityCache<Group>,
}

impl Default for ProfileCache {
    fn default() -> Self {
        Self {
            profile: ValueCache::default(),
            events: EntityCache::new("profile_events"),
            groups: EntityCache::new("profile_groups"),
        }
    }
}

impl ProfileCache {
    pub fn clear(&mut self) {
        self.profile.clear();
        self.events.clear();
        self.groups.clear();
    }
}
