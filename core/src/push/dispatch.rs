/// Single consumer applying push events to the caches in arrival order
use super::connection::{Generations, PushEvent};
use super::protocol::InboundEvent;
use super::typing::TypingIndicators;
use crate::cache::{UpsertOutcome, WriteOrigin};
use crate::store::Store;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

pub struct Dispatcher {
    store: Store,
    typing: TypingIndicators,
    generations: Arc<Generations>,
}

impl Dispatcher {
    pub fn new(store: Store, typing: TypingIndicators, generations: Arc<Generations>) -> Self {
        Self {
            store,
            typing,
            generations,
        }
    }

    /// Apply one event. Events from fenced-off connections are dropped; the
    /// fence is checked under the target cache's write guard so a session
    /// reset can never be followed by a write from the previous session.
    pub async fn apply(&self, pushed: PushEvent) {
        let PushEvent { generation, event } = pushed;
        match event {
            InboundEvent::MessageCreated(message) => {
                let mut messages = self.store.messages_mut().await;
                if !self.generations.accepts(generation) {
                    debug!("Dropping message {} from a previous session", message.id);
                    return;
                }
                let id = message.id.clone();
                let conversation_id = message.conversation_id.clone();
                let outcome = messages.apply_message(message, WriteOrigin::Pushed);
                debug!("Pushed message {} in {}: {:?}", id, conversation_id, outcome);
            }
            InboundEvent::NotificationCreated(notification) => {
                let mut notifications = self.store.notifications_mut().await;
                if !self.generations.accepts(generation) {
                    debug!(
                        "Dropping notification {} from a previous session",
                        notification.id
                    );
                    return;
                }
                let id = notification.id.clone();
                if notifications.apply_pushed(notification) == UpsertOutcome::Replaced {
                    debug!("Pushed notification {} replayed", id);
                }
            }
            InboundEvent::TypingChanged(update) => {
                let generations = &self.generations;
                self.typing
                    .apply_when(update, || generations.accepts(generation))
                    .await;
            }
        }
    }

    /// Drain `events` until every sender is gone
    pub fn spawn(self, mut events: mpsc::Receiver<PushEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.apply(event).await;
            }
            debug!("Dispatch loop finished");
        })
    }
}
