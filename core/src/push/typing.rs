/// Ephemeral typing indicators per conversation
use super::protocol::TypingUpdate;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Who is typing where. Never persisted; cleared with the session.
#[derive(Clone)]
pub struct TypingIndicators {
    active: Arc<RwLock<HashMap<String, BTreeSet<String>>>>,
    changes: broadcast::Sender<TypingUpdate>,
}

impl Default for TypingIndicators {
    fn default() -> Self {
        Self::new()
    }
}

impl TypingIndicators {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            active: Arc::new(RwLock::new(HashMap::new())),
            changes,
        }
    }

    /// Subscribe to typing changes; lagging receivers miss old updates
    pub fn subscribe(&self) -> broadcast::Receiver<TypingUpdate> {
        self.changes.subscribe()
    }

    /// Apply an update; returns false when it changed nothing
    pub async fn apply(&self, update: TypingUpdate) -> bool {
        self.apply_when(update, || true).await
    }

    /// Apply an update only if `accept` still holds once the state is locked
    pub async fn apply_when(&self, update: TypingUpdate, accept: impl FnOnce() -> bool) -> bool {
        let changed = {
            let mut active = self.active.write().await;
            if !accept() {
                return false;
            }
            if update.is_typing {
                active
                    .entry(update.conversation_id.clone())
                    .or_default()
                    .insert(update.user_id.clone())
            } else {
                let removed = active
                    .get_mut(&update.conversation_id)
                    .is_some_and(|users| users.remove(&update.user_id));
                if active
                    .get(&update.conversation_id)
                    .is_some_and(|users| users.is_empty())
                {
                    active.remove(&update.conversation_id);
                }
                removed
            }
        };
        if changed {
            // no subscribers is fine
            let _ = self.changes.send(update);
        }
        changed
    }

    /// Users currently typing in a conversation, sorted
    pub async fn typing_in(&self, conversation_id: &str) -> Vec<String> {
        self.active
            .read()
            .await
            .get(conversation_id)
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn clear(&self) {
        self.active.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(user: &str, is_typing: bool) -> TypingUpdate {
        TypingUpdate {
            conversation_id: "c1".to_string(),
            user_id: user.to_string(),
            is_typing,
        }
    }

    #[tokio::test]
    async fn test_start_stop_and_notify() {
        let typing = TypingIndicators::new();
        let mut rx = typing.subscribe();

        assert!(typing.apply(update("u2", true)).await);
        assert!(!typing.apply(update("u2", true)).await);
        assert_eq!(typing.typing_in("c1").await, vec!["u2".to_string()]);
        assert_eq!(rx.recv().await.unwrap(), update("u2", true));

        assert!(typing.apply(update("u2", false)).await);
        assert!(typing.typing_in("c1").await.is_empty());
        assert!(!typing.apply(update("u2", false)).await);
    }

    #[tokio::test]
    async fn test_clear_forgets_everyone() {
        let typing = TypingIndicators::new();
        typing.apply(update("u2", true)).await;
        typing.apply(update("u3", true)).await;
        typing.clear().await;
        assert!(typing.typing_in("c1").await.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_update_changes_nothing() {
        let typing = TypingIndicators::new();
        assert!(!typing.apply_when(update("u2", true), || false).await);
        assert!(typing.typing_in("c1").await.is_empty());
    }
}
