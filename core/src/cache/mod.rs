/// Client-side caches, one owner per resource kind
pub mod entity_cache;
pub mod resources;
pub mod search_cache;

pub use entity_cache::{
    CacheEntry, EntityCache, EntryStatus, ListSnapshot, ListStatus, UpsertOutcome, WriteOrigin,
};
pub use resources::{MessageCache, NotificationCache, ProfileCache};
pub use search_cache::{SearchCache, SearchPhase};

/// Cache for a single value fetched as a whole (settings, current profile)
#[derive(Debug, Clone)]
pub struct ValueCache<T> {
    value: Option<T>,
    status: ListStatus,
    error: Option<String>,
}

impl<T> Default for ValueCache<T> {
    fn default() -> Self {
        Self {
            value: None,
            status: ListStatus::Idle,
            error: None,
        }
    }
}

impl<T> ValueCache<T> {
    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn set(&mut self, value: T) {
        self.value = Some(value);
    }

    pub fn status(&self) -> ListStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn begin_fetch(&mut self) {
        self.status = ListStatus::Pending;
        self.error = None;
    }

    pub fn fail_fetch(&mut self, message: impl Into<String>) {
        self.status = ListStatus::Error;
        self.error = Some(message.into());
    }

    pub fn complete_fetch(&mut self, value: T) {
        self.value = Some(value);
        self.status = ListStatus::Idle;
        self.error = None;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
