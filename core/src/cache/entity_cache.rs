/// Per-resource entity cache with optimistic/confirmed/pushed reconciliation
use crate::model::Entity;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

/// Where a cache write came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOrigin {
    /// Applied locally before the server confirmed it
    Optimistic,
    /// Response to this client's own request
    Confirmed,
    /// Server-initiated push event
    Pushed,
}

impl WriteOrigin {
    /// Confirmed and pushed writes are authoritative; optimistic ones are placeholders
    pub fn is_authoritative(&self) -> bool {
        !matches!(self, WriteOrigin::Optimistic)
    }
}

/// Request lifecycle of a single entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    Idle,
    Pending,
    Error,
}

/// Lifecycle of the list-level fetch for one resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ListStatus {
    #[default]
    Idle,
    Pending,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub data: T,
    pub status: EntryStatus,
    pub error: Option<String>,
    pub origin: WriteOrigin,
}

impl<T> CacheEntry<T> {
    fn new(data: T, origin: WriteOrigin) -> Self {
        let status = if origin.is_authoritative() {
            EntryStatus::Idle
        } else {
            EntryStatus::Pending
        };
        Self {
            data,
            status,
            error: None,
            origin,
        }
    }

    /// Optimistic entry still waiting for its confirmation
    pub fn is_pending(&self) -> bool {
        self.origin == WriteOrigin::Optimistic && self.status == EntryStatus::Pending
    }
}

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    /// Optimistic write refused because an authoritative entry exists
    Rejected,
}

impl UpsertOutcome {
    pub fn applied(&self) -> bool {
        !matches!(self, UpsertOutcome::Rejected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListEnd {
    Front,
    Back,
}

/// Read-only copy of a cache handed to readers
#[derive(Debug, Clone, PartialEq)]
pub struct ListSnapshot<T> {
    /// Entities in list order
    pub items: Vec<T>,
    pub status: ListStatus,
    pub error: Option<String>,
}

impl<T> ListSnapshot<T> {
    pub fn is_loading(&self) -> bool {
        self.status == ListStatus::Pending
    }
}

/// Mapping from id to last-known state for one resource kind, plus an ordered
/// id sequence for list views and a list-level fetch status.
#[derive(Debug, Clone)]
pub struct EntityCache<T> {
    kind: &'static str,
    entries: HashMap<String, CacheEntry<T>>,
    order: VecDeque<String>,
    status: ListStatus,
    error: Option<String>,
    /// Ids pushed since the current list fetch began
    pushed_in_window: HashSet<String>,
}

impl<T> EntityCache<T> {
    /// Create an empty cache for `kind` (used in log lines only)
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
            order: VecDeque::new(),
            status: ListStatus::Idle,
            error: None,
            pushed_in_window: HashSet::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.entries.get(id).map(|e| &e.data)
    }

    pub fn entry(&self, id: &str) -> Option<&CacheEntry<T>> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write `value` under `id` following the merge rule:
    /// authoritative writes always land (last write wins), optimistic writes
    /// only replace other optimistic writes.
    pub fn upsert(&mut self, id: impl Into<String>, value: T, origin: WriteOrigin) -> UpsertOutcome {
        let id = id.into();
        if origin == WriteOrigin::Pushed {
            self.pushed_in_window.insert(id.clone());
        }
        match self.entries.get_mut(&id) {
            None => {
                self.entries.insert(id, CacheEntry::new(value, origin));
                UpsertOutcome::Inserted
            }
            Some(existing) => {
                if origin == WriteOrigin::Optimistic && existing.origin.is_authoritative() {
                    debug!(
                        "{}: optimistic write for {} ignored, entry already {:?}",
                        self.kind, id, existing.origin
                    );
                    return UpsertOutcome::Rejected;
                }
                *existing = CacheEntry::new(value, origin);
                UpsertOutcome::Replaced
            }
        }
    }

    /// Optimistic write that deliberately replaces whatever is cached,
    /// e.g. the user edits an entity again before the previous edit confirmed.
    pub fn supersede(&mut self, id: impl Into<String>, value: T) -> UpsertOutcome {
        let id = id.into();
        let outcome = if self.entries.contains_key(&id) {
            UpsertOutcome::Replaced
        } else {
            UpsertOutcome::Inserted
        };
        self.entries
            .insert(id, CacheEntry::new(value, WriteOrigin::Optimistic));
        outcome
    }

    /// Delete the entry and drop it from the ordered sequence
    pub fn remove(&mut self, id: &str) -> Option<T> {
        self.pushed_in_window.remove(id);
        self.order.retain(|existing| existing != id);
        self.entries.remove(id).map(|e| e.data)
    }

    /// Insert `id` at the front of the list ("most recent first" views).
    /// An id already listed is moved rather than duplicated.
    pub fn prepend(&mut self, id: impl Into<String>) {
        let id = id.into();
        self.order.retain(|existing| *existing != id);
        self.order.push_front(id);
    }

    /// Insert `id` at the back of the list ("most recent last" views)
    pub fn append(&mut self, id: impl Into<String>) {
        let id = id.into();
        self.order.retain(|existing| *existing != id);
        self.order.push_back(id);
    }

    /// Ids in list order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Listed entities in order; ids without an entry are skipped
    pub fn ordered(&self) -> impl Iterator<Item = (&str, &T)> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id).map(|e| (id.as_str(), &e.data)))
    }

    /// Flag a single entry as failed without touching its data
    pub fn mark_entry_error(&mut self, id: &str, message: impl Into<String>) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.status = EntryStatus::Error;
                entry.error = Some(message.into());
                true
            }
            None => false,
        }
    }

    pub fn status(&self) -> ListStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.status == ListStatus::Pending
    }

    /// List fetch started
    pub fn begin_fetch(&mut self) {
        self.status = ListStatus::Pending;
        self.error = None;
        self.open_fetch_window();
    }

    /// Start tracking pushes that the upcoming fetch response may not list yet
    pub(crate) fn open_fetch_window(&mut self) {
        self.pushed_in_window.clear();
    }

    /// List fetch failed; cached entries are left as they are
    pub fn fail_fetch(&mut self, message: impl Into<String>) {
        self.status = ListStatus::Error;
        self.error = Some(message.into());
    }

    /// Forget every entry and the list state
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.status = ListStatus::Idle;
        self.error = None;
        self.pushed_in_window.clear();
    }
}

impl<T: Entity> EntityCache<T> {
    /// Upsert keyed by the entity's own id
    pub fn upsert_entity(&mut self, value: T, origin: WriteOrigin) -> UpsertOutcome {
        let id = value.id().to_string();
        self.upsert(id, value, origin)
    }

    /// List fetch succeeded, for lists shown most recent first.
    ///
    /// Fetched items are written as confirmed and become the list order.
    /// Unlisted entries survive only while the response cannot know about
    /// them: pending optimistic entries and entries pushed since
    /// [`begin_fetch`](Self::begin_fetch). They are kept in front; every other
    /// unlisted entry is evicted.
    pub fn complete_fetch(&mut self, items: Vec<T>) {
        self.refresh(items, ListEnd::Front);
    }

    /// Same as [`complete_fetch`](Self::complete_fetch) for lists shown most
    /// recent last: surviving unlisted entries are kept at the back.
    pub fn complete_fetch_appending(&mut self, items: Vec<T>) {
        self.refresh(items, ListEnd::Back);
    }

    fn refresh(&mut self, items: Vec<T>, keep_at: ListEnd) {
        let fetched: HashSet<String> = items.iter().map(|i| i.id().to_string()).collect();

        let recent = std::mem::take(&mut self.pushed_in_window);
        let survives =
            |id: &str, entry: &CacheEntry<T>| entry.is_pending() || recent.contains(id);

        let kept: Vec<String> = self
            .order
            .iter()
            .filter(|id| !fetched.contains(*id))
            .filter(|id| self.entries.get(*id).is_some_and(|e| survives(id, e)))
            .cloned()
            .collect();

        self.entries
            .retain(|id, entry| fetched.contains(id) || survives(id, entry));

        self.order.clear();
        if keep_at == ListEnd::Front {
            self.order.extend(kept.iter().cloned());
        }
        for item in items {
            let id = item.id().to_string();
            self.upsert(id.clone(), item, WriteOrigin::Confirmed);
            if !self.order.contains(&id) {
                self.order.push_back(id);
            }
        }
        if keep_at == ListEnd::Back {
            self.order.extend(kept);
        }

        self.status = ListStatus::Idle;
        self.error = None;
        debug!("{}: list refreshed with {} entries", self.kind, self.order.len());
    }
}

impl<T: Clone> EntityCache<T> {
    pub fn snapshot(&self) -> ListSnapshot<T> {
        ListSnapshot {
            items: self.ordered().map(|(_, v)| v.clone()).collect(),
            status: self.status,
            error: self.error.clone(),
        }
    }
}
