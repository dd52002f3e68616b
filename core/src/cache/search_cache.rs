/// Search result cache and its staleness watermark
use crate::model::{SearchFilter, SearchResultSet, SearchResults};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchPhase {
    /// No query (empty text)
    #[default]
    Idle,
    /// Waiting for the quiescence window to elapse
    Debouncing,
    /// A query was dispatched and is the newest one
    InFlight,
    /// The newest query answered
    Settled,
    /// The newest query failed
    Failed,
}

/// Latest search results plus the highest sequence number issued so far.
///
/// Every state change happens under the same lock as the watermark, so a
/// response can only land while it is still the newest query.
#[derive(Debug, Clone, Default)]
pub struct SearchCache {
    query: String,
    filter: SearchFilter,
    phase: SearchPhase,
    results: SearchResultSet,
    error: Option<String>,
    highest_seq: u64,
    /// Bumped on every input change (keystroke, filter toggle, clear)
    revision: u64,
}

impl SearchCache {
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn filter(&self) -> SearchFilter {
        self.filter
    }

    pub fn phase(&self) -> SearchPhase {
        self.phase
    }

    pub fn results(&self) -> &SearchResultSet {
        &self.results
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn highest_seq(&self) -> u64 {
        self.highest_seq
    }

    pub fn is_current(&self, seq: u64) -> bool {
        seq == self.highest_seq
    }

    /// Record new input waiting out the quiescence window; returns its revision
    pub fn begin_debounce(&mut self, query: &str, filter: SearchFilter) -> u64 {
        self.revision += 1;
        self.query = query.to_string();
        self.filter = filter;
        self.phase = SearchPhase::Debouncing;
        self.revision
    }

    /// Dispatch the pending input if `revision` is still the latest one.
    /// Returns the new sequence number with the query and filter to send.
    pub fn dispatch_pending(&mut self, revision: u64) -> Option<(u64, String, SearchFilter)> {
        if revision != self.revision || self.phase != SearchPhase::Debouncing {
            return None;
        }
        let query = self.query.clone();
        let filter = self.filter;
        let seq = self.dispatch(&query, filter);
        Some((seq, query, filter))
    }

    /// Issue the next sequence number for a dispatched query
    pub fn dispatch(&mut self, query: &str, filter: SearchFilter) -> u64 {
        self.highest_seq += 1;
        self.query = query.to_string();
        self.filter = filter;
        self.phase = SearchPhase::InFlight;
        self.error = None;
        self.highest_seq
    }

    /// Store results for `seq`; false (and nothing written) when stale
    pub fn settle(&mut self, seq: u64, results: SearchResults) -> bool {
        if !self.is_current(seq) {
            return false;
        }
        self.results = SearchResultSet {
            seq,
            results: results.narrowed(self.filter),
        };
        self.error = None;
        // newer input waiting to dispatch keeps its phase
        if self.phase != SearchPhase::Debouncing {
            self.phase = SearchPhase::Settled;
        }
        true
    }

    /// Record a failure for `seq`; previous results stay visible
    pub fn fail(&mut self, seq: u64, message: impl Into<String>) -> bool {
        if !self.is_current(seq) {
            return false;
        }
        self.error = Some(message.into());
        if self.phase != SearchPhase::Debouncing {
            self.phase = SearchPhase::Failed;
        }
        true
    }

    /// Back to idle with no results. The watermark advances so responses to
    /// anything dispatched earlier are treated as stale.
    pub fn clear(&mut self) {
        self.revision += 1;
        self.highest_seq += 1;
        self.query.clear();
        self.filter = SearchFilter::default();
        self.phase = SearchPhase::Idle;
        self.results = SearchResultSet {
            seq: self.highest_seq,
            results: SearchResults::default(),
        };
        self.error = None;
    }
}
