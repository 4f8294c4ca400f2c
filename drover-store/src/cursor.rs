//! Bridge-cursor rows: resumption state for the accounting poller.

use std::collections::VecDeque;

use ahash::AHashSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bounded window of recently ingested record hashes.
///
/// FIFO eviction: once capacity is reached the oldest hash falls out.
/// The window is persisted with its cursor row, so replay protection
/// survives restarts alongside the cursor itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "SeenWindowRepr", into = "SeenWindowRepr")]
pub struct SeenWindow {
    capacity: usize,
    order: VecDeque<String>,
    index: AHashSet<String>,
}

impl SeenWindow {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            index: AHashSet::new(),
        }
    }

    #[must_use]
    pub fn contains(&self, hash: &str) -> bool {
        self.index.contains(hash)
    }

    /// Record a hash, evicting the oldest entry when over capacity.
    /// Returns `false` when the hash was already present.
    pub fn insert(&mut self, hash: String) -> bool {
        if !self.index.insert(hash.clone()) {
            return false;
        }
        self.order.push_back(hash);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.index.remove(&evicted);
            }
        }
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for SeenWindow {
    fn default() -> Self {
        Self::new(default_seen_capacity())
    }
}

const fn default_seen_capacity() -> usize {
    50_000
}

/// Serialised form: the index is rebuilt from the ordered list on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SeenWindowRepr {
    capacity: usize,
    hashes: Vec<String>,
}

impl From<SeenWindowRepr> for SeenWindow {
    fn from(repr: SeenWindowRepr) -> Self {
        let mut window = Self::new(repr.capacity);
        for hash in repr.hashes {
            window.insert(hash);
        }
        window
    }
}

impl From<SeenWindow> for SeenWindowRepr {
    fn from(window: SeenWindow) -> Self {
        Self {
            capacity: window.capacity,
            hashes: window.order.into_iter().collect(),
        }
    }
}

/// One durable row per ingestion source kind; the single source of
/// truth for where the poller resumes after a restart.
///
/// Counters only ever grow; `cursor_token` is replaced wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeCursorState {
    pub source_kind: String,
    pub cursor_token: Option<String>,
    pub last_poll_time: Option<DateTime<Utc>>,
    pub events_received: u64,
    pub events_ingested: u64,
    pub duplicates_dropped: u64,
    pub job_not_found: u64,
    pub db_write_failures: u64,
    pub last_error: Option<String>,
    #[serde(default)]
    pub seen: SeenWindow,
}

impl BridgeCursorState {
    #[must_use]
    pub fn new(source_kind: impl Into<String>) -> Self {
        Self {
            source_kind: source_kind.into(),
            cursor_token: None,
            last_poll_time: None,
            events_received: 0,
            events_ingested: 0,
            duplicates_dropped: 0,
            job_not_found: 0,
            db_write_failures: 0,
            last_error: None,
            seen: SeenWindow::default(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_seen_window_dedup() {
        let mut window = SeenWindow::new(10);
        assert!(window.insert("a".to_string()));
        assert!(!window.insert("a".to_string()));
        assert!(window.contains("a"));
        assert!(!window.contains("b"));
    }

    #[test]
    fn test_seen_window_evicts_oldest() {
        let mut window = SeenWindow::new(2);
        window.insert("a".to_string());
        window.insert("b".to_string());
        window.insert("c".to_string());
        assert!(!window.contains("a"));
        assert!(window.contains("b"));
        assert!(window.contains("c"));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_seen_window_survives_serde_roundtrip() {
        let mut window = SeenWindow::new(10);
        window.insert("a".to_string());
        window.insert("b".to_string());

        let json = serde_json::to_string(&window).unwrap();
        let restored: SeenWindow = serde_json::from_str(&json).unwrap();
        assert!(restored.contains("a"));
        assert!(restored.contains("b"));
        assert!(!restored.contains("c"));
    }

    #[test]
    fn test_cursor_state_roundtrip() {
        let mut state = BridgeCursorState::new("acct");
        state.cursor_token = Some("file:3:120".to_string());
        state.events_received = 120;
        state.seen.insert("hash1".to_string());

        let json = serde_json::to_string(&state).unwrap();
        let restored: BridgeCursorState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.cursor_token.as_deref(), Some("file:3:120"));
        assert_eq!(restored.events_received, 120);
        assert!(restored.seen.contains("hash1"));
    }
}
