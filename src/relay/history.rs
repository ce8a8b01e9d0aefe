//! Per-chat conversation history with an idle TTL.
//!
//! Each chat keeps at most `max_turns` turns, newest last. Appending resets the
//! idle timer; reading does not. Expired entries are invisible immediately and
//! are removed either on access or by [`purge_expired`](ConversationCache::purge_expired).

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::relay::message::Turn;

struct HistoryEntry {
    turns: Vec<Turn>,
    touched: Instant,
}

impl HistoryEntry {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.touched) >= ttl
    }
}

/// Thread-safe conversation cache keyed by chat identifier.
#[derive(Clone)]
pub struct ConversationCache {
    entries: Arc<DashMap<String, HistoryEntry>>,
    ttl: Duration,
    max_turns: usize,
}

impl ConversationCache {
    pub fn new(ttl: Duration, max_turns: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            max_turns,
        }
    }

    /// History for a chat, oldest first. `None` if absent or expired.
    pub fn get(&self, chat_id: &str) -> Option<Vec<Turn>> {
        self.get_at(chat_id, Instant::now())
    }

    /// Append turns to a chat's history, keeping only the most recent `max_turns`.
    pub fn append(&self, chat_id: &str, turns: impl IntoIterator<Item = Turn>) {
        self.append_at(chat_id, turns, Instant::now());
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get_at(&self, chat_id: &str, now: Instant) -> Option<Vec<Turn>> {
        let entry = self.entries.get(chat_id)?;
        if entry.is_expired(now, self.ttl) {
            drop(entry);
            self.entries.remove_if(chat_id, |_, e| e.is_expired(now, self.ttl));
            debug!("History for {} expired", chat_id);
            return None;
        }
        Some(entry.turns.clone())
    }

    fn append_at(&self, chat_id: &str, turns: impl IntoIterator<Item = Turn>, now: Instant) {
        let mut entry = self
            .entries
            .entry(chat_id.to_string())
            .or_insert_with(|| HistoryEntry { turns: Vec::new(), touched: now });

        if entry.is_expired(now, self.ttl) {
            entry.turns.clear();
        }
        entry.turns.extend(turns);
        let overflow = entry.turns.len().saturating_sub(self.max_turns);
        entry.turns.drain(..overflow);
        entry.touched = now;

        debug!("History for {} now {} turns", chat_id, entry.turns.len());
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now, self.ttl));
        before.saturating_sub(self.entries.len())
    }
}
