//! Rail auth token cache
//!
//! Owned by the orchestrator and injected at construction; nothing here is
//! process-global. Entries expire after a fixed TTL.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

#[derive(Debug, Clone)]
struct Entry {
    token: String,
    expires_at: DateTime<Utc>,
}

pub struct TokenCache {
    entries: DashMap<String, Entry>,
    ttl: Duration,
}

impl TokenCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<String> {
        self.entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.token.clone())
    }

    pub fn insert(&self, key: &str, token: String, now: DateTime<Utc>) {
        self.entries.insert(
            key.to_string(),
            Entry {
                token,
                expires_at: now + self.ttl,
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop expired entries; returns how many were removed
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
