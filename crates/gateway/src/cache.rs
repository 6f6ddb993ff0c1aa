//! In-memory TTL cache.
//!
//! A plain reader-writer-locked map: entry counts stay small (an LLM result
//! cache at 120 s TTL holds at most a few hundred entries), so the simple
//! structure beats anything clever. Expired entries are dropped lazily on
//! read and swept on write.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Thread-safe string-keyed cache with per-entry expiry.
pub struct TtlCache<V> {
    entries: RwLock<HashMap<String, Entry<V>>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Constant-time lookup under concurrent readers; an expired entry is a
    /// miss and is removed.
    pub fn try_get(&self, key: &str) -> Option<V> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone())
                }
                Some(_) => {}
                None => return None,
            }
        }
        self.entries.write().remove(key);
        None
    }

    /// Upsert with the given time-to-live, sweeping other expired entries
    /// while the write lock is held.
    pub fn set(&self, key: String, value: V, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key,
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    /// Remove every entry whose key starts with `prefix`; returns how many
    /// were removed.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
