//! A small LRU cache with per-entry expiry.
//!
//! Sized for a few hundred entries (one per distinct access set), so
//! eviction does a plain scan instead of maintaining a recency list.
//! Expiry is lazy: entries are checked on access.

use hashbrown::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

struct Entry<V> {
    value: V,
    expires_at: Instant,
    last_used: u64,
}

pub(crate) struct ExpiringLru<K, V> {
    name: &'static str,
    capacity: usize,
    log_size: bool,
    tick: u64,
    entries: HashMap<K, Entry<V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> ExpiringLru<K, V> {
    pub fn new(name: &'static str, capacity: usize, log_size: bool) -> Self {
        ExpiringLru {
            name,
            capacity: capacity.max(1),
            log_size,
            tick: 0,
            entries: HashMap::new(),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        if self.entries.get(key)?.expires_at <= Instant::now() {
            self.entries.remove(key);
            return None;
        }
        self.tick += 1;
        let entry = self.entries.get_mut(key)?;
        entry.last_used = self.tick;
        Some(entry.value.clone())
    }

    pub fn insert(&mut self, key: K, value: V, ttl: Duration) {
        self.tick += 1;
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_one();
        }
        self.entries.insert(key, Entry {
            value,
            expires_at: Instant::now() + ttl,
            last_used: self.tick,
        });
        if self.log_size {
            debug!(cache = self.name, size = self.entries.len(), "cache size");
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|e| e.value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Prefer an expired entry, otherwise the least recently used.
    fn evict_one(&mut self) {
        let now = Instant::now();
        let victim = self
            .entries
            .iter()
            .find(|(_, e)| e.expires_at <= now)
            .or_else(|| self.entries.iter().min_by_key(|(_, e)| e.last_used))
            .map(|(k, _)| k.clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn evicts_least_recently_used_at_capacity() {
        let mut lru = ExpiringLru::new("test", 2, false);
        lru.insert("a", 1, TTL);
        lru.insert("b", 2, TTL);
        assert_eq!(lru.get(&"a"), Some(1));
        lru.insert("c", 3, TTL);
        assert_eq!(lru.len(), 2);
        assert_eq!(lru.get(&"b"), None);
        assert_eq!(lru.get(&"a"), Some(1));
        assert_eq!(lru.get(&"c"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let mut lru = ExpiringLru::new("test", 4, false);
        lru.insert("a", 1, Duration::from_secs(1));
        assert_eq!(lru.get(&"a"), Some(1));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(lru.get(&"a"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_evicted_first() {
        let mut lru = ExpiringLru::new("test", 2, false);
        lru.insert("short", 1, Duration::from_secs(1));
        lru.insert("long", 2, TTL);
        // "short" is the oldest but also expired; "long" must survive even
        // though it is less recently used than a fresh insert
        tokio::time::advance(Duration::from_secs(2)).await;
        lru.get(&"long");
        lru.insert("new", 3, TTL);
        assert_eq!(lru.get(&"long"), Some(2));
        assert_eq!(lru.get(&"new"), Some(3));
    }
}
