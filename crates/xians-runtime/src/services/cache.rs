//! In-process TTL cache
//!
//! Thread-safe, insertion-order irrelevant, invalidated by mutating
//! operations. Disabled caches are pass-through.

use std::hash::Hash;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::options::CacheEntryOptions;

pub struct TtlCache<K, V> {
    entries: DashMap<K, (Instant, V)>,
    ttl: Duration,
    enabled: bool,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(options: &CacheEntryOptions) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: options.ttl,
            enabled: options.enabled,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        if !self.enabled {
            return None;
        }
        let entry = self.entries.get(key)?;
        let (inserted_at, value) = entry.value();
        if inserted_at.elapsed() >= self.ttl {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        if self.enabled {
            self.entries.insert(key, (Instant::now(), value));
        }
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(enabled: bool, ttl: Duration) -> CacheEntryOptions {
        CacheEntryOptions { enabled, ttl }
    }

    #[test]
    fn test_hit_and_invalidate() {
        let cache = TtlCache::new(&options(true, Duration::from_secs(60)));
        cache.insert("k", 1);

        assert_eq!(cache.get(&"k"), Some(1));
        cache.invalidate(&"k");
        assert_eq!(cache.get(&"k"), None);
    }

    #[test]
    fn test_expiry() {
        let cache = TtlCache::new(&options(true, Duration::ZERO));
        cache.insert("k", 1);
        assert_eq!(cache.get(&"k"), None);
    }

    #[test]
    fn test_disabled_cache_is_pass_through() {
        let cache = TtlCache::new(&options(false, Duration::from_secs(60)));
        cache.insert("k", 1);
        assert_eq!(cache.get(&"k"), None);
    }
}
