//! Result cache - bounded LRU map from key to computed value.
//!
//! Remembering results lets repeated requests for the same key skip the
//! batch function entirely.

use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::error::{BatchError, BatchResult};

/// Bounded, thread-safe LRU cache of batch results.
///
/// Lookups refresh recency. Inserting into a full cache evicts the
/// least-recently-used entry.
pub struct ResultCache<K: Hash + Eq, V> {
    entries: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq, V> ResultCache<K, V> {
    /// Creates a cache holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Creates a cache from a plain capacity.
    ///
    /// # Errors
    ///
    /// Returns `BatchError::InvalidConfig` if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> BatchResult<Self> {
        NonZeroUsize::new(capacity)
            .map(Self::new)
            .ok_or_else(|| BatchError::invalid_config("cache_size must be > 0"))
    }

    /// Returns the cached value for `key`, marking it most recently used.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.entries.lock().get(key).cloned()
    }

    /// Inserts or replaces a value.
    ///
    /// Returns true if another entry was evicted to make room.
    pub fn insert(&self, key: K, value: V) -> bool {
        let mut entries = self.entries.lock();

        let evicted = !entries.contains(&key)
            && entries.len() >= entries.cap().get()
            && entries.pop_lru().is_some();

        entries.put(key, value);
        evicted
    }

    /// Returns true if `key` is cached. Does not affect recency.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.entries.lock().contains(key)
    }

    /// Returns the number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns the maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }
}

impl<K: Hash + Eq, V> std::fmt::Debug for ResultCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("ResultCache")
            .field("len", &entries.len())
            .field("capacity", &entries.cap())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> ResultCache<u32, String> {
        ResultCache::with_capacity(capacity).unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let cache = cache(4);
        assert!(cache.is_empty());

        assert!(!cache.insert(1, "one".to_string()));

        assert_eq!(cache.get(&1), Some("one".to_string()));
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(ResultCache::<u32, u32>::with_capacity(0)
            .unwrap_err()
            .is_config());
    }

    #[test]
    fn test_eviction() {
        let cache = cache(2);

        cache.insert(1, "one".to_string());
        cache.insert(2, "two".to_string());
        assert_eq!(cache.len(), 2);

        // Adding a third entry should evict the oldest (key 1).
        assert!(cache.insert(3, "three".to_string()));
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&1));
        assert!(cache.contains(&2));
        assert!(cache.contains(&3));
    }

    #[test]
    fn test_get_refreshes_recency() {
        let cache = cache(2);

        cache.insert(1, "one".to_string());
        cache.insert(2, "two".to_string());

        // Touch key 1 so key 2 becomes least recently used.
        assert!(cache.get(&1).is_some());
        cache.insert(3, "three".to_string());

        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
    }

    #[test]
    fn test_update_existing() {
        let cache = cache(2);

        cache.insert(1, "one".to_string());
        cache.insert(2, "two".to_string());
        assert!(!cache.insert(1, "uno".to_string()), "replacing must not evict");

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1), Some("uno".to_string()));
        assert_eq!(cache.capacity(), 2);
    }
}
