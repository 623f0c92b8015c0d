use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Byte-oriented object cache shared between query instances (and, for a networked
/// implementation, between processes).
pub trait SharedCache: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Option<Vec<u8>>;
    fn set(&self, namespace: &str, key: &str, value: Vec<u8>);
    /// Drop every entry of `namespace`.
    fn invalidate(&self, namespace: &str);
}

/// In-process [`SharedCache`] with least-recently-used eviction.
#[derive(Debug)]
pub struct MemoryCache {
    entries: Mutex<LruCache<(String, String), Vec<u8>>>,
}

impl MemoryCache {
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache mutex poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl SharedCache for MemoryCache {
    fn get(&self, namespace: &str, key: &str) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
    }

    fn set(&self, namespace: &str, key: &str, value: Vec<u8>) {
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .put((namespace.to_string(), key.to_string()), value);
    }

    fn invalidate(&self, namespace: &str) {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        let stale: Vec<_> = entries
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            entries.pop(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let cache = MemoryCache::new(2);
        cache.set("ns", "a", b"1".to_vec());
        cache.set("ns", "b", b"2".to_vec());
        assert_eq!(cache.get("ns", "a"), Some(b"1".to_vec()));

        cache.set("ns", "c", b"3".to_vec());
        assert_eq!(cache.get("ns", "b"), None);
        assert_eq!(cache.get("ns", "a"), Some(b"1".to_vec()));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn invalidate_only_touches_one_namespace() {
        let cache = MemoryCache::default();
        cache.set("hive.metadata", "k", b"x".to_vec());
        cache.set("other", "k", b"y".to_vec());

        cache.invalidate("hive.metadata");
        assert_eq!(cache.get("hive.metadata", "k"), None);
        assert_eq!(cache.get("other", "k"), Some(b"y".to_vec()));
    }

    #[test]
    fn zero_capacity_still_holds_one_entry() {
        let cache = MemoryCache::new(0);
        cache.set("ns", "k", Vec::new());
        assert!(!cache.is_empty());
    }
}
