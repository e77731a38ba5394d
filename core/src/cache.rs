use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Bounded LRU cache whose entries expire a fixed time after their last access.
///
/// Nothing invalidates entries when the underlying data changes; readers may see
/// values up to `ttl` old.
pub struct TtlLruCache<K, V> {
    capacity: usize,
    ttl: Duration,
    inner: Mutex<Inner<K, V>>,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    /// access tick -> key, oldest first
    order: BTreeMap<u64, K>,
    tick: u64,
}

struct Entry<V> {
    value: V,
    touched: Instant,
    tick: u64,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlLruCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            inner: Mutex::new(Inner { entries: HashMap::new(), order: BTreeMap::new(), tick: 0 }),
        }
    }

    /// Get a value, refreshing its recency and expiry.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let now = Instant::now();
        let entry = inner.entries.get_mut(key)?;
        if now.duration_since(entry.touched) >= self.ttl {
            inner.order.remove(&entry.tick);
            inner.entries.remove(key);
            return None;
        }
        inner.order.remove(&entry.tick);
        inner.tick += 1;
        entry.tick = inner.tick;
        entry.touched = now;
        inner.order.insert(inner.tick, key.clone());
        Some(entry.value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.tick += 1;
        let tick = inner.tick;
        if let Some(old) = inner.entries.remove(&key) {
            inner.order.remove(&old.tick);
        }
        while inner.entries.len() >= self.capacity {
            match inner.order.pop_first() {
                Some((_, oldest)) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
        inner.order.insert(tick, key.clone());
        inner.entries.insert(key, Entry { value, touched: Instant::now(), tick });
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.remove(key)?;
        inner.order.remove(&entry.tick);
        Some(entry.value)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Entry count, including expired entries not yet dropped.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn evicts_least_recently_used() {
        let cache = TtlLruCache::new(2, Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);
        // touch "a" so "b" becomes the oldest
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("c", 3);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn reinsert_replaces_without_growing() {
        let cache = TtlLruCache::new(2, Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("a", 5);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"a"), Some(5));
    }

    #[test]
    fn entries_expire_after_idle_ttl() {
        let cache = TtlLruCache::new(4, Duration::from_millis(40));
        cache.insert("a", 1);
        sleep(Duration::from_millis(60));
        assert_eq!(cache.get(&"a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn access_extends_lifetime() {
        let cache = TtlLruCache::new(4, Duration::from_millis(150));
        cache.insert("a", 1);
        for _ in 0..4 {
            sleep(Duration::from_millis(60));
            assert_eq!(cache.get(&"a"), Some(1));
        }
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let cache = TtlLruCache::new(0, Duration::from_secs(1));
        cache.insert(1, 1);
        assert_eq!(cache.get(&1), None);
    }

    #[test]
    fn remove_and_clear() {
        let cache = TtlLruCache::new(4, Duration::from_secs(60));
        cache.insert(1, "x");
        cache.insert(2, "y");
        assert_eq!(cache.remove(&1), Some("x"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
