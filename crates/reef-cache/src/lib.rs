//! Bounded least-recently-used cache.
//!
//! Used by the log for decoded blocks and by the trie for decoded nodes.
//! Entries are counted, not sized: a capacity of `n` keeps at most `n`
//! entries. A capacity of 0 disables caching entirely, turning every
//! [`Cache::get`] into a miss and every [`Cache::put`] into a no-op, so the
//! caller always falls through to the backing store.

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Mutex;

use tracing::trace;

/// Thread-safe LRU cache.
///
/// All operations acquire a single lock. The critical section is pure
/// in-memory work with no IO.
pub struct Cache<K, V> {
    capacity: usize,
    inner: Mutex<CacheInner<K, V>>,
}

struct CacheInner<K, V> {
    /// Value plus the tick of its last access.
    entries: HashMap<K, (V, u64)>,
    /// Access order: smallest tick = eviction candidate.
    order: BTreeMap<u64, K>,
    tick: u64,
    hits: u64,
    misses: u64,
}

/// Hit/miss counters for a [`Cache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                tick: 0,
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Whether this cache stores anything at all.
    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up an entry and promote it to most-recently-used.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        if self.capacity == 0 {
            return None;
        }

        let mut guard = self.inner.lock().expect("cache lock poisoned");
        let inner = &mut *guard;
        inner.tick += 1;
        let tick = inner.tick;

        let Some((value, last)) = inner.entries.get_mut(key) else {
            inner.misses += 1;
            return None;
        };
        let previous = std::mem::replace(last, tick);
        let value = value.clone();

        if let Some(owned) = inner.order.remove(&previous) {
            inner.order.insert(tick, owned);
        }
        inner.hits += 1;
        Some(value)
    }

    /// Insert an entry, evicting the least recently used ones if full.
    pub fn put(&self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }

        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.tick += 1;
        let tick = inner.tick;

        if let Some((_, previous)) = inner.entries.insert(key.clone(), (value, tick)) {
            inner.order.remove(&previous);
        }
        inner.order.insert(tick, key);

        while inner.entries.len() > self.capacity {
            let Some((_, evicted)) = inner.order.pop_first() else {
                break;
            };
            inner.entries.remove(&evicted);
            trace!(capacity = self.capacity, "evicted cache entry");
        }
    }

    /// Remove an entry.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let (value, tick) = inner.entries.remove(key)?;
        inner.order.remove(&tick);
        Some(value)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.entries.clear();
        inner.order.clear();
    }

    /// Current number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("cache lock poisoned");
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            len: inner.entries.len(),
        }
    }
}
