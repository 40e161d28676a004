//! Bounded LRU memoization table.
//!
//! A deliberately small, explicit structure: fixed capacity,
//! least-recently-used eviction, and hit/miss counters so tests can
//! assert cache transparency (enabling or disabling the cache changes
//! call counts, never results). Capacity zero degrades to a
//! pass-through that stores nothing — never an error.

use std::collections::HashMap;
use std::hash::Hash;

/// Introspection snapshot of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Maximum number of entries.
    pub capacity: usize,
    /// Current number of entries.
    pub len: usize,
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that fell through to recomputation.
    pub misses: u64,
}

/// Bounded LRU cache.
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    capacity: usize,
    entries: HashMap<K, Entry<V>>,
    clock: u64,
    hits: u64,
    misses: u64,
}

#[derive(Debug)]
struct Entry<V> {
    stamp: u64,
    value: V,
}

impl<K: Eq + Hash + Clone, V> BoundedCache<K, V> {
    /// Create a cache holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity.min(1024)),
            clock: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Maximum number of entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lookups answered from the cache so far.
    #[must_use]
    pub const fn hits(&self) -> u64 {
        self.hits
    }

    /// Lookups that missed so far.
    #[must_use]
    pub const fn misses(&self) -> u64 {
        self.misses
    }

    /// Introspection snapshot.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            capacity: self.capacity,
            len: self.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }

    /// Look up a key, refreshing its recency on a hit.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.clock += 1;
        let clock = self.clock;
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.stamp = clock;
                self.hits += 1;
                Some(&entry.value)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert a value, evicting the least-recently-used entry when at
    /// capacity. A zero-capacity cache stores nothing.
    pub fn insert(&mut self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        self.clock += 1;
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.stamp)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(
            key,
            Entry {
                stamp: self.clock,
                value,
            },
        );
    }

    /// Drop every entry, keeping the hit/miss counters.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
