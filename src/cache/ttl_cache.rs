// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Generic time-to-live cache.
//!
//! Entries are immutable once inserted: the payload and `loaded_at` never
//! change. A reload or modification swaps in a whole new entry, so a reader
//! racing a sweep or a replace sees either the old entry or the new one, never
//! a half-written payload. Only `last_accessed` is updated in place.
//!
//! Readers always get a clone of the payload, never a reference into the map.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::identity::EntityId;
use crate::metrics;

/// Cached payload with its load metadata
#[derive(Debug)]
pub struct CacheEntry<V> {
    payload: V,
    owner: EntityId,
    loaded_at: Instant,
    last_accessed: Mutex<Instant>,
}

impl<V: Clone> CacheEntry<V> {
    fn new(owner: EntityId, payload: V) -> Self {
        let now = Instant::now();
        Self {
            payload,
            owner,
            loaded_at: now,
            last_accessed: Mutex::new(now),
        }
    }

    /// Same owner and `loaded_at`, new payload.
    fn with_payload(&self, payload: V) -> Self {
        Self {
            payload,
            owner: self.owner,
            loaded_at: self.loaded_at,
            last_accessed: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_accessed.lock() = Instant::now();
    }

    pub fn payload(&self) -> V {
        self.payload.clone()
    }

    pub fn owner(&self) -> EntityId {
        self.owner
    }

    pub fn loaded_at(&self) -> Instant {
        self.loaded_at
    }

    pub fn last_accessed(&self) -> Instant {
        *self.last_accessed.lock()
    }

    /// Age is measured from load, not from last access.
    pub fn age(&self) -> Duration {
        self.loaded_at.elapsed()
    }

    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.age() > max_age
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Present but too old to serve
    pub stale: u64,
    pub evictions: u64,
    pub entry_count: usize,
}

impl CacheStats {
    /// Hit rate (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses + self.stale;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

pub struct TtlCache<K, V> {
    name: &'static str,
    entries: DashMap<K, Arc<CacheEntry<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// `name` labels this cache's metrics.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Copy of the payload, bumping `last_accessed`.
    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.entries.get(key).map(|r| Arc::clone(r.value()));
        metrics::record_cache_lookup(self.name, entry.is_some());
        match entry {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                entry.touch();
                Some(entry.payload())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Like [`get`](Self::get), but an entry older than `max_age` counts as absent.
    pub fn get_fresh(&self, key: &K, max_age: Duration) -> Option<V> {
        let entry = self.entries.get(key).map(|r| Arc::clone(r.value()));
        match entry {
            Some(entry) if !entry.is_stale(max_age) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup(self.name, true);
                entry.touch();
                Some(entry.payload())
            }
            Some(_) => {
                self.stale.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup(self.name, false);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup(self.name, false);
                None
            }
        }
    }

    /// Bump `last_accessed` without copying. Returns whether the key was present.
    pub fn touch(&self, key: &K) -> bool {
        match self.entries.get(key) {
            Some(entry) => {
                entry.touch();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn entry(&self, key: &K) -> Option<Arc<CacheEntry<V>>> {
        self.entries.get(key).map(|r| Arc::clone(r.value()))
    }

    /// Store a freshly loaded payload (`loaded_at = now`), replacing any previous entry.
    pub fn insert(&self, key: K, owner: EntityId, payload: V) {
        self.entries.insert(key, Arc::new(CacheEntry::new(owner, payload)));
        metrics::set_cache_entries(self.name, self.entries.len());
    }

    /// Swap in `f(copy)` as the payload, keeping `loaded_at`. Returns the new
    /// payload, or `None` if the key is absent.
    pub fn replace_with<F>(&self, key: &K, f: F) -> Option<V>
    where
        F: FnOnce(V) -> V,
    {
        let mut slot = self.entries.get_mut(key)?;
        let next = f(slot.payload());
        let replacement = Arc::new(slot.with_payload(next.clone()));
        *slot = replacement;
        Some(next)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let removed = self.entries.remove(key).map(|(_, entry)| entry.payload());
        metrics::set_cache_entries(self.name, self.entries.len());
        removed
    }

    /// Drop entries loaded more than `max_age` ago. Returns how many went.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let mut evicted = 0;
        self.entries.retain(|_, entry| {
            let stale = entry.is_stale(max_age);
            evicted += usize::from(stale);
            !stale
        });

        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            metrics::record_cache_eviction(self.name, evicted);
        }
        metrics::set_cache_entries(self.name, self.entries.len());
        evicted
    }

    pub fn clear(&self) {
        self.entries.clear();
        metrics::set_cache_entries(self.name, 0);
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entry_count: self.entries.len(),
        }
    }
}
