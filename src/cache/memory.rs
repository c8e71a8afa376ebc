//! Bounded in-memory LRU cache with per-entry expiry

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use super::entry::{CacheEntry, Weighted};
use crate::clock::SharedClock;
use crate::error::{AppError, AppResult};

/// Counters kept by a [`MemoryCache`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

#[derive(Debug)]
struct Slot<V> {
    entry: CacheEntry<V>,
    /// Position in the recency index
    tick: u64,
}

#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<String, Slot<V>>,
    /// Recency order, oldest tick first
    recency: BTreeMap<u64, String>,
    next_tick: u64,
    size_bytes: usize,
    stats: MemoryStats,
}

impl<V> Inner<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
            size_bytes: 0,
            stats: MemoryStats::default(),
        }
    }

    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn touch(&mut self, key: &str) {
        let tick = self.bump();
        if let Some(slot) = self.entries.get_mut(key) {
            self.recency.remove(&slot.tick);
            slot.tick = tick;
            self.recency.insert(tick, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&slot.tick);
        self.size_bytes -= slot.entry.size_bytes;
        Some(slot.entry)
    }
}

/// LRU cache bounded by entry count
///
/// Both `get` hits and `put` mark an entry most-recently-used. Ticks grow
/// monotonically, so entries never accessed since insertion are ordered by
/// insertion.
#[derive(Debug)]
pub struct MemoryCache<V> {
    max_entries: usize,
    clock: SharedClock,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone + Weighted> MemoryCache<V> {
    pub fn new(max_entries: usize, clock: SharedClock) -> Self {
        Self {
            max_entries,
            clock,
            inner: Mutex::new(Inner::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the value for `key`
    ///
    /// A miss or an expired entry yields a `Cache` error; expired entries
    /// are dropped on the way.
    pub fn get(&self, key: &str) -> AppResult<V> {
        self.get_entry(key).map(|entry| entry.data)
    }

    /// Like [`get`](Self::get) but returns the whole entry
    pub fn get_entry(&self, key: &str) -> AppResult<CacheEntry<V>> {
        let now = self.clock.now();
        let mut inner = self.lock();

        let expired = inner
            .entries
            .get(key)
            .map(|slot| slot.entry.is_expired(now));

        let Some(expired) = expired else {
            inner.stats.misses += 1;
            return Err(AppError::cache(format!("cache miss for {}", key)));
        };

        if expired {
            inner.remove(key);
            inner.stats.expirations += 1;
            inner.stats.misses += 1;
            debug!(key = %key, "Memory cache entry expired");
            return Err(AppError::cache(format!("cache entry expired for {}", key)));
        }

        inner.touch(key);
        inner.stats.hits += 1;
        match inner.entries.get(key) {
            Some(slot) => Ok(slot.entry.clone()),
            None => Err(AppError::cache(format!("cache miss for {}", key))),
        }
    }

    /// Stores `value` under `key`, replacing any previous entry
    pub fn put(&self, key: &str, value: V, ttl: Option<Duration>) {
        let entry = CacheEntry::new(value, self.clock.now(), ttl);
        self.put_entry(key, entry);
    }

    /// Stores a prepared entry under `key`
    pub fn put_entry(&self, key: &str, entry: CacheEntry<V>) {
        let mut inner = self.lock();
        inner.remove(key);

        let tick = inner.bump();
        inner.size_bytes += entry.size_bytes;
        inner.recency.insert(tick, key.to_string());
        inner.entries.insert(key.to_string(), Slot { entry, tick });

        while inner.entries.len() > self.max_entries {
            let Some((_, oldest)) = inner.recency.pop_first() else {
                break;
            };
            if let Some(slot) = inner.entries.remove(&oldest) {
                inner.size_bytes -= slot.entry.size_bytes;
                inner.stats.evictions += 1;
                debug!(key = %oldest, "Evicted least-recently-used entry from memory cache");
            }
        }
    }

    /// Removes `key`; returns whether it was present
    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Whether a live entry exists for `key`; does not affect recency
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.lock()
            .entries
            .get(key)
            .map_or(false, |slot| !slot.entry.is_expired(now))
    }

    /// Drops every expired entry and returns how many were removed
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();

        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        inner.stats.expirations += expired.len() as u64;

        if !expired.is_empty() {
            debug!(removed = expired.len(), "Swept expired memory cache entries");
        }
        expired.len()
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.recency.clear();
        inner.size_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the payload sizes currently held
    pub fn size_bytes(&self) -> usize {
        self.lock().size_bytes
    }

    pub fn stats(&self) -> MemoryStats {
        self.lock().stats
    }
}
