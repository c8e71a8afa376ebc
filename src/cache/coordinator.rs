//! Two cache domains over one key space
//!
//! Text (API response bodies) lives in memory only: those responses refresh
//! quickly and are cheap to refetch. Binary payloads (larger assets) are
//! written through to both memory and the persistent tier; reads try memory
//! first and promote persistent hits back into memory.
//!
//! Concurrent misses for one key may both fetch and both write; GETs are
//! idempotent, so the last equivalent write wins.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tracing::debug;

use super::entry::CacheEntry;
use super::key::CacheKey;
use super::memory::MemoryCache;
use super::tier::PersistentTier;
use crate::clock::SharedClock;
use crate::error::AppResult;

/// Entry counts and sizes for every tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatistics {
    pub text_entries: usize,
    pub text_bytes: usize,
    pub binary_memory_entries: usize,
    pub binary_memory_bytes: usize,
    pub disk_entries: usize,
    pub disk_bytes: u64,
    /// Lookups answered by either memory tier
    pub memory_hits: u64,
    pub memory_misses: u64,
    pub memory_evictions: u64,
}

/// Entries removed by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub text_expired: usize,
    pub binary_expired: usize,
    pub disk_removed: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.text_expired + self.binary_expired + self.disk_removed
    }
}

#[derive(Debug)]
pub struct CacheCoordinator {
    text: MemoryCache<String>,
    binary: MemoryCache<Bytes>,
    persistent: Arc<dyn PersistentTier>,
    clock: SharedClock,
}

impl CacheCoordinator {
    pub fn new(
        memory_max_entries: usize,
        persistent: Arc<dyn PersistentTier>,
        clock: SharedClock,
    ) -> Self {
        Self {
            text: MemoryCache::new(memory_max_entries, clock.clone()),
            binary: MemoryCache::new(memory_max_entries, clock.clone()),
            persistent,
            clock,
        }
    }

    pub fn get_text(&self, key: &CacheKey) -> AppResult<String> {
        self.text.get(key.as_str())
    }

    pub fn put_text(&self, key: &CacheKey, body: String, ttl: Option<Duration>) {
        self.text.put(key.as_str(), body, ttl);
    }

    /// Memory first, then the persistent tier
    pub async fn get_binary(&self, key: &CacheKey) -> AppResult<Bytes> {
        if let Ok(data) = self.binary.get(key.as_str()) {
            return Ok(data);
        }

        let entry = self.persistent.get(key).await?;
        let promoted = CacheEntry::new(entry.data.clone(), self.clock.now(), entry.remaining_ttl())
            .with_metadata(entry.metadata);
        self.binary.put_entry(key.as_str(), promoted);
        debug!(key = %key, "Promoted disk cache hit into memory");
        Ok(entry.data)
    }

    /// Writes to memory and the persistent tier
    ///
    /// The memory write always happens; an error from the persistent tier is
    /// returned after it.
    pub async fn put_binary(
        &self,
        key: &CacheKey,
        data: Bytes,
        ttl: Option<Duration>,
    ) -> AppResult<()> {
        self.binary.put(key.as_str(), data.clone(), ttl);
        self.persistent.put(key, data, ttl).await
    }

    /// Sweeps expired entries from every tier
    pub async fn cleanup(&self) -> AppResult<CleanupReport> {
        let text_expired = self.text.cleanup();
        let binary_expired = self.binary.cleanup();
        let disk_removed = self.persistent.cleanup().await?;
        Ok(CleanupReport {
            text_expired,
            binary_expired,
            disk_removed,
        })
    }

    pub async fn clear_all(&self) -> AppResult<()> {
        self.text.clear();
        self.binary.clear();
        let removed = self.persistent.clear().await?;
        debug!(disk_entries_removed = removed, "Cleared all caches");
        Ok(())
    }

    pub async fn statistics(&self) -> AppResult<CacheStatistics> {
        let disk = self.persistent.stats().await?;
        let text = self.text.stats();
        let binary = self.binary.stats();
        Ok(CacheStatistics {
            text_entries: self.text.len(),
            text_bytes: self.text.size_bytes(),
            binary_memory_entries: self.binary.len(),
            binary_memory_bytes: self.binary.size_bytes(),
            disk_entries: disk.entries,
            disk_bytes: disk.bytes,
            memory_hits: text.hits + binary.hits,
            memory_misses: text.misses + binary.misses,
            memory_evictions: text.evictions + binary.evictions,
        })
    }
}
