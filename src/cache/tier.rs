//! Capability interface for the persistent cache tier
//!
//! The coordinator talks to its second tier only through [`PersistentTier`].
//! [`DiskCache`] is the durable implementation; [`MemoryOnlyTier`] stands in
//! when no persistent medium is available and never holds anything.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::disk::{DiskCache, DiskEntry, TierStats};
use super::key::CacheKey;
use crate::error::{AppError, AppResult};
use crate::storage::Storage;

/// Second cache tier for binary payloads
#[async_trait]
pub trait PersistentTier: Send + Sync + fmt::Debug {
    async fn get(&self, key: &CacheKey) -> AppResult<DiskEntry>;

    async fn put(&self, key: &CacheKey, data: Bytes, ttl: Option<Duration>) -> AppResult<()>;

    async fn delete(&self, key: &CacheKey) -> AppResult<bool>;

    async fn exists(&self, key: &CacheKey) -> AppResult<bool>;

    /// Sweeps expired or damaged entries; returns how many were removed
    async fn cleanup(&self) -> AppResult<usize>;

    /// Removes everything; returns how many entries were removed
    async fn clear(&self) -> AppResult<usize>;

    async fn stats(&self) -> AppResult<TierStats>;

    /// Whether entries outlive the process
    fn is_persistent(&self) -> bool;
}

#[async_trait]
impl<S: Storage> PersistentTier for DiskCache<S> {
    async fn get(&self, key: &CacheKey) -> AppResult<DiskEntry> {
        DiskCache::get(self, key).await
    }

    async fn put(&self, key: &CacheKey, data: Bytes, ttl: Option<Duration>) -> AppResult<()> {
        DiskCache::put(self, key, &data, ttl, HashMap::new()).await
    }

    async fn delete(&self, key: &CacheKey) -> AppResult<bool> {
        DiskCache::delete(self, key).await
    }

    async fn exists(&self, key: &CacheKey) -> AppResult<bool> {
        DiskCache::exists(self, key).await
    }

    async fn cleanup(&self) -> AppResult<usize> {
        DiskCache::cleanup(self).await
    }

    async fn clear(&self) -> AppResult<usize> {
        DiskCache::clear(self).await
    }

    async fn stats(&self) -> AppResult<TierStats> {
        DiskCache::stats(self).await
    }

    fn is_persistent(&self) -> bool {
        true
    }
}

/// Persistent tier for platforms without durable storage
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryOnlyTier;

#[async_trait]
impl PersistentTier for MemoryOnlyTier {
    async fn get(&self, key: &CacheKey) -> AppResult<DiskEntry> {
        Err(AppError::cache(format!("no persistent tier for {}", key)))
    }

    async fn put(&self, _key: &CacheKey, _data: Bytes, _ttl: Option<Duration>) -> AppResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &CacheKey) -> AppResult<bool> {
        Ok(false)
    }

    async fn exists(&self, _key: &CacheKey) -> AppResult<bool> {
        Ok(false)
    }

    async fn cleanup(&self) -> AppResult<usize> {
        Ok(0)
    }

    async fn clear(&self) -> AppResult<usize> {
        Ok(0)
    }

    async fn stats(&self) -> AppResult<TierStats> {
        Ok(TierStats::default())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}
