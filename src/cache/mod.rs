//! Two-tier response cache
//!
//! A bounded in-memory LRU tier with per-entry expiry sits in front of a
//! size-bounded persistent tier on disk. Both tiers address entries by the
//! same [`CacheKey`] fingerprint; the [`CacheCoordinator`] decides which tiers
//! a payload type uses.

mod coordinator;
mod disk;
mod entry;
mod key;
mod memory;
mod tier;

pub use coordinator::{CacheCoordinator, CacheStatistics, CleanupReport};
pub use disk::{DiskCache, DiskEntry, TierStats};
pub use entry::{CacheEntry, Weighted};
pub use key::CacheKey;
pub use memory::{MemoryCache, MemoryStats};
pub use tier::{MemoryOnlyTier, PersistentTier};
