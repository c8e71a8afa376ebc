//! Persistent, size-bounded cache tier
//!
//! Each entry is a pair of objects named after the SHA-256 digest of its
//! [`CacheKey`]: `<digest>.bin` holds the payload and `<digest>.meta.json`
//! holds a [`DiskMeta`] record. The payload is written first and the metadata
//! last, so metadata acts as the commit marker: a pair missing either half,
//! or whose payload does not match the recorded checksum, is treated as a
//! miss and both halves are deleted.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::key::CacheKey;
use crate::error::{AppError, AppResult};
use crate::storage::{ObjectInfo, Storage};

const PAYLOAD_SUFFIX: &str = ".bin";
const META_SUFFIX: &str = ".meta.json";

/// Eviction stops once usage is at or below this share of the limit
const EVICTION_TARGET_PERCENT: u64 = 80;

/// Metadata record stored next to each payload
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DiskMeta {
    /// Fingerprint the entry was stored under
    key: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    expires_at: Option<DateTime<Utc>>,
    /// Payload length in bytes
    size_bytes: u64,
    /// Hex SHA-256 of the payload
    sha256: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl DiskMeta {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |expires_at| now >= expires_at)
    }
}

/// An entry read back from disk
#[derive(Debug, Clone)]
pub struct DiskEntry {
    pub data: Bytes,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
}

impl DiskEntry {
    /// Time left before expiry; `None` for entries that never expire
    pub fn remaining_ttl(&self) -> Option<Duration> {
        self.expires_at.map(|expires_at| {
            (expires_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }
}

/// Entry count and bytes used by a persistent tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub entries: usize,
    pub bytes: u64,
}

enum Lookup {
    Hit(DiskEntry),
    Miss,
    Expired,
    Corrupt(&'static str),
}

/// Both halves of an entry as found in storage
#[derive(Debug, Default)]
struct EntryFiles {
    payload: Option<ObjectInfo>,
    meta: Option<ObjectInfo>,
}

impl EntryFiles {
    fn len(&self) -> u64 {
        self.payload.map_or(0, |p| p.len) + self.meta.map_or(0, |m| m.len)
    }

    fn modified(&self) -> Option<std::time::SystemTime> {
        match (self.payload, self.meta) {
            (Some(p), Some(m)) => Some(p.modified.max(m.modified)),
            (Some(p), None) => Some(p.modified),
            (None, Some(m)) => Some(m.modified),
            (None, None) => None,
        }
    }
}

fn payload_id(digest: &str) -> String {
    format!("{}{}", digest, PAYLOAD_SUFFIX)
}

fn meta_id(digest: &str) -> String {
    format!("{}{}", digest, META_SUFFIX)
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Disk-backed cache bounded by total stored bytes
///
/// Reads share a lock; writes, deletes and sweeps take it exclusively.
#[derive(Debug)]
pub struct DiskCache<S> {
    storage: S,
    max_size_bytes: u64,
    lock: RwLock<()>,
}

impl<S: Storage> DiskCache<S> {
    pub fn new(storage: S, max_size_bytes: u64) -> Self {
        Self {
            storage,
            max_size_bytes,
            lock: RwLock::new(()),
        }
    }

    /// Reads the entry for `key`
    ///
    /// Misses, expired entries and damaged entries all yield a `Cache` error;
    /// expired and damaged entries are deleted.
    pub async fn get(&self, key: &CacheKey) -> AppResult<DiskEntry> {
        let digest = key.digest();
        let lookup = {
            let _read = self.lock.read().await;
            self.lookup(&digest, key, true).await?
        };

        match lookup {
            Lookup::Hit(entry) => Ok(entry),
            Lookup::Miss => Err(AppError::cache(format!("disk cache miss for {}", key))),
            Lookup::Expired | Lookup::Corrupt(_) => {
                let _write = self.lock.write().await;
                // Another writer may have replaced the entry in between
                match self.lookup(&digest, key, true).await? {
                    Lookup::Hit(entry) => Ok(entry),
                    Lookup::Miss => Err(AppError::cache(format!("disk cache miss for {}", key))),
                    Lookup::Expired => {
                        self.remove_pair(&digest).await?;
                        debug!(key = %key, "Disk cache entry expired");
                        Err(AppError::cache(format!("disk cache entry expired for {}", key)))
                    }
                    Lookup::Corrupt(reason) => {
                        self.remove_pair(&digest).await?;
                        warn!(key = %key, reason, "Discarded damaged disk cache entry");
                        Err(AppError::cache(format!(
                            "disk cache entry for {} was damaged: {}",
                            key, reason
                        )))
                    }
                }
            }
        }
    }

    /// Stores `data` under `key` and then enforces the size limit
    pub async fn put(
        &self,
        key: &CacheKey,
        data: &[u8],
        ttl: Option<Duration>,
        metadata: HashMap<String, String>,
    ) -> AppResult<()> {
        let digest = key.digest();
        let now = Utc::now();
        // A ttl past chrono's range is stored as "never expires"
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| now.checked_add_signed(ttl));
        let meta = DiskMeta {
            key: key.as_str().to_string(),
            created_at: now,
            expires_at,
            size_bytes: data.len() as u64,
            sha256: sha256_hex(data),
            metadata,
        };
        let meta_json = serde_json::to_vec_pretty(&meta)?;

        let _write = self.lock.write().await;
        self.storage.write(&payload_id(&digest), data).await?;
        self.storage.write(&meta_id(&digest), &meta_json).await?;
        debug!(key = %key, bytes = data.len(), "Wrote disk cache entry");

        self.enforce_size_limit().await?;
        Ok(())
    }

    /// Deletes the entry for `key`; returns whether anything was removed
    pub async fn delete(&self, key: &CacheKey) -> AppResult<bool> {
        let _write = self.lock.write().await;
        self.remove_pair(&key.digest()).await
    }

    /// Whether a live, intact entry exists for `key`
    pub async fn exists(&self, key: &CacheKey) -> AppResult<bool> {
        let _read = self.lock.read().await;
        Ok(matches!(
            self.lookup(&key.digest(), key, false).await?,
            Lookup::Hit(_)
        ))
    }

    /// Total bytes stored, payloads and metadata included
    pub async fn size(&self) -> AppResult<u64> {
        Ok(self.stats().await?.bytes)
    }

    pub async fn stats(&self) -> AppResult<TierStats> {
        let _read = self.lock.read().await;
        let entries = self.scan().await?;
        Ok(TierStats {
            entries: entries.values().filter(|files| files.meta.is_some()).count(),
            bytes: entries.values().map(EntryFiles::len).sum(),
        })
    }

    /// Removes expired entries, entries with unreadable metadata, and
    /// orphaned halves; returns the number of entries removed
    pub async fn cleanup(&self) -> AppResult<usize> {
        let _write = self.lock.write().await;
        let now = Utc::now();
        let mut removed = 0;

        for (digest, files) in self.scan().await? {
            let reason = match (files.payload, files.meta) {
                (None, _) | (_, None) => Some("incomplete"),
                (Some(_), Some(_)) => match self.storage.read(&meta_id(&digest)).await? {
                    None => Some("incomplete"),
                    Some(raw) => match serde_json::from_slice::<DiskMeta>(&raw) {
                        Err(_) => Some("unreadable metadata"),
                        Ok(meta) if meta.is_expired(now) => Some("expired"),
                        Ok(_) => None,
                    },
                },
            };

            if let Some(reason) = reason {
                self.remove_pair(&digest).await?;
                debug!(digest = %digest, reason, "Swept disk cache entry");
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "Disk cache cleanup finished");
        }
        Ok(removed)
    }

    /// Deletes every entry; returns how many were removed
    pub async fn clear(&self) -> AppResult<usize> {
        let _write = self.lock.write().await;
        let entries = self.scan().await?;
        for digest in entries.keys() {
            self.remove_pair(digest).await?;
        }
        Ok(entries.len())
    }

    async fn lookup(&self, digest: &str, key: &CacheKey, verify: bool) -> AppResult<Lookup> {
        let Some(raw_meta) = self.storage.read(&meta_id(digest)).await? else {
            return Ok(match self.storage.stat(&payload_id(digest)).await? {
                Some(_) => Lookup::Corrupt("missing metadata"),
                None => Lookup::Miss,
            });
        };

        let meta: DiskMeta = match serde_json::from_slice(&raw_meta) {
            Ok(meta) => meta,
            Err(_) => return Ok(Lookup::Corrupt("unreadable metadata")),
        };
        if meta.key != key.as_str() {
            return Ok(Lookup::Corrupt("key mismatch"));
        }
        if meta.is_expired(Utc::now()) {
            return Ok(Lookup::Expired);
        }

        let data = if verify {
            let Some(payload) = self.storage.read(&payload_id(digest)).await? else {
                return Ok(Lookup::Corrupt("missing payload"));
            };
            if payload.len() as u64 != meta.size_bytes || sha256_hex(&payload) != meta.sha256 {
                return Ok(Lookup::Corrupt("payload checksum mismatch"));
            }
            Bytes::from(payload)
        } else {
            match self.storage.stat(&payload_id(digest)).await? {
                Some(info) if info.len == meta.size_bytes => Bytes::new(),
                Some(_) => return Ok(Lookup::Corrupt("payload length mismatch")),
                None => return Ok(Lookup::Corrupt("missing payload")),
            }
        };

        Ok(Lookup::Hit(DiskEntry {
            data,
            created_at: meta.created_at,
            expires_at: meta.expires_at,
            metadata: meta.metadata,
        }))
    }

    async fn remove_pair(&self, digest: &str) -> AppResult<bool> {
        // Metadata first, so a crash in between leaves an orphan payload
        // that reads as a miss.
        let meta = self.storage.delete(&meta_id(digest)).await?;
        let payload = self.storage.delete(&payload_id(digest)).await?;
        Ok(meta || payload)
    }

    /// Groups stored objects by entry digest
    async fn scan(&self) -> AppResult<BTreeMap<String, EntryFiles>> {
        let ids = self.storage.list().await?;
        let infos =
            futures::future::try_join_all(ids.iter().map(|id| self.storage.stat(id))).await?;

        let mut entries: BTreeMap<String, EntryFiles> = BTreeMap::new();
        for (id, info) in ids.iter().zip(infos) {
            let Some(info) = info else { continue };
            if let Some(digest) = id.strip_suffix(META_SUFFIX) {
                entries.entry(digest.to_string()).or_default().meta = Some(info);
            } else if let Some(digest) = id.strip_suffix(PAYLOAD_SUFFIX) {
                entries.entry(digest.to_string()).or_default().payload = Some(info);
            }
        }
        Ok(entries)
    }

    /// Evicts oldest-modified entries once usage exceeds the limit, down to
    /// the eviction target. Caller must hold the write lock.
    async fn enforce_size_limit(&self) -> AppResult<usize> {
        let entries = self.scan().await?;
        let mut total: u64 = entries.values().map(EntryFiles::len).sum();
        if total <= self.max_size_bytes {
            return Ok(0);
        }

        let target =
            (u128::from(self.max_size_bytes) * u128::from(EVICTION_TARGET_PERCENT) / 100) as u64;
        let mut by_age: Vec<(&String, &EntryFiles)> = entries.iter().collect();
        by_age.sort_by_key(|(digest, files)| (files.modified(), (*digest).clone()));

        let mut evicted = 0;
        for (digest, files) in by_age {
            if total <= target {
                break;
            }
            self.remove_pair(digest).await?;
            total = total.saturating_sub(files.len());
            evicted += 1;
        }

        info!(
            evicted,
            remaining_bytes = total,
            limit_bytes = self.max_size_bytes,
            "Disk cache over limit, evicted oldest entries"
        );
        Ok(evicted)
    }
}
