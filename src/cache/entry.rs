//! Cached values and their bookkeeping

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;

/// Payloads that know their own size in bytes
pub trait Weighted {
    fn weight(&self) -> usize;
}

impl Weighted for String {
    fn weight(&self) -> usize {
        self.len()
    }
}

impl Weighted for Bytes {
    fn weight(&self) -> usize {
        self.len()
    }
}

impl Weighted for Vec<u8> {
    fn weight(&self) -> usize {
        self.len()
    }
}

/// A value held by the memory tier
///
/// `expires_at`, when set, is never earlier than `created_at`.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub created_at: Instant,
    pub expires_at: Option<Instant>,
    pub size_bytes: usize,
    pub metadata: HashMap<String, String>,
}

impl<T: Weighted> CacheEntry<T> {
    /// Creates an entry stamped at `now` that lives for `ttl` (forever if `None`)
    ///
    /// A `ttl` too large to represent as an instant never expires.
    pub fn new(data: T, now: Instant, ttl: Option<Duration>) -> Self {
        let size_bytes = data.weight();
        Self {
            data,
            created_at: now,
            expires_at: ttl.and_then(|ttl| now.checked_add(ttl)),
            size_bytes,
            metadata: HashMap::new(),
        }
    }
}

impl<T> CacheEntry<T> {
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// An entry is expired from its expiry instant onward
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |expires_at| now >= expires_at)
    }

    /// Time left before expiry; `None` for entries that never expire
    pub fn remaining_ttl(&self, now: Instant) -> Option<Duration> {
        self.expires_at
            .map(|expires_at| expires_at.saturating_duration_since(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_records_size_and_expiry() {
        let now = Instant::now();
        let entry = CacheEntry::new("hello".to_string(), now, Some(Duration::from_secs(10)));

        assert_eq!(entry.size_bytes, 5);
        assert_eq!(entry.created_at, now);
        assert_eq!(entry.expires_at, Some(now + Duration::from_secs(10)));
        assert!(entry.expires_at.map_or(true, |e| e >= entry.created_at));
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Instant::now();
        let entry = CacheEntry::new(Bytes::from_static(b"x"), now, Some(Duration::from_secs(1)));

        assert!(!entry.is_expired(now));
        assert!(!entry.is_expired(now + Duration::from_millis(999)));
        assert!(entry.is_expired(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_entry_without_ttl_never_expires() {
        let now = Instant::now();
        let entry = CacheEntry::new(vec![1u8, 2, 3], now, None);

        assert!(!entry.is_expired(now + Duration::from_secs(86_400 * 365)));
        assert!(entry.remaining_ttl(now).is_none());
    }

    #[test]
    fn test_unrepresentable_ttl_never_expires() {
        let now = Instant::now();
        let entry = CacheEntry::new("v".to_string(), now, Some(Duration::MAX));

        assert!(entry.expires_at.is_none());
        assert!(!entry.is_expired(now + Duration::from_secs(86_400 * 365)));
    }

    #[test]
    fn test_remaining_ttl_saturates() {
        let now = Instant::now();
        let entry = CacheEntry::new("v".to_string(), now, Some(Duration::from_secs(5)));

        assert_eq!(entry.remaining_ttl(now + Duration::from_secs(2)), Some(Duration::from_secs(3)));
        assert_eq!(entry.remaining_ttl(now + Duration::from_secs(9)), Some(Duration::ZERO));
    }
}
