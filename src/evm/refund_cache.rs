// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Refund deduplication cache.
//!
//! Remembers the transaction hash of each successful refund for a short TTL
//! so that an identical repeated request returns the recorded hash instead
//! of paying out twice.
//!
//! The cache is process-local and owned by one engine instance. Two engine
//! instances (or processes) do not see each other's entries.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use alloy::primitives::U256;
use lru::LruCache;
use sha2::{Digest, Sha256};

/// How long a completed refund suppresses identical requests.
pub const REFUND_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

const DEFAULT_CAPACITY: usize = 10_000;

/// Characters of the source secret mixed into the key.
const SECRET_SUFFIX_LEN: usize = 10;

/// Cached entry: transaction hash + insertion timestamp.
struct CacheEntry {
    tx_hash: String,
    recorded_at: Instant,
}

/// Derive the dedup key for a refund request.
///
/// Only the tail of the secret is used and the whole tuple is hashed, so the
/// key never contains key material in the clear.
pub fn refund_key(source_secret: &str, destination: &str, currency: &str, amount: U256) -> String {
    let secret = source_secret.trim();
    let tail_start = secret
        .char_indices()
        .rev()
        .nth(SECRET_SUFFIX_LEN - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let suffix = &secret[tail_start..];

    let mut hasher = Sha256::new();
    hasher.update(suffix.as_bytes());
    hasher.update(b"|");
    hasher.update(destination.trim().to_ascii_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(currency.trim().to_ascii_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(amount.to_string().as_bytes());
    alloy::hex::encode(hasher.finalize())
}

/// In-process TTL cache of completed refunds.
pub struct RefundCache {
    cache: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl Default for RefundCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, REFUND_CACHE_TTL)
    }
}

impl RefundCache {
    /// Create a new cache with the given capacity and TTL.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Drop every entry older than the TTL. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let Ok(mut cache) = self.cache.lock() else {
            return 0;
        };
        let expired: Vec<String> = cache
            .iter()
            .filter(|(_, entry)| entry.recorded_at.elapsed() >= self.ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            cache.pop(key);
        }
        expired.len()
    }

    /// Previously recorded hash for `key`, if still within the TTL.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut cache = self.cache.lock().ok()?;
        if let Some(entry) = cache.get(key) {
            if entry.recorded_at.elapsed() < self.ttl {
                return Some(entry.tx_hash.clone());
            }
            cache.pop(key);
        }
        None
    }

    pub fn record(&self, key: String, tx_hash: String) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                key,
                CacheEntry {
                    tx_hash,
                    recorded_at: Instant::now(),
                },
            );
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    const DEST: &str = "0x2222222222222222222222222222222222222222";

    #[test]
    fn key_is_deterministic_and_normalized() {
        let a = refund_key(SECRET, DEST, "ETH", U256::from(100u64));
        let b = refund_key(SECRET, &DEST.to_uppercase().replace("0X", "0x"), "eth", U256::from(100u64));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(!a.contains("3f362318"));
    }

    #[test]
    fn key_varies_with_inputs() {
        let base = refund_key(SECRET, DEST, "eth", U256::from(100u64));
        assert_ne!(base, refund_key(SECRET, DEST, "eth", U256::from(101u64)));
        assert_ne!(base, refund_key(SECRET, DEST, "usdc", U256::from(100u64)));
        assert_ne!(
            base,
            refund_key("0xaaaaaaaaaaaaaaaaaaaa", DEST, "eth", U256::from(100u64))
        );
    }

    #[test]
    fn key_only_uses_secret_suffix() {
        let a = refund_key("prefix-one-0123456789", DEST, "eth", U256::from(1u64));
        let b = refund_key("other-0123456789", DEST, "eth", U256::from(1u64));
        assert_eq!(a, b);
        // shorter than the suffix length is used whole
        let c = refund_key("short", DEST, "eth", U256::from(1u64));
        assert_eq!(c.len(), 64);
    }

    #[test]
    fn record_and_get() {
        let cache = RefundCache::default();
        assert!(cache.get("k").is_none());
        cache.record("k".to_string(), "0xabc".to_string());
        assert_eq!(cache.get("k").as_deref(), Some("0xabc"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn entries_expire() {
        let cache = RefundCache::new(10, Duration::from_millis(1));
        cache.record("k".to_string(), "0xabc".to_string());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn purge_removes_only_expired() {
        let cache = RefundCache::new(10, Duration::from_millis(20));
        cache.record("old".to_string(), "0x1".to_string());
        std::thread::sleep(Duration::from_millis(30));
        cache.record("new".to_string(), "0x2".to_string());

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("new").as_deref(), Some("0x2"));
    }
}
