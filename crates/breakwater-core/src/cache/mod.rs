//! LRU+TTL response cache.
//!
//! One instance per provider executor, keyed by the 64-bit hash of
//! (chain id, method, canonicalized params) from [`crate::utils::cache_key`].
//! Which methods are eligible for caching is decided by the provider profile's
//! allow-list, not here; the cache stores whatever the executor hands it.
//!
//! Expiry is checked lazily on `get` and by a periodic [`cleanup`] sweep
//! driven by the client's background scheduler. Eviction is LRU once the
//! entry count exceeds capacity (the `lru` crate handles ordering).
//!
//! Cache failures never propagate to callers: the executor logs them and
//! treats the lookup as a miss.
//!
//! [`cleanup`]: ResponseCache::cleanup

use crate::{config::CacheConfig, provider::errors::RpcError};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    num::NonZeroUsize,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

/// Upper bound on a single cached value's serialized size. Entries larger
/// than this are refused so one pathological `eth_getBlockByHash` response
/// cannot dominate the cache.
const MAX_VALUE_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) >= self.ttl
    }
}

/// Point-in-time cache statistics for metrics export.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Hit rate in `0.0..=1.0`; zero-lookup caches report 0.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Thread-safe LRU+TTL store for RPC responses.
pub struct ResponseCache {
    entries: Mutex<LruCache<u64, CacheEntry>>,
    default_ttl: Duration,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// Creates a cache from the provider's cache configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidConfig`] for a zero capacity.
    pub fn new(config: &CacheConfig) -> Result<Self, RpcError> {
        let capacity = NonZeroUsize::new(config.max_entries)
            .ok_or_else(|| RpcError::InvalidConfig("cache capacity must be nonzero".into()))?;
        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            default_ttl: config.ttl(),
            capacity: config.max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Looks up a cached value, lazily evicting it if its TTL has elapsed.
    #[must_use]
    pub fn get(&self, key: u64) -> Option<serde_json::Value> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let lookup = entries.get(&key).map(|entry| {
            if entry.is_expired(now) {
                None
            } else {
                Some(entry.value.clone())
            }
        });
        match lookup {
            Some(Some(value)) => {
                drop(entries);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Some(None) => {
                entries.pop(&key);
                drop(entries);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                drop(entries);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores a value under the given key.
    ///
    /// `ttl` overrides the profile default when provided.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Cache`] when the value exceeds the per-entry size
    /// bound. The executor logs this and carries on; it is never surfaced to
    /// callers.
    pub fn set(
        &self,
        key: u64,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), RpcError> {
        let approximate_size = approximate_value_size(&value);
        if approximate_size > MAX_VALUE_BYTES {
            return Err(RpcError::Cache(format!(
                "value of ~{approximate_size} bytes exceeds per-entry bound"
            )));
        }

        let entry = CacheEntry {
            value,
            inserted_at: Instant::now(),
            ttl: ttl.unwrap_or(self.default_ttl),
        };
        self.entries.lock().put(key, entry);
        Ok(())
    }

    /// Sweeps expired entries, returning how many were removed.
    ///
    /// Called periodically by the client's background scheduler so entries
    /// that are never read again still get reclaimed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired: Vec<u64> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        if !expired.is_empty() {
            tracing::debug!(removed = expired.len(), "cache cleanup removed expired entries");
        }
        expired.len()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.lock().len(),
            capacity: self.capacity,
        }
    }
}

/// Cheap size estimate: string lengths plus a fixed overhead per node. Close
/// enough to bound memory without serializing the value.
fn approximate_value_size(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Null | serde_json::Value::Bool(_) => 8,
        serde_json::Value::Number(_) => 16,
        serde_json::Value::String(s) => 24 + s.len(),
        serde_json::Value::Array(items) => {
            24 + items.iter().map(approximate_value_size).sum::<usize>()
        }
        serde_json::Value::Object(map) => {
            24 + map
                .iter()
                .map(|(k, v)| k.len() + approximate_value_size(v))
                .sum::<usize>()
        }
    }
}
