//! In-memory TTL cache for lookup results, keyed by normalized plate.
//!
//! Expired entries are evicted lazily when a read finds them, and a write
//! sweeps all expired entries at most once per TTL. There is no background
//! sweeper and no persistence; the cache lives as long as the process that
//! owns it.

use crate::types::LookupResult;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: LookupResult,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    last_sweep: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_keys: usize,
    pub active_keys: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub ttl_seconds: i64,
}

pub struct LookupCache {
    inner: Mutex<Inner>,
    ttl: Duration,
}

impl LookupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<LookupResult> {
        self.get_at(key, Utc::now())
    }

    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<LookupResult> {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let live = match inner.entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                inner.entries.remove(key);
                None
            }
            None => None,
        };
        if live.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        live
    }

    /// Store with the cache's configured TTL.
    pub fn insert(&self, key: &str, value: LookupResult) {
        self.set_at(key, value, self.ttl, Utc::now());
    }

    pub fn set(&self, key: &str, value: LookupResult, ttl: Duration) {
        self.set_at(key, value, ttl, Utc::now());
    }

    pub fn set_at(&self, key: &str, value: LookupResult, ttl: Duration, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let sweep_due = inner
            .last_sweep
            .map_or(true, |at| now >= expiry(at, self.ttl));
        if sweep_due {
            inner.entries.retain(|_, e| e.expires_at > now);
            inner.last_sweep = Some(now);
        }
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: expiry(now, ttl),
            },
        );
    }

    /// Remove `key`; returns whether an entry was present (expired or not).
    pub fn invalidate(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.entries.clear();
    }

    pub fn reset_stats(&self) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.hits = 0;
        inner.misses = 0;
    }

    pub fn stats(&self) -> CacheStats {
        self.stats_at(Utc::now())
    }

    pub fn stats_at(&self, now: DateTime<Utc>) -> CacheStats {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        let active_keys = inner.entries.values().filter(|e| e.expires_at > now).count();
        let lookups = inner.hits + inner.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            inner.hits as f64 / lookups as f64
        };
        CacheStats {
            total_keys: inner.entries.len(),
            active_keys,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate,
            ttl_seconds: self.ttl.num_seconds(),
        }
    }
}

fn expiry(from: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    from.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
