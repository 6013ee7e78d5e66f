//! Response cache
//!
//! Content-addressed store of prior responses. Expiry is checked lazily on
//! read; capacity is enforced on write by dropping expired entries first and
//! then the least recently accessed tenth.

use crate::error::{Error, Result};
use crate::request::UnifiedRequest;
use crate::response::UnifiedResponse;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;


/// Fingerprint of the request fields that determine the answer
///
/// SHA-256 over canonical JSON (sorted keys) of
/// `{model, messages, temperature, max_tokens, top_p}`.
pub fn fingerprint(request: &UnifiedRequest) -> Result<String> {
    let key = serde_json::json!({
        "model": request.model,
        "messages": request.messages,
        "temperature": request.temperature,
        "max_tokens": request.max_tokens,
        "top_p": request.top_p,
    });

    let mut canonical = String::new();
    write_canonical(&key, &mut canonical).map_err(|e| Error::Cache(e.to_string()))?;

    let digest = Sha256::digest(canonical.as_bytes());
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

fn write_canonical(value: &Value, out: &mut String) -> serde_json::Result<()> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(&map[key], out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

/// A cached response
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Request fingerprint
    pub key: String,
    /// Stored response
    pub value: UnifiedResponse,
    /// Insertion time
    pub created_at: Instant,
    /// Time to live
    pub ttl: Duration,
    /// Number of hits served
    pub access_count: u64,
    /// Last hit (or insertion)
    pub last_accessed: Instant,
    access_seq: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }
}

/// Cache counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Entries currently stored (expired ones included until touched)
    pub size: usize,
    /// Capacity
    pub max_size: usize,
    /// Successful lookups
    pub hits: u64,
    /// Failed lookups
    pub misses: u64,
    /// Entries removed to make room
    pub evictions: u64,
    /// hits / (hits + misses), in percent
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheInner {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn evict(&mut self, max_size: usize, now: Instant) {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        let expired = before - self.entries.len();

        let mut dropped = 0;
        if self.entries.len() >= max_size {
            let mut by_age: Vec<(u64, String)> = self
                .entries
                .values()
                .map(|e| (e.access_seq, e.key.clone()))
                .collect();
            by_age.sort_unstable();

            let count = (self.entries.len() / 10).max(1);
            for (_, key) in by_age.into_iter().take(count) {
                self.entries.remove(&key);
                dropped += 1;
            }
        }

        self.evictions += (expired + dropped) as u64;
        debug!(expired, dropped, "Cache eviction");
    }
}

/// TTL and capacity bounded response cache
#[derive(Debug)]
pub struct CacheStore {
    inner: Mutex<CacheInner>,
    max_size: usize,
    default_ttl: Duration,
}

impl CacheStore {
    /// Create a cache holding at most `max_size` entries
    #[must_use]
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            max_size: max_size.max(1),
            default_ttl,
        }
    }

    /// Look up a fresh entry, removing it if expired
    #[must_use]
    pub fn get(&self, key: &str) -> Option<UnifiedResponse> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let expired = match inner.entries.get(key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };
        if expired {
            inner.entries.remove(key);
            inner.misses += 1;
            return None;
        }

        let seq = inner.next_seq();
        inner.hits += 1;
        inner.entries.get_mut(key).map(|entry| {
            entry.access_count += 1;
            entry.last_accessed = now;
            entry.access_seq = seq;
            entry.value.clone()
        })
    }

    /// Store a response; `ttl` defaults to the cache's TTL
    pub fn set(&self, key: impl Into<String>, value: UnifiedResponse, ttl: Option<Duration>) {
        let key = key.into();
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.max_size {
            inner.evict(self.max_size, now);
        }

        let seq = inner.next_seq();
        inner.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                value,
                created_at: now,
                ttl: ttl.unwrap_or(self.default_ttl),
                access_count: 0,
                last_accessed: now,
                access_seq: seq,
            },
        );
    }

    /// Remove an entry. Returns whether it existed.
    pub fn delete(&self, key: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .remove(key)
            .is_some()
    }

    /// Remove every entry, keeping the counters
    pub fn clear(&self) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .clear();
    }

    /// Number of stored entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let lookups = inner.hits + inner.misses;
        CacheStats {
            size: inner.entries.len(),
            max_size: self.max_size,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64 * 100.0
            },
        }
    }
}
