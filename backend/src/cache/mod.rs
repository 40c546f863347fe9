//! Response cache for model method calls.
//!
//! Entries are keyed by a content hash of model, method and the call
//! payload with volatile fields removed (see [`pressurize_common::VOLATILE_FIELDS`]).
//! Expiry is lazy: an entry past its TTL reads as a miss and is left in the
//! store to be overwritten by the next `put`. There is no background sweep.
//!
//! This cache is not a security boundary; the hash only needs to be
//! collision resistant enough to keep distinct payloads apart.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::store::{CacheEntry, CacheStore, StoreError};

/// A cache hit: the serialized value and when it was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHit {
    pub value: String,
    /// Epoch seconds.
    pub creation_time: i64,
}

/// Cache key for a call: `hex(sha256(model \0 method \0 canonical(payload)))`.
///
/// `stable_payload` must already have volatile fields removed.
pub fn cache_key(model: &str, method: &str, stable_payload: &Map<String, Value>) -> String {
    let canonical = canonicalize(&Value::Object(stable_payload.clone()));

    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(method.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Rebuild objects with keys in sorted order so serialization is stable
/// no matter how the body was laid out.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Get/put of prior responses with per-entry TTL over a [`CacheStore`].
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Look up `key`. Absent and expired (`expires <= now`) entries are misses.
    pub fn get(&self, key: &str) -> Result<Option<CacheHit>, StoreError> {
        let now = Utc::now().timestamp();
        Ok(self
            .store
            .get_entry(key)?
            .filter(|entry| entry.expires > now)
            .map(|entry| CacheHit {
                value: entry.value,
                creation_time: entry.creation_time,
            }))
    }

    /// Store `value` under `key` for `ttl_secs`. Last write wins.
    pub fn put(&self, key: &str, value: String, ttl_secs: i64) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();
        self.store.put_entry(&CacheEntry {
            key: key.to_string(),
            value,
            creation_time: now,
            expires: now.saturating_add(ttl_secs),
        })
    }

    /// Fetch a cached result, treating store failures and undecodable
    /// values as misses.
    pub fn lookup(&self, key: &str) -> Option<(Value, i64)> {
        match self.get(key) {
            Ok(Some(hit)) => match serde_json::from_str(&hit.value) {
                Ok(value) => Some((value, hit.creation_time)),
                Err(e) => {
                    tracing::warn!("Discarding undecodable cache entry {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Cache lookup failed, treating as miss: {}", e);
                None
            }
        }
    }

    /// Store a result, logging and swallowing store failures.
    pub fn store(&self, key: &str, result: &Value, ttl_secs: i64) {
        if let Err(e) = self.put(key, result.to_string(), ttl_secs) {
            tracing::warn!("Cache store failed for {}: {}", key, e);
        }
    }
}
