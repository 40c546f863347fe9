//! Keyed stores backing authentication and response caching.
//!
//! Both stores offer per-key get/put with no cross-key transactions.
//! Concurrent writes to the same key are last-write-wins.

mod sqlite;

pub use sqlite::SqliteStore;

/// A stored auth token. Valid while `expires` (epoch seconds) is in the future.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub key: String,
    pub secret: String,
    pub expires: i64,
}

/// A stored response. `value` is the serialized result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub creation_time: i64,
    pub expires: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("IO error: {0}")]
    IoError(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

/// Token table: `{token_key, secret, expires}`.
pub trait TokenStore: Send + Sync {
    fn lookup_token(&self, key: &str) -> Result<Option<AuthToken>, StoreError>;
    fn put_token(&self, token: &AuthToken) -> Result<(), StoreError>;
}

/// Cache table: `{key, value, creation_time, expires}`.
///
/// `get_entry` returns entries regardless of expiry; the cache layer
/// decides what counts as a hit.
pub trait CacheStore: Send + Sync {
    fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;
    fn put_entry(&self, entry: &CacheEntry) -> Result<(), StoreError>;
}
