use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::{AuthToken, CacheEntry, CacheStore, StoreError, TokenStore};

/// SQLite-based token and cache store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    token_table: String,
    cache_table: String,
}

impl SqliteStore {
    /// Open (or create) the store at `database_url`.
    ///
    /// Accepts an optional `sqlite:` prefix; `:memory:` opens a private
    /// in-memory database. Table names must be plain identifiers.
    pub fn new(database_url: &str, token_table: &str, cache_table: &str) -> Result<Self, StoreError> {
        // Parse sqlite: prefix if present
        let path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            // Create parent directories if needed
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::IoError(e.to_string()))?;
            }
            Connection::open(path)?
        };

        for table in [token_table, cache_table] {
            if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(StoreError::DatabaseError(format!("invalid table name '{}'", table)));
            }
        }

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    token_key TEXT PRIMARY KEY,
                    secret TEXT NOT NULL,
                    expires INTEGER NOT NULL
                )",
                token_table
            ),
            [],
        )?;

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    creation_time INTEGER NOT NULL,
                    expires INTEGER NOT NULL
                )",
                cache_table
            ),
            [],
        )?;

        tracing::info!(
            "Store initialized with database: {} (tables {}, {})",
            path,
            token_table,
            cache_table
        );

        Ok(Self {
            conn: Mutex::new(conn),
            token_table: token_table.to_string(),
            cache_table: cache_table.to_string(),
        })
    }

    /// In-memory store with default table names.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::new(":memory:", "pressurize_auth", "pressurize_cache")
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))
    }
}

impl TokenStore for SqliteStore {
    fn lookup_token(&self, key: &str) -> Result<Option<AuthToken>, StoreError> {
        let conn = self.conn()?;

        let token = conn
            .query_row(
                &format!(
                    "SELECT token_key, secret, expires FROM {} WHERE token_key = ?1",
                    self.token_table
                ),
                params![key],
                |row| {
                    Ok(AuthToken {
                        key: row.get(0)?,
                        secret: row.get(1)?,
                        expires: row.get(2)?,
                    })
                },
            )
            .optional()?;

        Ok(token)
    }

    fn put_token(&self, token: &AuthToken) -> Result<(), StoreError> {
        let conn = self.conn()?;

        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (token_key, secret, expires) VALUES (?1, ?2, ?3)",
                self.token_table
            ),
            params![token.key, token.secret, token.expires],
        )?;

        tracing::debug!("Stored token: {}", token.key);
        Ok(())
    }
}

impl CacheStore for SqliteStore {
    fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let conn = self.conn()?;

        let entry = conn
            .query_row(
                &format!(
                    "SELECT key, value, creation_time, expires FROM {} WHERE key = ?1",
                    self.cache_table
                ),
                params![key],
                |row| {
                    Ok(CacheEntry {
                        key: row.get(0)?,
                        value: row.get(1)?,
                        creation_time: row.get(2)?,
                        expires: row.get(3)?,
                    })
                },
            )
            .optional()?;

        Ok(entry)
    }

    fn put_entry(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        let conn = self.conn()?;

        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (key, value, creation_time, expires) VALUES (?1, ?2, ?3, ?4)",
                self.cache_table
            ),
            params![entry.key, entry.value, entry.creation_time, entry.expires],
        )?;

        tracing::debug!("Cached entry: {}", entry.key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, value: &str, expires: i64) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            value: value.to_string(),
            creation_time: 100,
            expires,
        }
    }

    #[test]
    fn test_token_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.lookup_token("missing").unwrap().is_none());

        let token = AuthToken {
            key: "test_token".to_string(),
            secret: "mysecret".to_string(),
            expires: 1_000,
        };
        store.put_token(&token).unwrap();
        assert_eq!(store.lookup_token("test_token").unwrap(), Some(token));
    }

    #[test]
    fn test_cache_put_overwrites() {
        let store = SqliteStore::in_memory().unwrap();
        store.put_entry(&entry("k", "first", 200)).unwrap();
        store.put_entry(&entry("k", "second", 300)).unwrap();

        let stored = store.get_entry("k").unwrap().unwrap();
        assert_eq!(stored.value, "second");
        assert_eq!(stored.expires, 300);
    }

    #[test]
    fn test_get_returns_expired_entries() {
        let store = SqliteStore::in_memory().unwrap();
        store.put_entry(&entry("old", "v", 0)).unwrap();
        assert_eq!(store.get_entry("old").unwrap().unwrap().expires, 0);
    }

    #[test]
    fn test_rejects_bad_table_name() {
        let result = SqliteStore::new(":memory:", "auth; DROP", "cache");
        assert!(matches!(result, Err(StoreError::DatabaseError(_))));
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("nested/store.db").display());

        {
            let store = SqliteStore::new(&url, "t_auth", "t_cache").unwrap();
            store.put_entry(&entry("k", "v", 500)).unwrap();
        }

        let reopened = SqliteStore::new(&url, "t_auth", "t_cache").unwrap();
        assert_eq!(reopened.get_entry("k").unwrap().unwrap().value, "v");
    }
}
