//! Durable key-value store.
//!
//! String keys, JSON values, no schema. Backed by a single SQLite table;
//! an in-memory variant serves tests and one-shot commands.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

pub trait KvStore: Send + Sync {
    fn get_raw(&self, key: &str) -> Result<Option<Value>, StoreError>;

    fn set_raw(&self, key: &str, value: Value) -> Result<(), StoreError>;
}

/// Typed helpers over any [`KvStore`].
pub trait KvStoreExt: KvStore {
    /// Read `key`, falling back to `default` when missing or of the wrong shape.
    fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, StoreError> {
        match self.get_raw(key)? {
            Some(value) => match serde_json::from_value(value) {
                Ok(v) => Ok(v),
                Err(err) => {
                    warn!(
                        component = "store",
                        key,
                        error = %err,
                        "Stored value has unexpected shape, using default"
                    );
                    Ok(default)
                }
            },
            None => Ok(default),
        }
    }

    fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.set_raw(key, serde_json::to_value(value)?)
    }
}

impl<S: KvStore + ?Sized> KvStoreExt for S {}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS kv (
                 key TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl KvStore for SqliteStore {
    fn get_raw(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let raw: Option<String> = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        raw.map(|text| serde_json::from_str(&text).map_err(StoreError::from))
            .transpose()
    }

    fn set_raw(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let text = serde_json::to_string(&value)?;
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, text],
        )?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get_raw(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(values.get(key).cloned())
    }

    fn set_raw(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        values.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sqlite_round_trips_values_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.set("tone", "firm").unwrap();
            store.set("priceDeviation", &25.0).unwrap();
            store.set("tone", "professional").unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get_or("tone", String::new()).unwrap(), "professional");
        assert_eq!(store.get_or("priceDeviation", 0.0).unwrap(), 25.0);
    }

    #[test]
    fn missing_key_yields_default() {
        let store = MemoryStore::new();
        assert_eq!(store.get_or("neg_listings", Vec::<String>::new()).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn wrong_shape_yields_default() {
        let store = MemoryStore::new();
        store.set_raw("autoNegotiate", json!("yes")).unwrap();
        assert!(store.get_or("autoNegotiate", true).unwrap());
    }
}
