//! Key/value persistence for the six collections.
//!
//! Values are JSON documents. Both backends account quota in bytes of key
//! plus serialized value.

use chrono::Utc;
use memory_ledger_schemas::Dataset;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{Result, StorageError};

/// Prefix for the keys holding the six collections.
pub const DATASET_KEY_PREFIX: &str = "ledger:";

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Value>>;

    fn set(&mut self, key: &str, value: &Value) -> Result<()>;

    fn remove(&mut self, key: &str) -> Result<()>;

    fn clear(&mut self) -> Result<()>;

    /// All keys in ascending order.
    fn list_keys(&self) -> Result<Vec<String>>;
}

/// In-process store, mostly for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            quota: Some(quota),
        }
    }

    fn used_bytes_excluding(&self, key: &str) -> usize {
        self.entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        self.entries
            .get(key)
            .map(|raw| serde_json::from_str(raw))
            .transpose()
            .map_err(StorageError::from)
    }

    fn set(&mut self, key: &str, value: &Value) -> Result<()> {
        let serialized = serde_json::to_string(value)?;
        check_quota(self.quota, self.used_bytes_excluding(key), key.len() + serialized.len())?;
        self.entries.insert(key.to_string(), serialized);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.keys().cloned().collect())
    }
}

/// SQLite-backed store holding everything in a single `kv` table.
pub struct SqliteStore {
    conn: Connection,
    quota: Option<usize>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    pub fn with_quota(mut self, quota: usize) -> Self {
        self.quota = Some(quota);
        self
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        debug!("Key/value store initialized");
        Ok(Self { conn, quota: None })
    }

    fn used_bytes_excluding(&self, key: &str) -> Result<usize> {
        let used: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
             FROM kv WHERE key != ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(used).unwrap_or(0))
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;

        Ok(raw.map(|r| serde_json::from_str(&r)).transpose()?)
    }

    fn set(&mut self, key: &str, value: &Value) -> Result<()> {
        let serialized = serde_json::to_string(value)?;
        if self.quota.is_some() {
            let used = self.used_bytes_excluding(key)?;
            check_quota(self.quota, used, key.len() + serialized.len())?;
        }

        self.conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, serialized, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.conn.execute("DELETE FROM kv", [])?;
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT key FROM kv ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

fn check_quota(quota: Option<usize>, used: usize, needed: usize) -> Result<()> {
    let Some(quota) = quota else {
        return Ok(());
    };

    let available = quota.saturating_sub(used);
    if needed > available {
        warn!("Write of {} bytes rejected, {} bytes available", needed, available);
        return Err(StorageError::QuotaExceeded { needed, available });
    }
    Ok(())
}

fn dataset_key(collection: &str) -> String {
    format!("{}{}", DATASET_KEY_PREFIX, collection)
}

fn object_fields<T: Serialize>(value: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(object) => Ok(object),
        other => Err(StorageError::Serialization(serde::ser::Error::custom(format!(
            "expected an object, got {}",
            other
        )))),
    }
}

/// Read the six collections; a missing key is an empty collection.
pub fn load_dataset<S: KeyValueStore + ?Sized>(store: &S) -> Result<Dataset> {
    let mut object = Map::new();
    for collection in Dataset::COLLECTIONS {
        let value = store
            .get(&dataset_key(collection))?
            .unwrap_or_else(|| Value::Array(vec![]));
        object.insert(collection.to_string(), value);
    }

    let dataset: Dataset = serde_json::from_value(Value::Object(object))?;
    debug!("Loaded {} records", dataset.item_counts().total());
    Ok(dataset)
}

/// Write all six collections. A quota failure can leave earlier
/// collections written.
pub fn save_dataset<S: KeyValueStore + ?Sized>(store: &mut S, dataset: &Dataset) -> Result<()> {
    let object = object_fields(dataset)?;

    for collection in Dataset::COLLECTIONS {
        if let Some(value) = object.get(collection) {
            store.set(&dataset_key(collection), value)?;
        }
    }

    info!("Saved {} records", dataset.item_counts().total());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exercise_store<S: KeyValueStore>(store: &mut S) {
        assert_eq!(store.get("missing").unwrap(), None);

        store.set("b", &json!({"x": 1})).unwrap();
        store.set("a", &json!([1, 2, 3])).unwrap();
        store.set("b", &json!({"x": 2})).unwrap();

        assert_eq!(store.get("b").unwrap(), Some(json!({"x": 2})));
        assert_eq!(store.list_keys().unwrap(), vec!["a".to_string(), "b".to_string()]);

        store.remove("a").unwrap();
        assert_eq!(store.list_keys().unwrap(), vec!["b".to_string()]);

        store.clear().unwrap();
        assert!(store.list_keys().unwrap().is_empty());
    }

    #[test]
    fn test_memory_store() {
        exercise_store(&mut MemoryStore::new());
    }

    #[test]
    fn test_sqlite_store() {
        exercise_store(&mut SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_memory_store_quota() {
        let mut store = MemoryStore::with_quota(20);
        store.set("k", &json!("0123456789")).unwrap();

        let err = store.set("other", &json!("0123456789")).unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { .. }));

        // overwriting the same key only counts the new value
        store.set("k", &json!("abcdefghijklmnop")).unwrap();
    }

    #[test]
    fn test_sqlite_store_quota() {
        let mut store = SqliteStore::open_in_memory().unwrap().with_quota(16);
        store.set("k", &json!("short")).unwrap();
        let err = store.set("k2", &json!("this value is too long")).unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { needed: 26, available: 8 }));
    }

    #[test]
    fn test_object_fields_rejects_non_objects() {
        let err = object_fields(&vec![1, 2]).unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));

        let fields = object_fields(&Dataset::default()).unwrap();
        assert_eq!(fields.len(), Dataset::COLLECTIONS.len());
    }

    #[test]
    fn test_save_writes_every_collection() {
        let mut store = MemoryStore::new();
        save_dataset(&mut store, &Dataset::default()).unwrap();
        assert_eq!(store.list_keys().unwrap().len(), Dataset::COLLECTIONS.len());
    }

    #[test]
    fn test_load_empty_dataset() {
        let store = MemoryStore::new();
        assert_eq!(load_dataset(&store).unwrap(), Dataset::default());
    }
}
