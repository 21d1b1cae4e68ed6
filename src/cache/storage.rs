//! Key-value storage trait with SQLite and in-memory implementations.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use crate::db::Database;

/// Trait for persistent string key-value backends.
///
/// Values are opaque strings; the cache layer owns the envelope format.
pub trait KeyValueStore: Send + Sync {
  /// Get the raw value stored under `key`.
  fn get_raw(&self, key: &str) -> Result<Option<String>>;

  /// Store `value` under `key`, replacing any previous value.
  fn set_raw(&self, key: &str, value: &str) -> Result<()>;

  /// Remove `key`. Removing a missing key is not an error.
  fn remove(&self, key: &str) -> Result<()>;

  /// All keys currently stored.
  fn keys(&self) -> Result<Vec<String>>;

  /// Remove every key not in `keep`.
  fn retain_only(&self, keep: &BTreeSet<String>) -> Result<()> {
    for key in self.keys()? {
      if !keep.contains(&key) {
        self.remove(&key)?;
      }
    }
    Ok(())
  }
}

/// Store that lives only as long as the process.
#[derive(Default)]
pub struct MemoryStore {
  entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
    self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl KeyValueStore for MemoryStore {
  fn get_raw(&self, key: &str) -> Result<Option<String>> {
    Ok(self.lock()?.get(key).cloned())
  }

  fn set_raw(&self, key: &str, value: &str) -> Result<()> {
    self.lock()?.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    self.lock()?.remove(key);
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    Ok(self.lock()?.keys().cloned().collect())
  }
}

/// SQLite-based key-value store; survives process restarts.
#[derive(Clone)]
pub struct SqliteStore {
  db: Database,
}

impl SqliteStore {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

impl KeyValueStore for SqliteStore {
  fn get_raw(&self, key: &str) -> Result<Option<String>> {
    let conn = self.db.conn()?;
    conn
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read key {}: {}", key, e))
  }

  fn set_raw(&self, key: &str, value: &str) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO kv_store (key, value) VALUES (?, ?)",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to store key {}: {}", key, e))?;
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute("DELETE FROM kv_store WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove key {}: {}", key, e))?;
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT key FROM kv_store ORDER BY key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list keys: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(keys)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn exercise(store: &dyn KeyValueStore) {
    assert_eq!(store.get_raw("a").unwrap(), None);

    store.set_raw("a", "1").unwrap();
    store.set_raw("b", "2").unwrap();
    store.set_raw("a", "3").unwrap();
    assert_eq!(store.get_raw("a").unwrap().as_deref(), Some("3"));
    assert_eq!(store.keys().unwrap(), vec!["a", "b"]);

    store.remove("a").unwrap();
    store.remove("missing").unwrap();
    assert_eq!(store.keys().unwrap(), vec!["b"]);
  }

  #[test]
  fn test_memory_store() {
    exercise(&MemoryStore::new());
  }

  #[test]
  fn test_sqlite_store() {
    exercise(&SqliteStore::new(Database::in_memory().unwrap()));
  }

  #[test]
  fn test_retain_only() {
    let store = SqliteStore::new(Database::in_memory().unwrap());
    for key in ["theme", "user", "products", "alerts"] {
      store.set_raw(key, "x").unwrap();
    }

    let keep: BTreeSet<String> = ["theme".to_string()].into();
    store.retain_only(&keep).unwrap();

    assert_eq!(store.keys().unwrap(), vec!["theme"]);
  }
}
