//! Host-local durable key/value storage.
//!
//! Plays the role a browser's `localStorage` plays for the host application:
//! string keys, string values, an optional byte quota.

use rusqlite::{params, OptionalExtension};
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{Database, StoreError};

/// String key/value storage with an optional size quota.
pub trait LocalStore: Send + Sync {
  fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;

  /// Store `value` under `key`, replacing any previous value.
  fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;

  fn remove_item(&self, key: &str) -> Result<(), StoreError>;

  fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Check a prospective write against the quota.
///
/// `current` is the size of everything stored except the key being replaced.
fn check_quota(
  quota: Option<usize>,
  current: usize,
  key: &str,
  value: &str,
) -> Result<(), StoreError> {
  if let Some(quota) = quota {
    let used = current + key.len() + value.len();
    if used > quota {
      return Err(StoreError::QuotaExceeded { used, quota });
    }
  }
  Ok(())
}

/// In-memory store, used by tests and `--ephemeral` runs.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
  items: Mutex<BTreeMap<String, String>>,
  quota_bytes: Option<usize>,
}

impl MemoryLocalStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_quota(quota_bytes: usize) -> Self {
    Self {
      items: Mutex::new(BTreeMap::new()),
      quota_bytes: Some(quota_bytes),
    }
  }

  fn items(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>, StoreError> {
    self
      .items
      .lock()
      .map_err(|e| StoreError::Poisoned(e.to_string()))
  }
}

impl LocalStore for MemoryLocalStore {
  fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
    Ok(self.items()?.get(key).cloned())
  }

  fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
    let mut items = self.items()?;
    let current: usize = items
      .iter()
      .filter(|(k, _)| k.as_str() != key)
      .map(|(k, v)| k.len() + v.len())
      .sum();
    check_quota(self.quota_bytes, current, key, value)?;
    items.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<(), StoreError> {
    self.items()?.remove(key);
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>, StoreError> {
    Ok(self.items()?.keys().cloned().collect())
  }
}

/// SQLite-backed store sharing the cache database.
#[derive(Clone)]
pub struct SqliteLocalStore {
  db: Database,
  quota_bytes: Option<usize>,
}

impl SqliteLocalStore {
  pub fn new(db: Database, quota_bytes: Option<usize>) -> Self {
    Self { db, quota_bytes }
  }
}

impl LocalStore for SqliteLocalStore {
  fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
    let conn = self.db.conn()?;
    let value = conn
      .query_row(
        "SELECT value FROM local_store WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value)
  }

  fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
    let conn = self.db.conn()?;

    if self.quota_bytes.is_some() {
      let current: i64 = conn.query_row(
        "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
         FROM local_store WHERE key != ?",
        params![key],
        |row| row.get(0),
      )?;
      check_quota(self.quota_bytes, current as usize, key, value)?;
    }

    conn.execute(
      "INSERT OR REPLACE INTO local_store (key, value) VALUES (?, ?)",
      params![key, value],
    )?;
    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<(), StoreError> {
    self
      .db
      .conn()?
      .execute("DELETE FROM local_store WHERE key = ?", params![key])?;
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>, StoreError> {
    let conn = self.db.conn()?;
    let mut stmt = conn.prepare("SELECT key FROM local_store ORDER BY key")?;
    let keys = stmt
      .query_map([], |row| row.get(0))?
      .collect::<Result<Vec<String>, _>>()?;
    Ok(keys)
  }
}
