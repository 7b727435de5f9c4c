//! Cache partition backends: in-memory and SQLite.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::traits::{CacheStorage, CachedEntry};
use crate::db::{Database, StoreError};
use crate::net::{RequestKey, Response};

#[derive(Debug, Default)]
struct Partition {
  name: String,
  entries: HashMap<RequestKey, CachedEntry>,
}

/// Partitions held in process memory. Lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStorage {
  /// Kept in creation order.
  partitions: Mutex<Vec<Partition>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn partitions(&self) -> Result<MutexGuard<'_, Vec<Partition>>, StoreError> {
    self
      .partitions
      .lock()
      .map_err(|e| StoreError::Poisoned(e.to_string()))
  }
}

fn find_or_create<'a>(partitions: &'a mut Vec<Partition>, name: &str) -> &'a mut Partition {
  let index = match partitions.iter().position(|p| p.name == name) {
    Some(index) => index,
    None => {
      partitions.push(Partition {
        name: name.to_string(),
        entries: HashMap::new(),
      });
      partitions.len() - 1
    }
  };
  &mut partitions[index]
}

impl CacheStorage for MemoryStorage {
  fn open(&self, partition: &str) -> Result<(), StoreError> {
    let mut partitions = self.partitions()?;
    find_or_create(&mut partitions, partition);
    Ok(())
  }

  fn has(&self, partition: &str) -> Result<bool, StoreError> {
    Ok(self.partitions()?.iter().any(|p| p.name == partition))
  }

  fn match_request(
    &self,
    partition: &str,
    key: &RequestKey,
  ) -> Result<Option<CachedEntry>, StoreError> {
    Ok(
      self
        .partitions()?
        .iter()
        .find(|p| p.name == partition)
        .and_then(|p| p.entries.get(key).cloned()),
    )
  }

  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedEntry>, StoreError> {
    Ok(
      self
        .partitions()?
        .iter()
        .find_map(|p| p.entries.get(key).cloned()),
    )
  }

  fn put(&self, partition: &str, key: &RequestKey, response: &Response) -> Result<(), StoreError> {
    let mut partitions = self.partitions()?;
    let entry = CachedEntry {
      key: key.clone(),
      response: response.clone(),
      cached_at: Utc::now(),
    };
    find_or_create(&mut partitions, partition)
      .entries
      .insert(key.clone(), entry);
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>, StoreError> {
    Ok(self.partitions()?.iter().map(|p| p.name.clone()).collect())
  }

  fn entries(&self, partition: &str) -> Result<Vec<RequestKey>, StoreError> {
    let partitions = self.partitions()?;
    let mut keys: Vec<RequestKey> = partitions
      .iter()
      .find(|p| p.name == partition)
      .map(|p| p.entries.keys().cloned().collect())
      .unwrap_or_default();
    keys.sort();
    Ok(keys)
  }

  fn delete(&self, partition: &str) -> Result<bool, StoreError> {
    let mut partitions = self.partitions()?;
    let before = partitions.len();
    partitions.retain(|p| p.name != partition);
    Ok(partitions.len() != before)
  }
}

/// SQLite-based partition storage, durable across runs.
#[derive(Clone)]
pub struct SqliteStorage {
  db: Database,
}

impl SqliteStorage {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

/// Fixed-length primary key for an entry.
fn entry_key(key: &RequestKey) -> String {
  let mut hasher = Sha256::new();
  hasher.update(key.method.as_bytes());
  hasher.update(b" ");
  hasher.update(key.url.as_bytes());
  hex::encode(hasher.finalize())
}

fn read_entry(row: &Row<'_>) -> rusqlite::Result<(RequestKey, u16, String, Vec<u8>, String)> {
  Ok((
    RequestKey {
      method: row.get(0)?,
      url: row.get(1)?,
    },
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
    row.get(5)?,
  ))
}

fn into_entry(
  (key, status, headers, body, cached_at): (RequestKey, u16, String, Vec<u8>, String),
) -> Result<CachedEntry, StoreError> {
  let headers: BTreeMap<String, String> = serde_json::from_str(&headers)?;
  let cached_at = DateTime::parse_from_rfc3339(&cached_at)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| StoreError::Corrupt(format!("bad cached_at '{}': {}", cached_at, e)))?;

  Ok(CachedEntry {
    key,
    response: Response {
      status,
      headers,
      body,
    },
    cached_at,
  })
}

impl CacheStorage for SqliteStorage {
  fn open(&self, partition: &str) -> Result<(), StoreError> {
    self.db.conn()?.execute(
      "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)",
      params![partition],
    )?;
    Ok(())
  }

  fn has(&self, partition: &str) -> Result<bool, StoreError> {
    let found: Option<i64> = self
      .db
      .conn()?
      .query_row(
        "SELECT 1 FROM cache_partitions WHERE name = ?",
        params![partition],
        |row| row.get(0),
      )
      .optional()?;
    Ok(found.is_some())
  }

  fn match_request(
    &self,
    partition: &str,
    key: &RequestKey,
  ) -> Result<Option<CachedEntry>, StoreError> {
    let conn = self.db.conn()?;
    let row = conn
      .query_row(
        "SELECT method, url, status, headers, body, cached_at
         FROM cache_entries WHERE partition = ? AND entry_key = ?",
        params![partition, entry_key(key)],
        read_entry,
      )
      .optional()?;
    row.map(into_entry).transpose()
  }

  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedEntry>, StoreError> {
    let conn = self.db.conn()?;
    let row = conn
      .query_row(
        "SELECT ce.method, ce.url, ce.status, ce.headers, ce.body, ce.cached_at
         FROM cache_entries ce
         INNER JOIN cache_partitions cp ON cp.name = ce.partition
         WHERE ce.entry_key = ?
         ORDER BY cp.rowid
         LIMIT 1",
        params![entry_key(key)],
        read_entry,
      )
      .optional()?;
    row.map(into_entry).transpose()
  }

  fn put(&self, partition: &str, key: &RequestKey, response: &Response) -> Result<(), StoreError> {
    let headers = serde_json::to_string(&response.headers)?;
    let conn = self.db.conn()?;

    conn.execute(
      "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)",
      params![partition],
    )?;
    conn.execute(
      "INSERT OR REPLACE INTO cache_entries
         (partition, entry_key, method, url, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        partition,
        entry_key(key),
        key.method,
        key.url,
        response.status,
        headers,
        response.body,
        Utc::now().to_rfc3339(),
      ],
    )?;
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>, StoreError> {
    let conn = self.db.conn()?;
    let mut stmt = conn.prepare("SELECT name FROM cache_partitions ORDER BY rowid")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
  }

  fn entries(&self, partition: &str) -> Result<Vec<RequestKey>, StoreError> {
    let conn = self.db.conn()?;
    let mut stmt = conn.prepare(
      "SELECT method, url FROM cache_entries WHERE partition = ? ORDER BY method, url",
    )?;
    let keys = stmt
      .query_map(params![partition], |row| {
        Ok(RequestKey {
          method: row.get(0)?,
          url: row.get(1)?,
        })
      })?
      .collect::<Result<Vec<_>, _>>()?;
    Ok(keys)
  }

  fn delete(&self, partition: &str) -> Result<bool, StoreError> {
    let conn = self.db.conn()?;
    conn.execute(
      "DELETE FROM cache_entries WHERE partition = ?",
      params![partition],
    )?;
    let removed = conn.execute(
      "DELETE FROM cache_partitions WHERE name = ?",
      params![partition],
    )?;
    Ok(removed > 0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn backends() -> Vec<Box<dyn CacheStorage>> {
    vec![
      Box::new(MemoryStorage::new()),
      Box::new(SqliteStorage::new(Database::open_in_memory().unwrap())),
    ]
  }

  #[test]
  fn test_open_is_idempotent() {
    for storage in backends() {
      storage.open("synka-static-v2").unwrap();
      storage.open("synka-static-v2").unwrap();
      assert_eq!(storage.keys().unwrap(), vec!["synka-static-v2".to_string()]);
    }
  }

  #[test]
  fn test_put_overwrites_same_key() {
    let key = RequestKey::get("https://synka.in/logo.png");
    for storage in backends() {
      storage.put("p", &key, &Response::new(200, "old")).unwrap();
      storage.put("p", &key, &Response::new(200, "new")).unwrap();

      let entry = storage.match_request("p", &key).unwrap().unwrap();
      assert_eq!(entry.response.text(), "new");
      assert_eq!(storage.entries("p").unwrap(), vec![key.clone()]);
    }
  }

  #[test]
  fn test_miss_is_not_an_error() {
    for storage in backends() {
      storage.open("p").unwrap();
      let key = RequestKey::get("https://synka.in/nothing");
      assert!(storage.match_request("p", &key).unwrap().is_none());
      assert!(storage.match_request("absent", &key).unwrap().is_none());
      assert!(storage.match_any(&key).unwrap().is_none());
    }
  }

  #[test]
  fn test_match_any_prefers_oldest_partition() {
    let key = RequestKey::get("https://synka.in/a.css");
    for storage in backends() {
      storage.put("first", &key, &Response::new(200, "one")).unwrap();
      storage.put("second", &key, &Response::new(200, "two")).unwrap();
      let entry = storage.match_any(&key).unwrap().unwrap();
      assert_eq!(entry.response.text(), "one");
    }
  }

  #[test]
  fn test_delete_stale_keeps_current_version_only() {
    for storage in backends() {
      for name in ["synka-v1", "synka-static-v1", "synka-v2", "synka-data-v2"] {
        storage.open(name).unwrap();
      }
      let mut deleted = storage.delete_stale("v2").unwrap();
      deleted.sort();
      assert_eq!(deleted, vec!["synka-static-v1", "synka-v1"]);
      assert!(storage.keys().unwrap().iter().all(|n| n.contains("v2")));
    }
  }

  #[test]
  fn test_delete_drops_entries() {
    let key = RequestKey::get("https://synka.in/");
    for storage in backends() {
      storage.put("p", &key, &Response::new(200, "x")).unwrap();
      assert!(storage.delete("p").unwrap());
      assert!(!storage.delete("p").unwrap());
      assert!(storage.match_any(&key).unwrap().is_none());
    }
  }

  #[test]
  fn test_clear_all() {
    for storage in backends() {
      storage.open("a").unwrap();
      storage.open("b").unwrap();
      assert_eq!(storage.clear_all().unwrap(), 2);
      assert!(storage.keys().unwrap().is_empty());
    }
  }

  #[test]
  fn test_sqlite_round_trips_headers() {
    let storage = SqliteStorage::new(Database::open_in_memory().unwrap());
    let key = RequestKey::get("https://synka.in/app.js");
    let response = Response::new(200, "x").with_header("Content-Type", "text/javascript");
    storage.put("shell", &key, &response).unwrap();

    let entry = storage.match_request("shell", &key).unwrap().unwrap();
    assert_eq!(entry.response, response);
  }
}
