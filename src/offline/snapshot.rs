//! Last-known-good read data, kept for offline use.

use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::connectivity::Connectivity;
use super::queue::QUEUE_KEY;
use crate::clock::Clock;
use crate::db::{LocalStore, StoreError};

/// Prefix for snapshot keys in the local store.
pub const SNAPSHOT_PREFIX: &str = "offline_";

/// Stored form of a snapshot. Times are epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Snapshot<T> {
  data: T,
  timestamp: i64,
  expiry: i64,
}

pub struct OfflineSnapshots {
  store: Arc<dyn LocalStore>,
  connectivity: Connectivity,
  clock: Arc<dyn Clock>,
  ttl: Duration,
}

impl OfflineSnapshots {
  pub fn new(store: Arc<dyn LocalStore>, connectivity: Connectivity, clock: Arc<dyn Clock>) -> Self {
    Self {
      store,
      connectivity,
      clock,
      ttl: Duration::days(7),
    }
  }

  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  fn storage_key(key: &str) -> String {
    format!("{}{}", SNAPSHOT_PREFIX, key)
  }

  /// Save `data` under `key`, replacing any previous snapshot.
  ///
  /// If the write fails, expired and malformed snapshots are cleaned up
  /// before the error is returned. The write is not retried.
  pub fn persist_for_offline<T: Serialize>(&self, key: &str, data: &T) -> Result<(), StoreError> {
    let now = self.clock.now_millis();
    let snapshot = Snapshot {
      data,
      timestamp: now,
      expiry: now.saturating_add(self.ttl.num_milliseconds()),
    };
    let json = serde_json::to_string(&snapshot)?;

    if let Err(e) = self.store.set_item(&Self::storage_key(key), &json) {
      warn!(key, error = %e, "failed to persist offline data");
      if let Err(cleanup) = self.cleanup_old_offline_data() {
        warn!(error = %cleanup, "offline data cleanup failed");
      }
      return Err(e);
    }
    Ok(())
  }

  /// Read a snapshot. Offline, expiry is ignored. Online, an expired
  /// snapshot is deleted and reads as absent. Unreadable snapshots are
  /// deleted too.
  pub fn get_offline_data<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let storage_key = Self::storage_key(key);
    let raw = match self.store.get_item(&storage_key) {
      Ok(Some(raw)) => raw,
      Ok(None) => return None,
      Err(e) => {
        warn!(key, error = %e, "failed to read offline data");
        return None;
      }
    };

    let snapshot = match serde_json::from_str::<Snapshot<T>>(&raw) {
      Ok(snapshot) => snapshot,
      Err(e) => {
        debug!(key, error = %e, "malformed offline snapshot, removing");
        self.remove(&storage_key);
        return None;
      }
    };

    if !self.connectivity.is_online() || self.clock.now_millis() <= snapshot.expiry {
      return Some(snapshot.data);
    }

    debug!(key, "offline snapshot expired");
    self.remove(&storage_key);
    None
  }

  fn remove(&self, storage_key: &str) {
    if let Err(e) = self.store.remove_item(storage_key) {
      warn!(key = storage_key, error = %e, "failed to remove offline data");
    }
  }

  /// Delete expired or unreadable snapshots. Returns the deleted keys.
  pub fn cleanup_old_offline_data(&self) -> Result<Vec<String>, StoreError> {
    let now = self.clock.now_millis();
    let mut removed = Vec::new();

    for key in self.store.keys()? {
      if !key.starts_with(SNAPSHOT_PREFIX) || key == QUEUE_KEY {
        continue;
      }
      let Some(raw) = self.store.get_item(&key)? else {
        continue;
      };
      let expired = match serde_json::from_str::<Snapshot<Value>>(&raw) {
        Ok(snapshot) => now > snapshot.expiry,
        Err(_) => true,
      };
      if expired {
        self.store.remove_item(&key)?;
        removed.push(key);
      }
    }

    if !removed.is_empty() {
      debug!(count = removed.len(), "cleaned up offline data");
    }
    Ok(removed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::db::MemoryLocalStore;
  use chrono::{TimeZone, Utc};
  use serde_json::json;

  struct Fixture {
    snapshots: OfflineSnapshots,
    store: Arc<MemoryLocalStore>,
    clock: ManualClock,
    connectivity: Connectivity,
  }

  fn fixture(store: MemoryLocalStore) -> Fixture {
    let store = Arc::new(store);
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap());
    let connectivity = Connectivity::new(true);
    let snapshots = OfflineSnapshots::new(store.clone(), connectivity.clone(), Arc::new(clock.clone()));
    Fixture {
      snapshots,
      store,
      clock,
      connectivity,
    }
  }

  #[test]
  fn test_snapshot_format() {
    let f = fixture(MemoryLocalStore::new());
    f.snapshots.persist_for_offline("cards_u1", &json!([1, 2])).unwrap();

    let raw: Value = serde_json::from_str(&f.store.get_item("offline_cards_u1").unwrap().unwrap()).unwrap();
    let ts = raw["timestamp"].as_i64().unwrap();
    assert_eq!(raw["data"], json!([1, 2]));
    assert_eq!(raw["expiry"].as_i64().unwrap() - ts, 7 * 24 * 60 * 60 * 1000);
  }

  #[test]
  fn test_expiry_strict_online_permissive_offline() {
    let f = fixture(MemoryLocalStore::new());
    f.snapshots.persist_for_offline("cards_u1", &vec!["a", "b"]).unwrap();

    f.clock.advance(Duration::days(7));
    assert_eq!(
      f.snapshots.get_offline_data::<Vec<String>>("cards_u1"),
      Some(vec!["a".to_string(), "b".to_string()])
    );

    f.clock.advance(Duration::milliseconds(1));
    f.connectivity.set_online(false);
    assert!(f.snapshots.get_offline_data::<Vec<String>>("cards_u1").is_some());

    f.connectivity.set_online(true);
    assert_eq!(f.snapshots.get_offline_data::<Vec<String>>("cards_u1"), None);
    assert_eq!(f.store.get_item("offline_cards_u1").unwrap(), None);
  }

  #[test]
  fn test_malformed_snapshot_reads_absent() {
    let f = fixture(MemoryLocalStore::new());
    f.store.set_item("offline_profile_u1", "garbage").unwrap();

    assert_eq!(f.snapshots.get_offline_data::<Value>("profile_u1"), None);
    assert_eq!(f.store.get_item("offline_profile_u1").unwrap(), None);
    assert_eq!(f.snapshots.get_offline_data::<Value>("missing"), None);
  }

  #[test]
  fn test_cleanup_removes_expired_and_malformed() {
    let f = fixture(MemoryLocalStore::new());
    f.snapshots.persist_for_offline("old", &1).unwrap();
    f.clock.advance(Duration::days(8));
    f.snapshots.persist_for_offline("fresh", &2).unwrap();
    f.store.set_item("offline_broken", "{").unwrap();
    f.store.set_item(QUEUE_KEY, "[]").unwrap();
    f.store.set_item("theme", "dark").unwrap();

    let mut removed = f.snapshots.cleanup_old_offline_data().unwrap();
    removed.sort();
    assert_eq!(removed, vec!["offline_broken", "offline_old"]);

    let keys = f.store.keys().unwrap();
    assert_eq!(keys, vec!["offline_fresh", "offline_sync_queue", "theme"]);
  }

  #[test]
  fn test_failed_write_triggers_cleanup() {
    let f = fixture(MemoryLocalStore::with_quota(140));
    f.snapshots.persist_for_offline("a", &"x".repeat(20)).unwrap();
    f.clock.advance(Duration::days(8));

    let err = f
      .snapshots
      .persist_for_offline("b", &"y".repeat(60))
      .unwrap_err();
    assert!(matches!(err, StoreError::QuotaExceeded { .. }));
    assert_eq!(f.store.get_item("offline_a").unwrap(), None);

    // With the expired snapshot gone the write now fits.
    f.snapshots.persist_for_offline("b", &"y".repeat(60)).unwrap();
  }
}
