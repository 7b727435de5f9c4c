//! Core traits and types for the partitioned cache.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::db::StoreError;
use crate::net::{RequestKey, Response};

/// What a partition holds. Each purpose has exactly one live partition per
/// worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
  /// Assets primed at install time, plus images and fonts.
  Static,
  /// Scripts, styles and UI scaffolding.
  AppShell,
  /// Backend API payloads.
  DynamicData,
  /// Navigations and everything else.
  Runtime,
}

impl Purpose {
  pub const ALL: [Purpose; 4] = [
    Purpose::Static,
    Purpose::AppShell,
    Purpose::DynamicData,
    Purpose::Runtime,
  ];

  /// Infix used in the partition name; the runtime partition has none.
  fn label(self) -> Option<&'static str> {
    match self {
      Purpose::Static => Some("static"),
      Purpose::AppShell => Some("shell"),
      Purpose::DynamicData => Some("data"),
      Purpose::Runtime => None,
    }
  }
}

/// Naming scheme for one worker version's partitions.
///
/// Names look like `synka-static-v2`; the runtime partition is `synka-v2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSet {
  prefix: String,
  version: u32,
}

impl PartitionSet {
  pub fn new(prefix: impl Into<String>, version: u32) -> Self {
    Self {
      prefix: prefix.into(),
      version,
    }
  }

  pub fn version(&self) -> u32 {
    self.version
  }

  /// Token every current partition name contains.
  pub fn version_token(&self) -> String {
    format!("v{}", self.version)
  }

  pub fn name(&self, purpose: Purpose) -> String {
    match purpose.label() {
      Some(label) => format!("{}-{}-v{}", self.prefix, label, self.version),
      None => format!("{}-v{}", self.prefix, self.version),
    }
  }

  pub fn names(&self) -> Vec<String> {
    Purpose::ALL.iter().map(|p| self.name(*p)).collect()
  }
}

/// A stored request/response pair.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub key: RequestKey,
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache partition backends.
///
/// Writes are last-writer-wins per key; there is no cross-request
/// transaction. Implementations must be safe to share across tasks.
pub trait CacheStorage: Send + Sync {
  /// Open a partition, creating it if absent.
  fn open(&self, partition: &str) -> Result<(), StoreError>;

  fn has(&self, partition: &str) -> Result<bool, StoreError>;

  /// Look up a request in one partition.
  fn match_request(
    &self,
    partition: &str,
    key: &RequestKey,
  ) -> Result<Option<CachedEntry>, StoreError>;

  /// Look up a request across all partitions, oldest partition first.
  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedEntry>, StoreError>;

  /// Store a response, creating the partition if needed and replacing any
  /// entry with the same key.
  fn put(&self, partition: &str, key: &RequestKey, response: &Response) -> Result<(), StoreError>;

  /// Partition names in creation order.
  fn keys(&self) -> Result<Vec<String>, StoreError>;

  /// Request keys held by a partition.
  fn entries(&self, partition: &str) -> Result<Vec<RequestKey>, StoreError>;

  /// Delete a partition and everything in it.
  fn delete(&self, partition: &str) -> Result<bool, StoreError>;

  /// Delete every partition whose name lacks `version_token`.
  fn delete_stale(&self, version_token: &str) -> Result<Vec<String>, StoreError> {
    let mut deleted = Vec::new();
    for name in self.keys()? {
      if !name.contains(version_token) && self.delete(&name)? {
        deleted.push(name);
      }
    }
    Ok(deleted)
  }

  /// Delete every partition.
  fn clear_all(&self) -> Result<usize, StoreError> {
    let mut count = 0;
    for name in self.keys()? {
      if self.delete(&name)? {
        count += 1;
      }
    }
    Ok(count)
  }
}

/// Result from a strategy, including where the response came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Cached data served because the network failed.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// A fallback made up on the spot.
  pub fn synthesized(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Synthesized,
      cached_at: None,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Served from a partition without waiting on the network
  Cache,
  /// Network failed, serving a cached entry
  Offline,
  /// Network failed and nothing was cached; a placeholder was generated
  Synthesized,
}

impl fmt::Display for CacheSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      CacheSource::Network => "network",
      CacheSource::Cache => "cache",
      CacheSource::Offline => "offline",
      CacheSource::Synthesized => "synthesized",
    };
    f.write_str(label)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_partition_names_carry_version_token() {
    let set = PartitionSet::new("synka", 2);
    assert_eq!(set.name(Purpose::Static), "synka-static-v2");
    assert_eq!(set.name(Purpose::AppShell), "synka-shell-v2");
    assert_eq!(set.name(Purpose::DynamicData), "synka-data-v2");
    assert_eq!(set.name(Purpose::Runtime), "synka-v2");
    assert!(set.names().iter().all(|n| n.contains(&set.version_token())));
  }
}
