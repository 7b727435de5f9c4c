//! Messages exchanged between the host application and the worker.

use serde::{Deserialize, Serialize};

use super::WorkerError;

/// Background-sync tag that triggers a client refresh.
pub const SYNC_DATA_TAG: &str = "sync-data";

/// Periodic-sync tag that re-runs stale partition cleanup.
pub const CACHE_CLEANUP_TAG: &str = "cache-cleanup";

/// Host -> worker control messages. Fire and forget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  /// Activate the waiting version now.
  SkipWaiting,
  /// Delete every partition.
  ClearCache,
  /// Prime the static partition with these URLs.
  CacheUrls {
    #[serde(default)]
    urls: Vec<String>,
  },
}

impl ControlMessage {
  /// Parse a JSON message; unknown `type` tags are rejected.
  pub fn parse(json: &str) -> Result<Self, WorkerError> {
    serde_json::from_str(json).map_err(|e| WorkerError::InvalidMessage(e.to_string()))
  }
}

/// Worker -> client broadcast messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  /// Background sync ran; refetch whatever is on screen.
  SyncComplete,
}
