//! Durable log of mutations made while offline.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connectivity::Connectivity;
use super::HostEvent;
use crate::clock::Clock;
use crate::db::{LocalStore, StoreError};
use crate::worker::{ClientMessage, WorkerError, SYNC_DATA_TAG};

/// Local-store key holding the queue as one JSON array.
pub const QUEUE_KEY: &str = "offline_sync_queue";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
  Create,
  Update,
  Delete,
}

impl fmt::Display for ChangeType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      ChangeType::Create => "create",
      ChangeType::Update => "update",
      ChangeType::Delete => "delete",
    };
    f.write_str(label)
  }
}

impl FromStr for ChangeType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "create" => Ok(ChangeType::Create),
      "update" => Ok(ChangeType::Update),
      "delete" => Ok(ChangeType::Delete),
      other => Err(format!("unknown change type '{}'", other)),
    }
  }
}

/// One pending mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedChange {
  #[serde(rename = "type")]
  pub change_type: ChangeType,
  pub table: String,
  pub data: Value,
  /// Milliseconds since the Unix epoch.
  pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
  /// Nothing happened because we are offline.
  Offline,
  Empty,
  /// The queue held this many entries and was cleared.
  Flushed(usize),
}

/// Platform hook that runs the queue flush later, even without a page open.
pub trait BackgroundSync: Send + Sync {
  fn register(&self, tag: &str) -> Result<(), WorkerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRequest {
  /// Deferred to the platform hook.
  Registered,
  /// No hook (or it failed); the queue was processed right away.
  Immediate(ProcessOutcome),
}

/// The host-side offline queue.
///
/// Processing does not replay entries one by one: it clears the queue and
/// emits a single [`HostEvent::DataSync`] so the host refetches everything.
pub struct OfflineQueue {
  store: Arc<dyn LocalStore>,
  connectivity: Connectivity,
  clock: Arc<dyn Clock>,
  events: broadcast::Sender<HostEvent>,
  max_entries: Option<usize>,
  /// Held across every read-modify-write of the stored queue.
  write: Mutex<()>,
}

impl OfflineQueue {
  pub fn new(store: Arc<dyn LocalStore>, connectivity: Connectivity, clock: Arc<dyn Clock>) -> Self {
    let (events, _) = broadcast::channel(16);
    Self {
      store,
      connectivity,
      clock,
      events,
      max_entries: None,
      write: Mutex::new(()),
    }
  }

  /// Keep at most `max` entries, dropping the oldest on overflow.
  pub fn with_max_entries(mut self, max: Option<usize>) -> Self {
    self.max_entries = max;
    self
  }

  pub fn connectivity(&self) -> &Connectivity {
    &self.connectivity
  }

  /// Receive host notifications such as [`HostEvent::DataSync`].
  pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
    self.events.subscribe()
  }

  fn lock(&self) -> MutexGuard<'_, ()> {
    self.write.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Queued entries in insertion order. A corrupt queue reads as empty and
  /// is removed.
  pub fn pending(&self) -> Result<Vec<QueuedChange>, StoreError> {
    let _guard = self.lock();
    self.load()
  }

  fn load(&self) -> Result<Vec<QueuedChange>, StoreError> {
    let Some(raw) = self.store.get_item(QUEUE_KEY)? else {
      return Ok(Vec::new());
    };
    match serde_json::from_str(&raw) {
      Ok(queue) => Ok(queue),
      Err(e) => {
        warn!(error = %e, "offline queue is corrupt, discarding");
        self.store.remove_item(QUEUE_KEY)?;
        Ok(Vec::new())
      }
    }
  }

  /// Append a mutation to the queue.
  pub fn queue_change(
    &self,
    change_type: ChangeType,
    table: &str,
    data: Value,
  ) -> Result<(), StoreError> {
    let _guard = self.lock();
    let mut queue = self.load()?;
    queue.push(QueuedChange {
      change_type,
      table: table.to_string(),
      data,
      timestamp: self.clock.now_millis(),
    });

    if let Some(max) = self.max_entries {
      if queue.len() > max {
        let dropped = queue.len() - max;
        queue.drain(..dropped);
        warn!(dropped, max, "offline queue full, dropped oldest changes");
      }
    }

    self
      .store
      .set_item(QUEUE_KEY, &serde_json::to_string(&queue)?)?;
    debug!(%change_type, table, len = queue.len(), "queued offline change");
    Ok(())
  }

  /// Flush the queue if online.
  pub fn process_queue(&self) -> Result<ProcessOutcome, StoreError> {
    if !self.connectivity.is_online() {
      return Ok(ProcessOutcome::Offline);
    }

    let count = {
      let _guard = self.lock();
      let queue = self.load()?;
      if queue.is_empty() {
        return Ok(ProcessOutcome::Empty);
      }
      self.store.remove_item(QUEUE_KEY)?;
      queue.len()
    };

    info!(count, "processed queued changes");
    self.notify(HostEvent::DataSync);
    Ok(ProcessOutcome::Flushed(count))
  }

  /// Ask the platform to flush later, or flush now when it can't.
  pub fn request_background_sync(
    &self,
    platform: Option<&dyn BackgroundSync>,
  ) -> Result<SyncRequest, StoreError> {
    if let Some(platform) = platform {
      match platform.register(SYNC_DATA_TAG) {
        Ok(()) => return Ok(SyncRequest::Registered),
        Err(e) => warn!(error = %e, "background sync unavailable"),
      }
    }
    Ok(SyncRequest::Immediate(self.process_queue()?))
  }

  /// React to a broadcast from the worker.
  pub fn handle_client_message(&self, message: &ClientMessage) {
    match message {
      ClientMessage::SyncComplete => self.notify(HostEvent::DataSync),
    }
  }

  fn notify(&self, event: HostEvent) {
    if self.events.send(event).is_err() {
      debug!(?event, "no host listeners");
    }
  }

  /// Process the queue every time connectivity comes back.
  pub fn flush_on_reconnect(self: Arc<Self>) -> JoinHandle<()> {
    let mut rx = self.connectivity.subscribe();
    tokio::spawn(async move {
      while rx.changed().await.is_ok() {
        let online = *rx.borrow_and_update();
        if !online {
          continue;
        }
        match self.process_queue() {
          Ok(outcome) => debug!(?outcome, "reconnect flush"),
          Err(e) => warn!(error = %e, "failed to process offline queue"),
        }
      }
    })
  }
}
