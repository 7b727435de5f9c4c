//! Host-side offline persistence: the mutation queue and read snapshots.

mod connectivity;
mod queue;
mod snapshot;

pub use connectivity::Connectivity;
pub use queue::{
  BackgroundSync, ChangeType, OfflineQueue, ProcessOutcome, QueuedChange, SyncRequest, QUEUE_KEY,
};
pub use snapshot::{OfflineSnapshots, SNAPSHOT_PREFIX};

/// Notifications delivered to the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
  /// Queued changes were flushed or the worker finished a background sync;
  /// refetch whatever is on screen.
  DataSync,
}

impl HostEvent {
  /// Event name the host listens for.
  pub fn name(&self) -> &'static str {
    match self {
      HostEvent::DataSync => "synka:data-sync",
    }
  }
}
