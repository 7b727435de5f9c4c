use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::cache::CacheResult;
use crate::net::{Request, Response};
use crate::offline::BackgroundSync;
use crate::worker::{ControlMessage, InstallReport, Worker, WorkerError};

type Reply<T> = oneshot::Sender<Result<T, WorkerError>>;

/// Events delivered to the worker
#[derive(Debug)]
pub enum WorkerEvent {
  /// Install the configured version and activate it if possible
  Install { respond_to: Reply<InstallReport> },
  /// Intercepted request from a page
  Fetch {
    request: Request,
    respond_to: Reply<CacheResult<Response>>,
  },
  /// Fire-and-forget control message from the host
  Message(ControlMessage),
  /// Background sync fired for `tag`
  Sync {
    tag: String,
    respond_to: Option<Reply<usize>>,
  },
  /// Periodic sync fired for `tag`
  PeriodicSync { tag: String },
  /// Stop after waiting for background revalidations
  Shutdown,
}

/// Cloneable sender side of the event loop.
#[derive(Debug, Clone)]
pub struct EventHandle {
  tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl EventHandle {
  fn send(&self, event: WorkerEvent) -> Result<(), WorkerError> {
    self.tx.send(event).map_err(|_| WorkerError::Closed)
  }

  async fn request<T>(
    &self,
    make: impl FnOnce(Reply<T>) -> WorkerEvent,
  ) -> Result<T, WorkerError> {
    let (respond_to, rx) = oneshot::channel();
    self.send(make(respond_to))?;
    rx.await.map_err(|_| WorkerError::Closed)?
  }

  pub async fn install(&self) -> Result<InstallReport, WorkerError> {
    self
      .request(|respond_to| WorkerEvent::Install { respond_to })
      .await
  }

  pub async fn fetch(&self, request: Request) -> Result<CacheResult<Response>, WorkerError> {
    self
      .request(|respond_to| WorkerEvent::Fetch {
        request,
        respond_to,
      })
      .await
  }

  pub fn post_message(&self, message: ControlMessage) -> Result<(), WorkerError> {
    self.send(WorkerEvent::Message(message))
  }

  /// Fire a background sync and wait for the number of pages notified.
  pub async fn sync(&self, tag: &str) -> Result<usize, WorkerError> {
    let tag = tag.to_string();
    self
      .request(|respond_to| WorkerEvent::Sync {
        tag,
        respond_to: Some(respond_to),
      })
      .await
  }

  pub fn periodic_sync(&self, tag: &str) -> Result<(), WorkerError> {
    self.send(WorkerEvent::PeriodicSync {
      tag: tag.to_string(),
    })
  }

  pub fn shutdown(&self) {
    let _ = self.tx.send(WorkerEvent::Shutdown);
  }
}

/// Registering a sync tag queues the sync event without waiting for it.
impl BackgroundSync for EventHandle {
  fn register(&self, tag: &str) -> Result<(), WorkerError> {
    self.send(WorkerEvent::Sync {
      tag: tag.to_string(),
      respond_to: None,
    })
  }
}

/// Single control loop for a worker.
///
/// Events are handled one at a time in arrival order, except fetches, which
/// are spawned so concurrent requests interleave.
pub struct EventLoop {
  worker: Arc<Worker>,
  rx: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl EventLoop {
  pub fn new(worker: Arc<Worker>) -> (Self, EventHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { worker, rx }, EventHandle { tx })
  }

  /// Run until shutdown or until every handle is dropped.
  pub async fn run(mut self) {
    while let Some(event) = self.rx.recv().await {
      match event {
        WorkerEvent::Install { respond_to } => {
          let _ = respond_to.send(self.worker.install_and_activate().await);
        }
        WorkerEvent::Fetch {
          request,
          respond_to,
        } => {
          let worker = Arc::clone(&self.worker);
          tokio::spawn(async move {
            let _ = respond_to.send(worker.handle_fetch(&request).await);
          });
        }
        WorkerEvent::Message(message) => {
          if let Err(e) = self.worker.handle_message(message).await {
            warn!(error = %e, "control message failed");
          }
        }
        WorkerEvent::Sync { tag, respond_to } => {
          let result = self.worker.handle_sync(&tag);
          if let Err(e) = &result {
            warn!(tag, error = %e, "sync failed");
          }
          if let Some(respond_to) = respond_to {
            let _ = respond_to.send(result);
          }
        }
        WorkerEvent::PeriodicSync { tag } => {
          if let Err(e) = self.worker.handle_periodic_sync(&tag) {
            warn!(tag, error = %e, "periodic sync failed");
          }
        }
        WorkerEvent::Shutdown => break,
      }
    }

    self.worker.layer().wait_until_idle().await;
    debug!("worker event loop stopped");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, CacheStorage, MemoryStorage};
  use crate::net::testing::ScriptedFetcher;
  use crate::offline::{ChangeType, Connectivity, OfflineQueue, SyncRequest};
  use crate::worker::tests::{config, worker_with, ORIGIN};
  use crate::clock::SystemClock;
  use crate::db::MemoryLocalStore;
  use crate::worker::{ClientMessage, SYNC_DATA_TAG};
  use url::Url;

  fn spawn_loop(
    storage: Arc<MemoryStorage>,
    fetcher: Arc<ScriptedFetcher>,
  ) -> (Arc<Worker>, EventHandle, tokio::task::JoinHandle<()>) {
    let worker = Arc::new(worker_with(&config(2, &["/"]), storage, fetcher));
    let (event_loop, handle) = EventLoop::new(Arc::clone(&worker));
    let task = tokio::spawn(event_loop.run());
    (worker, handle, task)
  }

  #[tokio::test]
  async fn test_install_then_fetch_through_loop() {
    let url = "https://synka.in/";
    let fetcher = Arc::new(ScriptedFetcher::new().with_response(url, 200, "<html>"));
    let (_, handle, task) = spawn_loop(Arc::new(MemoryStorage::new()), fetcher.clone());

    let report = handle.install().await.unwrap();
    assert_eq!(report.primed.cached, vec!["/"]);

    // The primed page sits in the static partition; navigations read the
    // runtime one.
    let request = Request::navigate(Url::parse(url).unwrap());
    let result = handle.fetch(request).await.unwrap();
    assert_eq!(result.source, CacheSource::Network);

    handle.shutdown();
    task.await.unwrap();
  }

  #[tokio::test]
  async fn test_shutdown_waits_for_revalidation() {
    let url = "https://synka.in/app.css";
    let (fetcher, gate) = ScriptedFetcher::new().gated();
    let fetcher = Arc::new(fetcher.with_response(url, 200, "new"));
    let storage = Arc::new(MemoryStorage::new());
    let (_, handle, task) = spawn_loop(storage.clone(), fetcher);

    // One permit for the manifest fetch during install.
    gate.add_permits(1);
    handle.install().await.unwrap();

    let request = Request::get(Url::parse(url).unwrap());
    storage
      .put("synka-shell-v2", &request.key(), &Response::new(200, "old"))
      .unwrap();
    let result = handle.fetch(request.clone()).await.unwrap();
    assert_eq!(result.data.text(), "old");

    handle.shutdown();
    gate.add_permits(1);
    task.await.unwrap();

    let entry = storage
      .match_request("synka-shell-v2", &request.key())
      .unwrap()
      .unwrap();
    assert_eq!(entry.response.text(), "new");
  }

  #[tokio::test]
  async fn test_messages_and_sync_through_loop() {
    let storage = Arc::new(MemoryStorage::new());
    let fetcher = Arc::new(ScriptedFetcher::new().with_response("https://synka.in/", 200, "x"));
    let (worker, handle, task) = spawn_loop(storage.clone(), fetcher);
    handle.install().await.unwrap();
    let (_, mut page) = worker.clients().connect(Url::parse(ORIGIN).unwrap());

    assert_eq!(handle.sync(SYNC_DATA_TAG).await.unwrap(), 1);
    assert_eq!(page.recv().await, Some(ClientMessage::SyncComplete));
    assert!(matches!(
      handle.sync("nope").await,
      Err(WorkerError::UnknownSyncTag(_))
    ));

    handle.post_message(ControlMessage::ClearCache).unwrap();
    handle.shutdown();
    task.await.unwrap();
    assert!(storage.keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_handle_errors_after_shutdown() {
    let (_, handle, task) = spawn_loop(
      Arc::new(MemoryStorage::new()),
      Arc::new(ScriptedFetcher::new()),
    );
    handle.shutdown();
    task.await.unwrap();

    assert!(matches!(handle.install().await, Err(WorkerError::Closed)));
    assert!(handle.post_message(ControlMessage::SkipWaiting).is_err());
  }

  #[tokio::test]
  async fn test_background_sync_through_handle() {
    let fetcher = Arc::new(ScriptedFetcher::new().with_response("https://synka.in/", 200, "x"));
    let (worker, handle, task) = spawn_loop(Arc::new(MemoryStorage::new()), fetcher);
    handle.install().await.unwrap();
    let (_, mut page) = worker.clients().connect(Url::parse(ORIGIN).unwrap());

    let queue = OfflineQueue::new(
      Arc::new(MemoryLocalStore::new()),
      Connectivity::new(true),
      Arc::new(SystemClock),
    );
    let mut host = queue.subscribe();
    queue
      .queue_change(ChangeType::Update, "cards", serde_json::json!({"id": 1}))
      .unwrap();

    assert_eq!(
      queue.request_background_sync(Some(&handle)).unwrap(),
      SyncRequest::Registered
    );

    let message = page.recv().await.unwrap();
    queue.handle_client_message(&message);
    assert_eq!(host.recv().await.unwrap(), crate::offline::HostEvent::DataSync);

    handle.shutdown();
    task.await.unwrap();
  }
}
