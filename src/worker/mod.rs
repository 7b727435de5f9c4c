//! The service-worker side: routing, lifecycle and control messages.
//!
//! All state lives on an explicitly constructed [`Worker`]; the event loop in
//! [`crate::event`] drives it.

mod clients;
mod lifecycle;
mod messages;
mod registration;
mod router;

use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::cache::{CacheLayer, CacheResult, CacheStorage, PartitionSet, Purpose};
use crate::config::Config;
use crate::db::StoreError;
use crate::net::{FetchError, Fetcher, Request, Response};

pub use clients::{ClientId, Clients};
pub use lifecycle::{ActivationReport, InstallReport, PrimeReport, StartOutcome};
pub use messages::{ClientMessage, ControlMessage, CACHE_CLEANUP_TAG, SYNC_DATA_TAG};
pub use registration::{Registration, WorkerState, WorkerVersion};
pub use router::{Route, Router, Strategy};

/// Errors that can occur handling worker events.
#[derive(Error, Debug)]
pub enum WorkerError {
  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("invalid control message: {0}")]
  InvalidMessage(String),

  #[error("unknown sync tag: {0}")]
  UnknownSyncTag(String),

  #[error("invalid origin '{0}'")]
  InvalidOrigin(String),

  #[error("worker event loop has shut down")]
  Closed,
}

/// Everything a worker needs, built once at startup.
pub struct WorkerContext {
  pub partitions: PartitionSet,
  /// Base the install manifest is resolved against.
  pub origin: Url,
  /// Install manifest.
  pub precache: Vec<String>,
  pub router: Router,
  pub storage: Arc<dyn CacheStorage>,
  pub fetcher: Arc<dyn Fetcher>,
  pub clients: Arc<Clients>,
}

impl WorkerContext {
  pub fn from_config(
    config: &Config,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
  ) -> Result<Self, WorkerError> {
    let origin = Url::parse(&config.worker.origin)
      .map_err(|_| WorkerError::InvalidOrigin(config.worker.origin.clone()))?;

    Ok(Self {
      partitions: PartitionSet::new(&config.worker.cache_prefix, config.worker.version),
      origin,
      precache: config.worker.precache.clone(),
      router: Router::new(&config.network, &config.router),
      storage,
      fetcher,
      clients: Arc::new(Clients::new()),
    })
  }
}

/// One worker instance: intercepts fetches once active.
pub struct Worker {
  partitions: PartitionSet,
  origin: Url,
  precache: Vec<String>,
  router: Router,
  storage: Arc<dyn CacheStorage>,
  clients: Arc<Clients>,
  layer: CacheLayer,
  registration: Mutex<Registration>,
}

impl Worker {
  pub fn new(ctx: WorkerContext) -> Self {
    let layer = CacheLayer::new(Arc::clone(&ctx.storage), ctx.fetcher);
    Self {
      partitions: ctx.partitions,
      origin: ctx.origin,
      precache: ctx.precache,
      router: ctx.router,
      storage: ctx.storage,
      clients: ctx.clients,
      layer,
      registration: Mutex::new(Registration::new()),
    }
  }

  fn registration(&self) -> MutexGuard<'_, Registration> {
    self.registration.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn partitions(&self) -> &PartitionSet {
    &self.partitions
  }

  pub fn storage(&self) -> &Arc<dyn CacheStorage> {
    &self.storage
  }

  pub fn clients(&self) -> &Arc<Clients> {
    &self.clients
  }

  pub fn layer(&self) -> &CacheLayer {
    &self.layer
  }

  pub fn active_version(&self) -> Option<u32> {
    self.registration().active_version()
  }

  pub fn waiting_version(&self) -> Option<u32> {
    self.registration().waiting.as_ref().map(|w| w.version)
  }

  /// Serve a request. Until a version is active nothing is intercepted.
  pub async fn handle_fetch(&self, request: &Request) -> Result<CacheResult<Response>, WorkerError> {
    let route = if self.registration().is_active() {
      self.router.classify(request)
    } else {
      Route::Passthrough
    };
    debug!(url = %request.url, ?route, "fetch");

    let result = match route {
      Route::Passthrough | Route::Bypass => {
        CacheResult::from_network(self.layer.network_only(request).await?)
      }
      Route::Cached { strategy, purpose } => {
        let partition = self.partitions.name(purpose);
        match strategy {
          Strategy::CacheFirst => self.layer.cache_first(request, &partition).await,
          Strategy::NetworkFirst => self.layer.network_first(request, &partition).await?,
          Strategy::StaleWhileRevalidate => {
            self
              .layer
              .stale_while_revalidate(request, &partition)
              .await?
          }
        }
      }
    };

    Ok(result)
  }

  /// Background sync. `sync-data` tells every page to refetch; returns the
  /// number of pages notified.
  pub fn handle_sync(&self, tag: &str) -> Result<usize, WorkerError> {
    if tag != SYNC_DATA_TAG {
      return Err(WorkerError::UnknownSyncTag(tag.to_string()));
    }
    let notified = self.clients.broadcast(&ClientMessage::SyncComplete);
    info!(notified, "background sync complete");
    Ok(notified)
  }

  /// Partition currently used for `purpose`.
  pub fn partition(&self, purpose: Purpose) -> String {
    self.partitions.name(purpose)
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::cache::{CacheSource, MemoryStorage};
  use crate::net::testing::ScriptedFetcher;
  use crate::net::Destination;

  pub(crate) const ORIGIN: &str = "https://synka.in";

  pub(crate) fn config(version: u32, precache: &[&str]) -> Config {
    let mut config = Config::default();
    config.worker.version = version;
    config.worker.origin = ORIGIN.to_string();
    config.worker.precache = precache.iter().map(|s| s.to_string()).collect();
    config.network.api_host = "api.example.com".to_string();
    config
  }

  pub(crate) fn worker_with(
    config: &Config,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<ScriptedFetcher>,
  ) -> Worker {
    Worker::new(WorkerContext::from_config(config, storage, fetcher).unwrap())
  }

  async fn active_worker(fetcher: Arc<ScriptedFetcher>) -> Worker {
    let worker = worker_with(&config(2, &[]), Arc::new(MemoryStorage::new()), fetcher);
    worker.install_and_activate().await.unwrap();
    worker
  }

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  #[tokio::test]
  async fn test_inactive_worker_does_not_intercept() {
    let url = "https://api.example.com/data";
    let fetcher = Arc::new(ScriptedFetcher::new().with_response(url, 200, "x"));
    let storage = Arc::new(MemoryStorage::new());
    let worker = worker_with(&config(2, &[]), storage.clone(), fetcher);

    worker.handle_fetch(&get(url)).await.unwrap();
    assert!(storage.keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_auth_traffic_never_touches_cache() {
    let url = "https://api.example.com/auth/v1/token";
    let fetcher = Arc::new(ScriptedFetcher::new().with_response(url, 200, "token-1"));
    let worker = active_worker(fetcher.clone()).await;
    let request = get(url);

    // Even with a poisoned entry present, auth goes to the network.
    worker
      .storage()
      .put(&worker.partition(Purpose::DynamicData), &request.key(), &Response::new(200, "stale"))
      .unwrap();

    let first = worker.handle_fetch(&request).await.unwrap();
    assert_eq!(first.data.text(), "token-1");
    assert_eq!(first.source, CacheSource::Network);

    fetcher.fail(url);
    assert!(worker.handle_fetch(&request).await.is_err());
    assert_eq!(fetcher.calls(url), 2);
  }

  #[tokio::test]
  async fn test_api_network_first_scenario() {
    let url = "https://api.example.com/data";
    let fetcher = Arc::new(ScriptedFetcher::new().with_response(url, 200, r#"{"v":1}"#));
    let worker = active_worker(fetcher.clone()).await;
    let request = get(url);

    worker.handle_fetch(&request).await.unwrap();
    let stored = worker
      .storage()
      .match_request("synka-data-v2", &request.key())
      .unwrap()
      .unwrap();
    assert_eq!(stored.response.text(), r#"{"v":1}"#);

    fetcher.fail(url);
    let fallback = worker.handle_fetch(&request).await.unwrap();
    assert_eq!(fallback.data.text(), r#"{"v":1}"#);
  }

  #[tokio::test]
  async fn test_uncached_navigation_offline_is_an_error() {
    let worker = active_worker(Arc::new(ScriptedFetcher::new())).await;
    let request = Request::navigate(Url::parse("https://synka.in/u/someone").unwrap());

    let err = worker.handle_fetch(&request).await.unwrap_err();
    assert!(matches!(err, WorkerError::Fetch(FetchError::Network(_))));
  }

  #[tokio::test]
  async fn test_images_cached_in_static_partition() {
    let url = "https://cdn.synka.in/avatar.jpg";
    let fetcher = Arc::new(ScriptedFetcher::new().with_response(url, 200, "jpg"));
    let worker = active_worker(fetcher.clone()).await;
    let request = get(url).with_destination(Destination::Image);

    worker.handle_fetch(&request).await.unwrap();
    let again = worker.handle_fetch(&request).await.unwrap();

    assert_eq!(again.source, CacheSource::Cache);
    assert_eq!(fetcher.calls(url), 1);
    assert_eq!(
      worker.storage().entries("synka-static-v2").unwrap(),
      vec![request.key()]
    );
  }

  #[tokio::test]
  async fn test_sync_data_broadcasts_to_pages() {
    let worker = active_worker(Arc::new(ScriptedFetcher::new())).await;
    let (_, mut rx) = worker.clients().connect(Url::parse(ORIGIN).unwrap());

    assert_eq!(worker.handle_sync(SYNC_DATA_TAG).unwrap(), 1);
    assert_eq!(rx.recv().await, Some(ClientMessage::SyncComplete));
  }

  #[tokio::test]
  async fn test_unknown_sync_tag_rejected() {
    let worker = active_worker(Arc::new(ScriptedFetcher::new())).await;
    assert!(matches!(
      worker.handle_sync("sync-everything"),
      Err(WorkerError::UnknownSyncTag(_))
    ));
  }
}
