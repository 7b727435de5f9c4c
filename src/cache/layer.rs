//! Cache layer that orchestrates caching strategies with network fetching.

use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::traits::{CacheResult, CacheStorage, CachedEntry};
use crate::net::{Destination, FetchError, Fetcher, Request, RequestKey, Response};

type Revalidation = JoinHandle<Result<Response, FetchError>>;

/// Cache layer that manages caching strategies and network fetching.
///
/// This layer sits between the fetch router and the network client. Storage
/// failures never fail a request: a failed read counts as a miss and a
/// failed write is logged and dropped.
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
  fetcher: Arc<dyn Fetcher>,
  /// Background revalidations started by stale-while-revalidate.
  pending: Arc<Mutex<Vec<Revalidation>>>,
}

impl CacheLayer {
  /// Create a new cache layer over the given storage and network client.
  pub fn new(storage: Arc<dyn CacheStorage>, fetcher: Arc<dyn Fetcher>) -> Self {
    Self {
      storage,
      fetcher,
      pending: Arc::new(Mutex::new(Vec::new())),
    }
  }

  /// Look up across every partition.
  fn lookup_any(&self, key: &RequestKey) -> Option<CachedEntry> {
    self.storage.match_any(key).unwrap_or_else(|e| {
      warn!(%key, error = %e, "cache read failed, treating as miss");
      None
    })
  }

  fn lookup_in(&self, partition: &str, key: &RequestKey) -> Option<CachedEntry> {
    self
      .storage
      .match_request(partition, key)
      .unwrap_or_else(|e| {
        warn!(%key, partition, error = %e, "cache read failed, treating as miss");
        None
      })
  }

  /// Go straight to the network without touching any partition.
  pub async fn network_only(&self, request: &Request) -> Result<Response, FetchError> {
    self.fetcher.fetch(request).await
  }

  /// Cache-first strategy, for images and fonts.
  ///
  /// 1. Cached anywhere - return it without a network call
  /// 2. Otherwise fetch, storing 2xx responses in `partition`
  /// 3. Network failure - SVG placeholder for images, 503 for the rest
  ///
  /// Never fails.
  pub async fn cache_first(&self, request: &Request, partition: &str) -> CacheResult<Response> {
    let key = request.key();

    if let Some(cached) = self.lookup_any(&key) {
      return CacheResult::from_cache(cached.response, cached.cached_at);
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.ok() {
          store(self.storage.as_ref(), partition, &key, &response);
        }
        CacheResult::from_network(response)
      }
      Err(e) => {
        debug!(%key, error = %e, "cache-first fetch failed, synthesizing fallback");
        if request.destination == Destination::Image {
          CacheResult::synthesized(Response::placeholder_image())
        } else {
          CacheResult::synthesized(Response::offline())
        }
      }
    }
  }

  /// Network-first strategy, for backend API calls.
  ///
  /// 1. Fetch; store 2xx responses in `partition`
  /// 2. Network failure - any cached entry
  /// 3. Nothing cached - the original error
  pub async fn network_first(
    &self,
    request: &Request,
    partition: &str,
  ) -> Result<CacheResult<Response>, FetchError> {
    let key = request.key();

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.ok() {
          store(self.storage.as_ref(), partition, &key, &response);
        }
        Ok(CacheResult::from_network(response))
      }
      Err(e) => match self.lookup_any(&key) {
        Some(cached) => {
          debug!(%key, error = %e, "network failed, serving cached response");
          Ok(CacheResult::offline(cached.response, cached.cached_at))
        }
        None => Err(e),
      },
    }
  }

  /// Stale-while-revalidate strategy, for the app shell and navigations.
  ///
  /// A network fetch always starts. If `partition` has an entry it is
  /// returned at once and the fetch refreshes the entry in the background;
  /// otherwise the caller waits on the fetch and sees its error.
  pub async fn stale_while_revalidate(
    &self,
    request: &Request,
    partition: &str,
  ) -> Result<CacheResult<Response>, FetchError> {
    let key = request.key();
    let cached = self.lookup_in(partition, &key);

    let revalidation = {
      let storage = Arc::clone(&self.storage);
      let fetch = self.fetcher.fetch(request);
      let partition = partition.to_string();
      let key = key.clone();
      tokio::spawn(async move {
        let response = fetch.await?;
        if response.ok() {
          store(storage.as_ref(), &partition, &key, &response);
        }
        Ok(response)
      })
    };

    match cached {
      Some(cached) => {
        self.track(revalidation);
        Ok(CacheResult::from_cache(cached.response, cached.cached_at))
      }
      None => {
        let response = revalidation
          .await
          .map_err(|e| FetchError::Network(format!("revalidation task failed: {}", e)))??;
        Ok(CacheResult::from_network(response))
      }
    }
  }

  fn track(&self, handle: Revalidation) {
    match self.pending.lock() {
      Ok(mut pending) => {
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
      }
      Err(e) => warn!(error = %e, "revalidation list poisoned, not tracking task"),
    }
  }

  /// Wait for every background revalidation started so far.
  pub async fn wait_until_idle(&self) {
    let handles: Vec<Revalidation> = match self.pending.lock() {
      Ok(mut pending) => pending.drain(..).collect(),
      Err(_) => return,
    };

    for handle in handles {
      match handle.await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => debug!(error = %e, "background revalidation dropped"),
        Err(e) => warn!(error = %e, "background revalidation panicked"),
      }
    }
  }
}

/// Write a response, logging instead of failing.
fn store(storage: &dyn CacheStorage, partition: &str, key: &RequestKey, response: &Response) {
  if let Err(e) = storage.put(partition, key, response) {
    warn!(%key, partition, error = %e, "failed to cache response");
  }
}

impl Clone for CacheLayer {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      fetcher: Arc::clone(&self.fetcher),
      pending: Arc::clone(&self.pending),
    }
  }
}
