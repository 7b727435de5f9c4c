//! Scripted fetcher for unit tests.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use super::{FetchError, Fetcher, Request, Response};

#[derive(Clone)]
enum Scripted {
  Respond(Response),
  Fail,
}

/// Answers from a fixed table of URL -> response. Unknown URLs fail as if
/// the network were down.
#[derive(Default)]
pub(crate) struct ScriptedFetcher {
  routes: Mutex<HashMap<String, Scripted>>,
  calls: Mutex<Vec<String>>,
  gate: Option<Arc<Semaphore>>,
}

impl ScriptedFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Hold every fetch until a permit is added to the returned semaphore.
  pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
    let gate = Arc::new(Semaphore::new(0));
    self.gate = Some(Arc::clone(&gate));
    (self, gate)
  }

  pub fn with_response(self, url: &str, status: u16, body: &str) -> Self {
    self.respond(url, status, body);
    self
  }

  pub fn respond(&self, url: &str, status: u16, body: &str) {
    self.routes.lock().unwrap().insert(
      url.to_string(),
      Scripted::Respond(Response::new(status, body)),
    );
  }

  pub fn fail(&self, url: &str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Scripted::Fail);
  }

  pub fn calls(&self, url: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|u| u.as_str() == url)
      .count()
  }

  pub fn total_calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

impl Fetcher for ScriptedFetcher {
  fn fetch(&self, request: &Request) -> BoxFuture<'static, Result<Response, FetchError>> {
    let url = request.url.as_str().to_string();
    self.calls.lock().unwrap().push(url.clone());
    let scripted = self
      .routes
      .lock()
      .unwrap()
      .get(&url)
      .cloned()
      .unwrap_or(Scripted::Fail);
    let gate = self.gate.clone();

    async move {
      if let Some(gate) = gate {
        if let Ok(permit) = gate.acquire().await {
          permit.forget();
        }
      }
      match scripted {
        Scripted::Respond(response) => Ok(response),
        Scripted::Fail => Err(FetchError::Network(format!("offline: {}", url))),
      }
    }
    .boxed()
  }
}
