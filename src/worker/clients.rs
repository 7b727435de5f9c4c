//! Pages connected to the worker.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

use super::messages::ClientMessage;

/// Unique identifier for a connected page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
  fn new() -> Self {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    Self(COUNTER.fetch_add(1, Ordering::Relaxed))
  }
}

#[derive(Debug)]
struct Client {
  /// Whether this worker generation intercepts the page's requests.
  controlled: bool,
  tx: mpsc::UnboundedSender<ClientMessage>,
}

/// Registry of open pages, used for `claim` and broadcasts.
#[derive(Debug, Default)]
pub struct Clients {
  clients: Mutex<BTreeMap<ClientId, Client>>,
}

impl Clients {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, BTreeMap<ClientId, Client>> {
    self.clients.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Register a page. Messages for it arrive on the returned receiver.
  pub fn connect(&self, url: Url) -> (ClientId, mpsc::UnboundedReceiver<ClientMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = ClientId::new();
    debug!(?id, %url, "client connected");
    self.lock().insert(
      id,
      Client {
        controlled: false,
        tx,
      },
    );
    (id, rx)
  }

  /// Take control of every open page. Returns how many were newly claimed.
  pub fn claim(&self) -> usize {
    let mut claimed = 0;
    for client in self.lock().values_mut() {
      if !client.controlled {
        client.controlled = true;
        claimed += 1;
      }
    }
    claimed
  }

  pub fn is_controlled(&self, id: ClientId) -> bool {
    self.lock().get(&id).map(|c| c.controlled).unwrap_or(false)
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  /// Send `message` to every open page. Pages whose receiver is gone are
  /// forgotten. Returns how many pages received it.
  pub fn broadcast(&self, message: &ClientMessage) -> usize {
    let mut clients = self.lock();
    clients.retain(|_, client| client.tx.send(message.clone()).is_ok());
    clients.len()
  }
}
