use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Online/offline state shared by the host side.
///
/// Stands in for the browser's `online`/`offline` events: callers flip it
/// with [`Connectivity::set_online`] and observers wait on
/// [`Connectivity::subscribe`].
#[derive(Debug, Clone)]
pub struct Connectivity {
  tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Update the state. Subscribers are only woken on an actual change.
  pub fn set_online(&self, online: bool) {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        return false;
      }
      *current = online;
      true
    });
    if changed {
      info!(online, "connectivity changed");
    }
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

impl Default for Connectivity {
  fn default() -> Self {
    Self::new(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_subscribers_see_changes_only() {
    let connectivity = Connectivity::new(true);
    let mut rx = connectivity.subscribe();

    connectivity.set_online(true);
    assert!(!rx.has_changed().unwrap());

    connectivity.set_online(false);
    rx.changed().await.unwrap();
    assert!(!*rx.borrow_and_update());
    assert!(!connectivity.is_online());
  }

  #[test]
  fn test_clones_share_state() {
    let a = Connectivity::default();
    let b = a.clone();
    b.set_online(false);
    assert!(!a.is_online());
  }
}
