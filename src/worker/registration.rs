//! Worker generations: installing -> waiting -> active -> redundant.

use std::time::Instant;

/// Lifecycle state of one worker generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Installing,
  /// Installed, waiting for the previous generation to let go.
  Installed,
  Activating,
  /// Active and intercepting fetches.
  Activated,
  /// Replaced or failed to install.
  Redundant,
}

/// One worker generation, identified by its cache version.
#[derive(Debug, Clone)]
pub struct WorkerVersion {
  pub version: u32,
  pub state: WorkerState,
  /// Activate as soon as installed instead of waiting.
  pub skip_waiting: bool,
  pub state_changed_at: Instant,
}

impl WorkerVersion {
  fn new(version: u32) -> Self {
    Self {
      version,
      state: WorkerState::Installing,
      skip_waiting: false,
      state_changed_at: Instant::now(),
    }
  }

  fn set_state(&mut self, state: WorkerState) {
    self.state = state;
    self.state_changed_at = Instant::now();
  }
}

/// The slots a registration holds.
#[derive(Debug, Default)]
pub struct Registration {
  pub installing: Option<WorkerVersion>,
  pub waiting: Option<WorkerVersion>,
  pub active: Option<WorkerVersion>,
}

impl Registration {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn active_version(&self) -> Option<u32> {
    self.active.as_ref().map(|w| w.version)
  }

  pub fn is_active(&self) -> bool {
    self
      .active
      .as_ref()
      .is_some_and(|w| w.state == WorkerState::Activated)
  }

  /// Start installing `version`, replacing any install in progress.
  pub fn begin_install(&mut self, version: u32) {
    self.installing = Some(WorkerVersion::new(version));
  }

  /// Ask the installing or waiting generation to skip the waiting phase.
  pub fn skip_waiting(&mut self) {
    if let Some(worker) = self.installing.as_mut().or(self.waiting.as_mut()) {
      worker.skip_waiting = true;
    }
  }

  /// Transition installing to waiting.
  pub fn install_complete(&mut self) {
    if let Some(mut worker) = self.installing.take() {
      worker.set_state(WorkerState::Installed);
      self.waiting = Some(worker);
    }
  }

  pub fn install_failed(&mut self) {
    if let Some(mut worker) = self.installing.take() {
      worker.set_state(WorkerState::Redundant);
    }
  }

  /// Whether the waiting generation may activate without a reload.
  pub fn ready_to_activate(&self) -> bool {
    match &self.waiting {
      Some(worker) => worker.skip_waiting || self.active.is_none(),
      None => false,
    }
  }

  /// Promote the waiting generation. The previous active one becomes
  /// redundant. Returns the newly active version.
  pub fn activate(&mut self) -> Option<u32> {
    let mut worker = self.waiting.take()?;
    worker.set_state(WorkerState::Activating);

    if let Some(mut old) = self.active.take() {
      old.set_state(WorkerState::Redundant);
    }

    worker.set_state(WorkerState::Activated);
    let version = worker.version;
    self.active = Some(worker);
    Some(version)
  }

  /// Mark `version` active without going through install, as after a
  /// restart with partitions already on disk.
  pub fn restore_active(&mut self, version: u32) {
    let mut worker = WorkerVersion::new(version);
    worker.set_state(WorkerState::Activated);
    self.active = Some(worker);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_first_install_activates_without_skip() {
    let mut registration = Registration::new();
    registration.begin_install(1);
    registration.install_complete();

    assert!(registration.installing.is_none());
    assert!(registration.ready_to_activate());
    assert_eq!(registration.activate(), Some(1));
    assert!(registration.is_active());
  }

  #[test]
  fn test_upgrade_waits_unless_skipping() {
    let mut registration = Registration::new();
    registration.restore_active(1);

    registration.begin_install(2);
    registration.install_complete();
    assert!(!registration.ready_to_activate());
    assert_eq!(registration.active_version(), Some(1));

    registration.skip_waiting();
    assert!(registration.ready_to_activate());
    assert_eq!(registration.activate(), Some(2));
    assert_eq!(registration.active_version(), Some(2));
    assert!(registration.waiting.is_none());
  }

  #[test]
  fn test_failed_install_leaves_active_alone() {
    let mut registration = Registration::new();
    registration.restore_active(1);
    registration.begin_install(2);
    registration.install_failed();

    assert!(registration.installing.is_none());
    assert!(registration.waiting.is_none());
    assert_eq!(registration.activate(), None);
    assert_eq!(registration.active_version(), Some(1));
  }
}
