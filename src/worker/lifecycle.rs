//! Install, activate and the control messages that drive them.

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::{ControlMessage, Worker, WorkerError, CACHE_CLEANUP_TAG};
use crate::cache::Purpose;
use crate::net::{FetchError, Request};

/// Outcome of priming a partition. Failed URLs never fail the install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrimeReport {
  pub cached: Vec<String>,
  /// URL and reason.
  pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
  pub version: u32,
  /// Partitions from older versions that were removed.
  pub deleted: Vec<String>,
  /// Pages newly taken under control.
  pub claimed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub version: u32,
  pub primed: PrimeReport,
  /// Set when the new version activated right away.
  pub activation: Option<ActivationReport>,
}

/// What [`Worker::start`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
  /// Partitions for this version already existed.
  Resumed { version: u32 },
  Installed(InstallReport),
}

impl Worker {
  /// Bring the worker up: resume if this version's static partition is
  /// already on disk, otherwise install and activate.
  pub async fn start(&self) -> Result<StartOutcome, WorkerError> {
    let version = self.partitions.version();
    if self.storage.has(&self.partition(Purpose::Static))? {
      self.registration().restore_active(version);
      let claimed = self.clients.claim();
      info!(version, claimed, "resumed existing worker");
      return Ok(StartOutcome::Resumed { version });
    }
    Ok(StartOutcome::Installed(self.install_and_activate().await?))
  }

  /// Install the configured version, then activate it if nothing is holding
  /// it in the waiting state.
  pub async fn install_and_activate(&self) -> Result<InstallReport, WorkerError> {
    let primed = self.install().await?;
    let ready = self.registration().ready_to_activate();
    let activation = if ready { self.activate()? } else { None };

    Ok(InstallReport {
      version: self.partitions.version(),
      primed,
      activation,
    })
  }

  /// Open the static and app-shell partitions and prime the static one with
  /// the install manifest. Requests skip waiting on success.
  pub async fn install(&self) -> Result<PrimeReport, WorkerError> {
    let version = self.partitions.version();
    self.registration().begin_install(version);
    info!(version, "installing");

    let opened = [Purpose::Static, Purpose::AppShell]
      .into_iter()
      .try_for_each(|purpose| self.storage.open(&self.partition(purpose)));
    if let Err(e) = opened {
      self.registration().install_failed();
      return Err(e.into());
    }

    let precache = self.precache.clone();
    let primed = match self.prime(&self.partition(Purpose::Static), &precache).await {
      Ok(primed) => primed,
      Err(e) => {
        self.registration().install_failed();
        return Err(e);
      }
    };

    {
      let mut registration = self.registration();
      registration.install_complete();
      registration.skip_waiting();
    }
    info!(
      version,
      cached = primed.cached.len(),
      failed = primed.failed.len(),
      "install complete"
    );
    Ok(primed)
  }

  /// Promote the waiting version, delete partitions from older versions and
  /// claim open pages. `None` if nothing was waiting.
  pub fn activate(&self) -> Result<Option<ActivationReport>, WorkerError> {
    let Some(version) = self.registration().activate() else {
      debug!("activate requested with nothing waiting");
      return Ok(None);
    };

    let deleted = self.cleanup_stale()?;
    let claimed = self.clients.claim();
    info!(version, deleted = deleted.len(), claimed, "activated");

    Ok(Some(ActivationReport {
      version,
      deleted,
      claimed,
    }))
  }

  fn cleanup_stale(&self) -> Result<Vec<String>, WorkerError> {
    let deleted = self.storage.delete_stale(&self.partitions.version_token())?;
    for name in &deleted {
      info!(partition = %name, "deleted stale partition");
    }
    Ok(deleted)
  }

  /// Fetch each URL concurrently and store the 2xx answers in `partition`.
  /// Relative URLs resolve against the origin.
  pub async fn prime(&self, partition: &str, urls: &[String]) -> Result<PrimeReport, WorkerError> {
    self.storage.open(partition)?;

    let attempts = urls.iter().map(|raw| async move {
      let outcome = match self.origin.join(raw) {
        Ok(url) => self.prime_one(partition, Request::get(url)).await,
        Err(e) => Err(FetchError::InvalidUrl(format!("{}: {}", raw, e)).to_string()),
      };
      (raw.clone(), outcome)
    });

    let mut report = PrimeReport::default();
    for (url, outcome) in join_all(attempts).await {
      match outcome {
        Ok(()) => report.cached.push(url),
        Err(reason) => {
          warn!(url = %url, reason = %reason, "failed to cache asset");
          report.failed.push((url, reason));
        }
      }
    }
    Ok(report)
  }

  async fn prime_one(&self, partition: &str, request: Request) -> Result<(), String> {
    let response = self
      .layer
      .network_only(&request)
      .await
      .map_err(|e| e.to_string())?;
    if !response.ok() {
      return Err(format!("status {}", response.status));
    }
    self
      .storage
      .put(partition, &request.key(), &response)
      .map_err(|e| e.to_string())
  }

  /// Handle a control message posted by the host.
  pub async fn handle_message(&self, message: ControlMessage) -> Result<(), WorkerError> {
    debug!(?message, "control message");
    match message {
      ControlMessage::SkipWaiting => {
        let ready = {
          let mut registration = self.registration();
          registration.skip_waiting();
          registration.ready_to_activate()
        };
        if ready {
          self.activate()?;
        }
      }
      ControlMessage::ClearCache => {
        let cleared = self.storage.clear_all()?;
        info!(cleared, "cleared all partitions");
      }
      ControlMessage::CacheUrls { urls } => {
        self.prime(&self.partition(Purpose::Static), &urls).await?;
      }
    }
    Ok(())
  }

  /// Periodic sync. `cache-cleanup` repeats the activation cleanup; other
  /// tags are ignored.
  pub fn handle_periodic_sync(&self, tag: &str) -> Result<Vec<String>, WorkerError> {
    if tag != CACHE_CLEANUP_TAG {
      debug!(tag, "ignoring periodic sync");
      return Ok(Vec::new());
    }
    self.cleanup_stale()
  }
}
