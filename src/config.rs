use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Upper bound for `offline.ttl_days`.
pub const MAX_TTL_DAYS: i64 = 3650;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub worker: WorkerConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub router: RouterConfig,
  #[serde(default)]
  pub offline: OfflineConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  /// Prefix shared by every partition name
  pub cache_prefix: String,
  /// Bumped on every release; partitions from other versions are evicted
  pub version: u32,
  /// Origin the install manifest is resolved against
  pub origin: String,
  /// Critical assets primed on install
  pub precache: Vec<String>,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      cache_prefix: "synka".to_string(),
      version: 2,
      origin: "http://localhost:8080".to_string(),
      precache: [
        "/",
        "/index.html",
        "/site.webmanifest",
        "/logos/synka-logo.png",
        "/og/default.png",
        "/apple-touch-icon.png",
        "/Fonts/Anta-Regular.ttf",
        "/images/ai/Card-phone.webp",
        "/images/ai/cofounder-primary.webp",
        "/assets/icon.png",
        "/assets/icons/icon-192.webp",
        "/assets/icons/icon-512.webp",
      ]
      .iter()
      .map(|s| s.to_string())
      .collect(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  /// Backend host, matched as a substring of the request host
  pub api_host: String,
  /// Path segment identifying auth endpoints on the backend host
  pub auth_path: String,
  pub timeout_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      api_host: "supabase.co".to_string(),
      auth_path: "/auth/".to_string(),
      timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
  /// Path suffixes served from the app-shell partition
  pub app_shell_suffixes: Vec<String>,
  /// Directory segments served from the app-shell partition
  pub app_shell_dirs: Vec<String>,
}

impl Default for RouterConfig {
  fn default() -> Self {
    Self {
      app_shell_suffixes: vec![".js".to_string(), ".css".to_string()],
      app_shell_dirs: ["/assets/", "/logos/", "/icons/", "/Fonts/"]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
  /// How long offline snapshots stay valid while online
  pub ttl_days: i64,
  /// Drop the oldest queued changes beyond this many (unbounded if unset)
  pub max_queue_entries: Option<usize>,
  /// Byte quota for host-local storage (unbounded if unset)
  pub quota_bytes: Option<usize>,
}

impl Default for OfflineConfig {
  fn default() -> Self {
    Self {
      ttl_days: 7,
      max_queue_entries: None,
      quota_bytes: None,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Database file (default: $XDG_DATA_HOME/synka/offline.db)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./synka.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/synka/config.yaml
  ///
  /// Falls back to defaults when no file exists. Environment overrides are
  /// applied last.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    Ok(config.with_env_overrides())
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("synka.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("synka").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.worker.version == 0 {
      return Err(eyre!("worker.version must be at least 1"));
    }
    if !(1..=MAX_TTL_DAYS).contains(&config.offline.ttl_days) {
      return Err(eyre!(
        "offline.ttl_days must be between 1 and {}, got {}",
        MAX_TTL_DAYS,
        config.offline.ttl_days
      ));
    }
    Ok(config)
  }

  /// Apply SYNKA_API_HOST and SYNKA_ORIGIN if set.
  fn with_env_overrides(mut self) -> Self {
    if let Ok(host) = std::env::var("SYNKA_API_HOST") {
      self.network.api_host = host;
    }
    if let Ok(origin) = std::env::var("SYNKA_ORIGIN") {
      self.worker.origin = origin;
    }
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_yaml_gives_defaults() {
    let config = Config::from_yaml("{}").unwrap();
    assert_eq!(config.worker.version, 2);
    assert_eq!(config.network.api_host, "supabase.co");
    assert_eq!(config.offline.ttl_days, 7);
    assert!(config.worker.precache.contains(&"/index.html".to_string()));
  }

  #[test]
  fn test_partial_sections_keep_other_defaults() {
    let yaml = r#"
worker:
  version: 5
  precache: ["/", "/index.html"]
network:
  api_host: api.example.com
offline:
  max_queue_entries: 100
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.worker.version, 5);
    assert_eq!(config.worker.cache_prefix, "synka");
    assert_eq!(config.worker.precache.len(), 2);
    assert_eq!(config.network.api_host, "api.example.com");
    assert_eq!(config.network.auth_path, "/auth/");
    assert_eq!(config.offline.max_queue_entries, Some(100));
  }

  #[test]
  fn test_zero_version_rejected() {
    assert!(Config::from_yaml("worker:\n  version: 0\n").is_err());
  }

  #[test]
  fn test_ttl_days_out_of_range_rejected() {
    assert!(Config::from_yaml("offline:\n  ttl_days: 0\n").is_err());
    assert!(Config::from_yaml("offline:\n  ttl_days: -3\n").is_err());
    assert!(Config::from_yaml("offline:\n  ttl_days: 9223372036854775807\n").is_err());
    assert_eq!(
      Config::from_yaml("offline:\n  ttl_days: 30\n")
        .unwrap()
        .offline
        .ttl_days,
      30
    );
  }
}
