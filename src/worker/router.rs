//! Fetch interception: decides which strategy serves each request.

use reqwest::Method;

use crate::cache::Purpose;
use crate::config::{NetworkConfig, RouterConfig};
use crate::net::{Destination, Request};

/// Caching algorithm applied to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  CacheFirst,
  NetworkFirst,
  StaleWhileRevalidate,
}

/// Routing decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Not intercepted at all (non-GET or non-http).
  Passthrough,
  /// Intercepted but always sent to the network, never cached.
  Bypass,
  /// Served by `strategy` against the partition for `purpose`.
  Cached { strategy: Strategy, purpose: Purpose },
}

/// Classifies requests. First matching rule wins:
///
/// 1. backend auth endpoints bypass the cache
/// 2. other backend calls are network-first
/// 3. app-shell paths are stale-while-revalidate
/// 4. images and fonts are cache-first
/// 5. navigations, then everything else, are stale-while-revalidate
#[derive(Debug, Clone)]
pub struct Router {
  api_host: String,
  auth_path: String,
  shell_suffixes: Vec<String>,
  shell_dirs: Vec<String>,
}

impl Router {
  pub fn new(network: &NetworkConfig, router: &RouterConfig) -> Self {
    Self {
      api_host: network.api_host.clone(),
      auth_path: network.auth_path.clone(),
      shell_suffixes: router.app_shell_suffixes.clone(),
      shell_dirs: router.app_shell_dirs.clone(),
    }
  }

  pub fn classify(&self, request: &Request) -> Route {
    if request.method != Method::GET {
      return Route::Passthrough;
    }
    if !matches!(request.url.scheme(), "http" | "https") {
      return Route::Passthrough;
    }

    let host = request.url.host_str().unwrap_or_default();
    let path = request.url.path();
    let is_backend = !self.api_host.is_empty() && host.contains(&self.api_host);

    if is_backend && path.contains(&self.auth_path) {
      return Route::Bypass;
    }

    if is_backend {
      return Route::Cached {
        strategy: Strategy::NetworkFirst,
        purpose: Purpose::DynamicData,
      };
    }

    if self.is_app_shell(path) {
      return Route::Cached {
        strategy: Strategy::StaleWhileRevalidate,
        purpose: Purpose::AppShell,
      };
    }

    if matches!(request.destination, Destination::Image | Destination::Font) {
      return Route::Cached {
        strategy: Strategy::CacheFirst,
        purpose: Purpose::Static,
      };
    }

    // Navigations and the default case share a strategy and partition.
    Route::Cached {
      strategy: Strategy::StaleWhileRevalidate,
      purpose: Purpose::Runtime,
    }
  }

  fn is_app_shell(&self, path: &str) -> bool {
    self.shell_suffixes.iter().any(|s| path.ends_with(s.as_str()))
      || self.shell_dirs.iter().any(|d| path.contains(d.as_str()))
  }
}
