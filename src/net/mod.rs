//! Request/response model and the network seam.

pub mod client;
#[cfg(test)]
pub(crate) mod testing;

use futures::future::BoxFuture;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use url::Url;

pub use client::HttpFetcher;

/// Errors surfaced by a network fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
  #[error("network error: {0}")]
  Network(String),

  #[error("request timed out")]
  Timeout,

  #[error("invalid url: {0}")]
  InvalidUrl(String),

  #[error("failed to read body: {0}")]
  Body(String),
}

impl From<reqwest::Error> for FetchError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      FetchError::Timeout
    } else if e.is_body() || e.is_decode() {
      FetchError::Body(e.to_string())
    } else {
      FetchError::Network(e.to_string())
    }
  }
}

/// What kind of resource a request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
  #[default]
  Empty,
  Document,
  Image,
  Font,
  Script,
  Style,
}

/// How the request was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
  #[default]
  Cors,
  Navigate,
  NoCors,
  SameOrigin,
}

/// An outgoing request as seen by the interception router.
#[derive(Debug, Clone)]
pub struct Request {
  pub url: Url,
  pub method: Method,
  pub destination: Destination,
  pub mode: RequestMode,
  pub headers: BTreeMap<String, String>,
}

impl Request {
  /// Create a GET request.
  pub fn get(url: Url) -> Self {
    Self {
      url,
      method: Method::GET,
      destination: Destination::Empty,
      mode: RequestMode::Cors,
      headers: BTreeMap::new(),
    }
  }

  /// Create a full-page navigation request.
  pub fn navigate(url: Url) -> Self {
    Self {
      destination: Destination::Document,
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_string(), value.to_string());
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Cache key for this request.
  pub fn key(&self) -> RequestKey {
    RequestKey {
      method: self.method.as_str().to_string(),
      url: self.url.as_str().to_string(),
    }
  }
}

/// Identity of a cached entry: method plus absolute URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn get(url: &str) -> Self {
    Self {
      method: "GET".to_string(),
      url: url.to_string(),
    }
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// A fully buffered response snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

/// Fill used for the offline image placeholder.
const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="100"><rect fill="#1a1a1a" width="100" height="100"/></svg>"##;

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: BTreeMap::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_lowercase(), value.to_string());
    self
  }

  /// Whether the status is in the 2xx range.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_lowercase()).map(String::as_str)
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  /// Solid-fill SVG served in place of an image that cannot be loaded.
  pub fn placeholder_image() -> Self {
    Self::new(200, PLACEHOLDER_SVG).with_header("content-type", "image/svg+xml")
  }

  /// Synthesized 503 for non-image resources that cannot be loaded.
  pub fn offline() -> Self {
    Self::new(503, "Offline").with_header("content-type", "text/plain")
  }
}

/// Anything that can perform a network fetch.
///
/// The returned future must not borrow the fetcher so strategies can run it
/// on a background task.
pub trait Fetcher: Send + Sync {
  fn fetch(&self, request: &Request) -> BoxFuture<'static, Result<Response, FetchError>>;
}
