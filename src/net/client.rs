use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::trace;

use super::{FetchError, Fetcher, Request, Response};
use crate::config::NetworkConfig;

/// Network client backed by reqwest.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(config: &NetworkConfig) -> Result<Self, FetchError> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .user_agent(concat!("synka-offline/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| FetchError::Network(format!("failed to build http client: {}", e)))?;

    Ok(Self { client })
  }
}

impl Fetcher for HttpFetcher {
  fn fetch(&self, request: &Request) -> BoxFuture<'static, Result<Response, FetchError>> {
    let client = self.client.clone();
    let request = request.clone();

    async move {
      let mut builder = client.request(request.method.clone(), request.url.clone());
      for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
      }

      let response = builder.send().await?;
      let status = response.status().as_u16();
      let headers: BTreeMap<String, String> = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
          value
            .to_str()
            .ok()
            .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
      let body = response.bytes().await?.to_vec();

      trace!(url = %request.url, status, bytes = body.len(), "fetched");
      Ok(Response {
        status,
        headers,
        body,
      })
    }
    .boxed()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  #[tokio::test]
  async fn test_fetch_buffers_body_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/data"))
      .respond_with(
        ResponseTemplate::new(200).set_body_raw(r#"{"v":1}"#, "application/json"),
      )
      .mount(&server)
      .await;

    let fetcher = HttpFetcher::new(&NetworkConfig::default()).unwrap();
    let url = Url::parse(&format!("{}/data", server.uri())).unwrap();
    let response = fetcher.fetch(&Request::get(url)).await.unwrap();

    assert!(response.ok());
    assert_eq!(response.text(), r#"{"v":1}"#);
    assert_eq!(response.header("content-type"), Some("application/json"));
  }

  #[tokio::test]
  async fn test_non_success_status_is_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(path("/missing"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&server)
      .await;

    let fetcher = HttpFetcher::new(&NetworkConfig::default()).unwrap();
    let url = Url::parse(&format!("{}/missing", server.uri())).unwrap();
    let response = fetcher.fetch(&Request::get(url)).await.unwrap();

    assert_eq!(response.status, 404);
    assert!(!response.ok());
  }

  #[tokio::test]
  async fn test_connection_refused_is_network_error() {
    let fetcher = HttpFetcher::new(&NetworkConfig::default()).unwrap();
    let url = Url::parse("http://127.0.0.1:9/unreachable").unwrap();
    let err = fetcher.fetch(&Request::get(url)).await.unwrap_err();
    assert!(matches!(err, FetchError::Network(_)));
  }
}
