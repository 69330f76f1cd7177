//! Network access behind a trait so the worker can be driven by a scripted network in tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderName, HeaderValue};
use std::time::Duration;
use url::Url;

use crate::http::{Request, Response};

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
  "connection",
  "keep-alive",
  "proxy-authenticate",
  "proxy-authorization",
  "te",
  "trailer",
  "transfer-encoding",
  "upgrade",
  "host",
  "content-length",
];

pub fn is_hop_by_hop(name: &str) -> bool {
  HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Whether a client header is sent upstream.
///
/// `accept-encoding` is left to the HTTP client so that stored bodies are
/// always in an encoding it decoded, whichever client asked first.
fn is_forwarded_upstream(name: &str) -> bool {
  !is_hop_by_hop(name) && !name.eq_ignore_ascii_case("accept-encoding")
}

/// Something that can perform a network round trip.
///
/// An `Err` means the fetch itself failed (DNS, connection, timeout). Any
/// response that arrives, whatever its status, is `Ok`.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;

  /// POST a JSON document.
  async fn post_json(&self, url: &Url, body: &serde_json::Value) -> Result<Response>;
}

/// reqwest-backed fetcher.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client })
  }

  async fn into_response(response: reqwest::Response) -> Result<Response> {
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body: {}", e))?;

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    for (name, value) in &request.headers {
      if !is_forwarded_upstream(name) {
        continue;
      }
      let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
      ) else {
        continue;
      };
      builder = builder.header(name, value);
    }

    if !request.body.is_empty() {
      builder = builder.body(request.body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    tracing::debug!(url = %request.url, status = response.status().as_u16(), "Network response");
    Self::into_response(response).await
  }

  async fn post_json(&self, url: &Url, body: &serde_json::Value) -> Result<Response> {
    let response = self
      .client
      .post(url.clone())
      .json(body)
      .send()
      .await
      .map_err(|e| eyre!("Failed to POST {}: {}", url, e))?;

    Self::into_response(response).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_hop_by_hop_headers() {
    assert!(is_hop_by_hop("Transfer-Encoding"));
    assert!(is_hop_by_hop("host"));
    assert!(!is_hop_by_hop("content-type"));
    assert!(!is_hop_by_hop("cache-control"));
  }

  #[test]
  fn test_accept_encoding_is_not_forwarded() {
    assert!(!is_forwarded_upstream("Accept-Encoding"));
    assert!(!is_forwarded_upstream("connection"));
    assert!(is_forwarded_upstream("accept"));
    assert!(is_forwarded_upstream("authorization"));
  }

  /// Upstream that reports the encodings it was offered.
  async fn echo_accept_encoding_upstream() -> Url {
    use axum::http::HeaderMap;
    use axum::routing::get;

    let app = axum::Router::new().route(
      "/asset.js",
      get(|headers: HeaderMap| async move {
        headers
          .get("accept-encoding")
          .and_then(|v| v.to_str().ok())
          .unwrap_or("")
          .to_string()
      }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      axum::serve(listener, app).await.unwrap();
    });

    Url::parse(&format!("http://{}/asset.js", addr)).unwrap()
  }

  #[tokio::test]
  async fn test_client_accept_encoding_is_replaced_by_decodable_set() {
    let url = echo_accept_encoding_upstream().await;
    let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();

    let mut request = Request::get(url);
    request
      .headers
      .push(("accept-encoding".to_string(), "gzip, deflate, br".to_string()));

    let response = fetcher.fetch(&request).await.unwrap();
    let offered = String::from_utf8(response.body.to_vec()).unwrap();

    assert_eq!(response.status, 200);
    assert!(!offered.contains("br"), "offered: {}", offered);
    assert!(response.header("content-encoding").is_none());
  }
}
