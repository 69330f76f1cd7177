//! Synthesized responses for requests neither the cache nor the network can satisfy.
//!
//! Nothing produced here is ever stored: every response carries
//! `Cache-Control: no-store` so a later successful fetch is not masked.

use chrono::Utc;
use serde_json::json;
use url::Url;

use crate::cache::{CacheRegistry, CacheStorage};
use crate::http::{Destination, Request, Response, OFFLINE_MARKER_HEADER};

const OFFLINE_SVG: &str = r##"<svg width="200" height="200" xmlns="http://www.w3.org/2000/svg">
  <rect width="200" height="200" fill="#1f2937"/>
  <text x="100" y="100" text-anchor="middle" dominant-baseline="middle" fill="#6b7280" font-family="Arial" font-size="14">Offline</text>
</svg>"##;

/// Builds offline stand-ins based on what the request expects.
#[derive(Debug, Clone)]
pub struct OfflineFallback {
  api_prefix: String,
  offline_page: Url,
}

impl OfflineFallback {
  pub fn new(api_prefix: &str, offline_page: Url) -> Self {
    Self {
      api_prefix: api_prefix.to_string(),
      offline_page,
    }
  }

  /// Produce a response for a request that could not be served.
  ///
  /// Never fails: if the offline page lookup errors, documents degrade to
  /// the generic JSON error.
  pub fn respond<S: CacheStorage>(&self, request: &Request, registry: &CacheRegistry<S>) -> Response {
    match request.destination {
      Destination::Document => {
        let page_request = Request::get(self.offline_page.clone());
        match registry.lookup_across_partitions(&page_request) {
          Ok(Some(page)) => return Self::mark(page),
          Ok(None) => {}
          Err(e) => tracing::warn!(error = %e, "Offline page lookup failed"),
        }
        Self::error("Offline page not available")
      }
      Destination::Image => Self::image(),
      Destination::Other if request.url.path().starts_with(&self.api_prefix) => Self::api(),
      Destination::Other => Self::error("Resource not available offline"),
    }
  }

  /// Generic `{error: "offline", message, timestamp}` envelope.
  pub fn error(message: &str) -> Response {
    let body = json!({
      "error": "offline",
      "message": message,
      "timestamp": Utc::now().timestamp_millis(),
    });
    Self::synthetic(body.to_string(), "application/json")
  }

  /// API envelope with a stable shape: `{status: "offline", data: [], message, timestamp}`.
  pub fn api() -> Response {
    let body = json!({
      "status": "offline",
      "data": [],
      "message": "Data not available offline",
      "timestamp": Utc::now().timestamp_millis(),
    });
    Self::synthetic(body.to_string(), "application/json")
  }

  /// 200x200 placeholder so images never render as broken.
  pub fn image() -> Response {
    Self::synthetic(OFFLINE_SVG.to_string(), "image/svg+xml")
  }

  fn synthetic(body: String, content_type: &str) -> Response {
    Self::mark(Response::new(200, body).with_header("content-type", content_type))
  }

  /// Tag a response as an offline stand-in that must not be stored.
  fn mark(mut response: Response) -> Response {
    response.headers.retain(|(name, _)| {
      !name.eq_ignore_ascii_case("cache-control") && !name.eq_ignore_ascii_case(OFFLINE_MARKER_HEADER)
    });
    response
      .with_header("cache-control", "no-store")
      .with_header(OFFLINE_MARKER_HEADER, "1")
  }
}
