//! Request and response values that flow between the proxy, the worker and storage.

use bytes::Bytes;
use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

/// Header set on every synthesized offline response.
pub const OFFLINE_MARKER_HEADER: &str = "x-offline-fallback";

/// What the requesting page expects to do with the response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Destination {
  /// Top-level navigation
  Document,
  /// `<img>` and friends
  Image,
  #[default]
  Other,
}

impl Destination {
  /// Derive the destination from `Sec-Fetch-Dest`, falling back to `Accept`.
  pub fn from_headers(sec_fetch_dest: Option<&str>, accept: Option<&str>) -> Self {
    match sec_fetch_dest {
      Some("document") | Some("iframe") => return Self::Document,
      Some("image") => return Self::Image,
      Some(dest) if !dest.is_empty() && dest != "empty" => return Self::Other,
      _ => {}
    }

    match accept {
      Some(a) if a.contains("text/html") => Self::Document,
      Some(a) if a.starts_with("image/") => Self::Image,
      _ => Self::Other,
    }
  }
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  /// End-to-end headers forwarded to the network
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
}

impl Request {
  /// A plain GET with no extra headers.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      destination: Destination::Other,
      headers: Vec::new(),
      body: Bytes::new(),
    }
  }

  #[cfg(test)]
  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  /// Human-readable identity: method and absolute URL.
  pub fn identity(&self) -> String {
    format!("{} {}", self.method, self.url)
  }

  /// Stable, fixed-length storage key derived from the identity.
  pub fn cache_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.identity().as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A response as returned to the page, read from or written to a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_ascii_lowercase(), value.to_string()));
    self
  }

  /// Status in the 2xx range.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First value of a header, compared case-insensitively.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Whether this is a synthesized offline stand-in rather than real content.
  pub fn is_offline_fallback(&self) -> bool {
    self.header(OFFLINE_MARKER_HEADER).is_some()
  }
}
