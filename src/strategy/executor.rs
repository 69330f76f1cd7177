//! Strategy executors that orchestrate cache partitions and network fetching.

use chrono::Utc;
use color_eyre::Result;
use serde_json::json;
use std::sync::Arc;

use super::Strategy;
use crate::cache::{CacheRegistry, CacheStorage, Outcome};
use crate::clients::{kind, ClientHub};
use crate::fallback::OfflineFallback;
use crate::http::{Request, Response};
use crate::network::Fetcher;

/// Runs caching strategies against the registry and the network.
///
/// Only OK (2xx) network responses are stored. Other statuses are handed
/// back to the caller untouched and are not treated as failures; only a
/// fetch error triggers the cache or offline fallback.
pub struct Executor<S: CacheStorage> {
  registry: CacheRegistry<S>,
  fetcher: Arc<dyn Fetcher>,
  fallback: OfflineFallback,
  clients: ClientHub,
}

impl<S: CacheStorage> Executor<S> {
  pub fn new(
    registry: CacheRegistry<S>,
    fetcher: Arc<dyn Fetcher>,
    fallback: OfflineFallback,
    clients: ClientHub,
  ) -> Self {
    Self {
      registry,
      fetcher,
      fallback,
      clients,
    }
  }

  /// Execute the given strategy for a request.
  pub async fn run(&self, strategy: Strategy, request: &Request) -> Result<Outcome> {
    match strategy {
      Strategy::CacheFirst => self.cache_first(request).await,
      Strategy::NetworkFirst => self.network_first(request).await,
      Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
    }
  }

  /// Cache-first strategy.
  ///
  /// 1. Check cache - if present, return without touching the network
  /// 2. On a miss, fetch from network and store OK responses
  /// 3. On network failure, return the offline fallback
  pub async fn cache_first(&self, request: &Request) -> Result<Outcome> {
    if let Some(cached) = self.registry.lookup_across_partitions(request)? {
      return Ok(Outcome::from_cache(cached));
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        self.store_if_ok(request, &response);
        Ok(Outcome::from_network(response))
      }
      Err(e) => {
        tracing::debug!(url = %request.url, error = %e, "Network failed on cache miss");
        Ok(self.offline(request))
      }
    }
  }

  /// Network-first strategy.
  ///
  /// 1. Fetch from network, store OK responses and return
  /// 2. On network failure, return the cached entry (stale is fine)
  /// 3. With no cached entry either, return the offline fallback
  pub async fn network_first(&self, request: &Request) -> Result<Outcome> {
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        self.store_if_ok(request, &response);
        Ok(Outcome::from_network(response))
      }
      Err(e) => {
        tracing::debug!(url = %request.url, error = %e, "Network failed, trying cache");

        match self.registry.lookup_across_partitions(request)? {
          Some(cached) => Ok(Outcome::from_cache(cached)),
          None => Ok(self.offline(request)),
        }
      }
    }
  }

  /// Stale-while-revalidate strategy.
  ///
  /// Always starts a background revalidation. A cached entry is returned
  /// immediately; on a miss this degrades to network-first. The returned
  /// outcome carries the revalidation handle, which the request path never
  /// awaits.
  pub async fn stale_while_revalidate(&self, request: &Request) -> Result<Outcome> {
    let cached = self.registry.lookup_across_partitions(request)?;

    let background = self.clone();
    let background_request = request.clone();
    let handle = tokio::spawn(async move {
      background.revalidate(&background_request).await;
    });

    let outcome = match cached {
      Some(cached) => Outcome::from_cache(cached),
      None => self.network_first(request).await?,
    };

    Ok(outcome.with_revalidation(handle))
  }

  /// Refresh the cache entry for a request from the network.
  ///
  /// On an OK response the entry is overwritten and a `cache-updated`
  /// message is posted to every client. Returns whether the cache changed.
  pub async fn revalidate(&self, request: &Request) -> bool {
    let response = match self.fetcher.fetch(request).await {
      Ok(response) => response,
      Err(e) => {
        tracing::warn!(url = %request.url, error = %e, "Background revalidation failed");
        return false;
      }
    };

    if !response.is_ok() {
      tracing::debug!(url = %request.url, status = response.status, "Revalidation returned non-OK status");
      return false;
    }

    if let Err(e) = self.registry.store(request, &response) {
      tracing::warn!(url = %request.url, error = %e, "Failed to store revalidated response");
      return false;
    }

    self.clients.notify(
      kind::CACHE_UPDATED,
      json!({
        "url": request.url.as_str(),
        "timestamp": Utc::now().timestamp_millis(),
      }),
    );
    tracing::debug!(url = %request.url, "Cache revalidated");

    true
  }

  /// Offline fallback for a request.
  pub fn offline(&self, request: &Request) -> Outcome {
    Outcome::offline(self.fallback.respond(request, &self.registry))
  }

  fn store_if_ok(&self, request: &Request, response: &Response) {
    if !response.is_ok() {
      return;
    }
    if let Err(e) = self.registry.store(request, response) {
      tracing::warn!(url = %request.url, error = %e, "Failed to populate cache");
    }
  }
}

impl<S: CacheStorage> Clone for Executor<S> {
  fn clone(&self) -> Self {
    Self {
      registry: self.registry.clone(),
      fetcher: Arc::clone(&self.fetcher),
      fallback: self.fallback.clone(),
      clients: self.clients.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheNames, ResponseSource, SqliteStorage};
  use crate::http::Destination;
  use crate::testing::ScriptedNetwork;
  use url::Url;

  struct Harness {
    executor: Executor<SqliteStorage>,
    registry: CacheRegistry<SqliteStorage>,
    network: Arc<ScriptedNetwork>,
    clients: ClientHub,
  }

  fn harness() -> Harness {
    let origin = Url::parse("http://localhost:8080/").unwrap();
    let registry = CacheRegistry::new(
      SqliteStorage::in_memory().unwrap(),
      CacheNames::new("p", "1.0.0"),
      origin.clone(),
      &[],
    );
    let network = Arc::new(ScriptedNetwork::new());
    let clients = ClientHub::default();
    let executor = Executor::new(
      registry.clone(),
      network.clone(),
      OfflineFallback::new("/api/", origin.join("/offline.html").unwrap()),
      clients.clone(),
    );

    Harness {
      executor,
      registry,
      network,
      clients,
    }
  }

  fn request(path: &str) -> Request {
    Request::get(Url::parse("http://localhost:8080/").unwrap().join(path).unwrap())
  }

  fn cached_body(registry: &CacheRegistry<SqliteStorage>, request: &Request) -> Option<String> {
    registry
      .lookup_across_partitions(request)
      .unwrap()
      .map(|r| String::from_utf8(r.body.to_vec()).unwrap())
  }

  #[tokio::test]
  async fn test_cache_first_hit_skips_network() {
    let h = harness();
    let req = request("/assets/app.css");
    h.registry.store(&req, &Response::new(200, "cached")).unwrap();
    h.network.reply(req.url.as_str(), 200, "fresh");

    let outcome = h.executor.cache_first(&req).await.unwrap();

    assert_eq!(outcome.source, ResponseSource::Cache);
    assert_eq!(outcome.response.body, "cached");
    assert_eq!(h.network.calls(), 0);
  }

  #[tokio::test]
  async fn test_cache_first_miss_stores_ok_response() {
    let h = harness();
    let req = request("/assets/app.css");
    h.network.reply(req.url.as_str(), 200, "fresh");

    let outcome = h.executor.cache_first(&req).await.unwrap();

    assert_eq!(outcome.source, ResponseSource::Network);
    assert_eq!(cached_body(&h.registry, &req).as_deref(), Some("fresh"));
  }

  #[tokio::test]
  async fn test_non_ok_responses_are_returned_but_not_stored() {
    let h = harness();
    let req = request("/assets/missing.css");
    h.network.reply(req.url.as_str(), 404, "not found");

    let outcome = h.executor.cache_first(&req).await.unwrap();
    assert_eq!(outcome.response.status, 404);
    assert_eq!(outcome.source, ResponseSource::Network);

    let outcome = h.executor.network_first(&req).await.unwrap();
    assert_eq!(outcome.response.status, 404);
    assert_eq!(cached_body(&h.registry, &req), None);
  }

  #[tokio::test]
  async fn test_cache_first_network_failure_is_offline() {
    let h = harness();
    let req = request("/images/logo.png").with_destination(Destination::Image);
    h.network.fail(req.url.as_str());

    let outcome = h.executor.cache_first(&req).await.unwrap();

    assert_eq!(outcome.source, ResponseSource::Offline);
    assert_eq!(outcome.response.header("content-type"), Some("image/svg+xml"));
  }

  #[tokio::test]
  async fn test_network_first_success_updates_cache() {
    let h = harness();
    let req = request("/services/web");
    h.registry.store(&req, &Response::new(200, "old")).unwrap();
    h.network.reply(req.url.as_str(), 200, "new");

    let outcome = h.executor.network_first(&req).await.unwrap();

    assert_eq!(outcome.response.body, "new");
    assert_eq!(cached_body(&h.registry, &req).as_deref(), Some("new"));
  }

  #[tokio::test]
  async fn test_network_first_failure_serves_stale_cache() {
    let h = harness();
    let req = request("/services/web");
    h.registry.store(&req, &Response::new(200, "stale")).unwrap();
    h.network.fail(req.url.as_str());

    let outcome = h.executor.network_first(&req).await.unwrap();

    assert_eq!(outcome.source, ResponseSource::Cache);
    assert_eq!(outcome.response.body, "stale");
  }

  #[tokio::test]
  async fn test_network_first_failure_without_cache_is_offline() {
    let h = harness();
    let req = request("/api/services");
    h.network.fail(req.url.as_str());

    let outcome = h.executor.network_first(&req).await.unwrap();

    assert_eq!(outcome.source, ResponseSource::Offline);
    let body: serde_json::Value = serde_json::from_slice(&outcome.response.body).unwrap();
    assert_eq!(body["status"], "offline");
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_hit() {
    let h = harness();
    let mut messages = h.clients.subscribe();
    let req = request("/api/services/summary");
    h.registry.store(&req, &Response::new(200, "v1")).unwrap();
    h.network.reply(req.url.as_str(), 200, "v2");

    let outcome = h.executor.stale_while_revalidate(&req).await.unwrap();
    assert_eq!(outcome.source, ResponseSource::Cache);
    assert_eq!(outcome.response.body, "v1");

    outcome.revalidation.unwrap().await.unwrap();

    let next = h.executor.stale_while_revalidate(&req).await.unwrap();
    assert_eq!(next.response.body, "v2");
    next.revalidation.unwrap().await.unwrap();

    // One broadcast per completed revalidation
    let first = messages.try_recv().unwrap();
    assert_eq!(first.kind, "cache-updated");
    assert_eq!(first.data["url"], req.url.as_str());
    assert!(messages.try_recv().is_ok());
    assert!(messages.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_single_broadcast() {
    let h = harness();
    let mut messages = h.clients.subscribe();
    let req = request("/data/stats.json");
    h.registry.store(&req, &Response::new(200, "old")).unwrap();
    h.network.reply(req.url.as_str(), 200, "new");

    let outcome = h.executor.stale_while_revalidate(&req).await.unwrap();
    outcome.revalidation.unwrap().await.unwrap();

    assert_eq!(messages.try_recv().unwrap().kind, "cache-updated");
    assert!(messages.try_recv().is_err());
    assert_eq!(h.network.calls(), 1);
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_does_not_wait_for_network() {
    let h = harness();
    let req = request("/api/slow");
    h.registry.store(&req, &Response::new(200, "cached")).unwrap();
    h.network.hang(req.url.as_str());

    let outcome = tokio::time::timeout(
      std::time::Duration::from_secs(1),
      h.executor.stale_while_revalidate(&req),
    )
    .await
    .expect("cached response must not wait on revalidation")
    .unwrap();

    assert_eq!(outcome.response.body, "cached");
    let handle = outcome.revalidation.unwrap();
    assert!(!handle.is_finished());
    handle.abort();
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_miss_uses_network() {
    let h = harness();
    let mut messages = h.clients.subscribe();
    let req = request("/api/new");
    h.network.reply(req.url.as_str(), 200, "fresh");

    let outcome = h.executor.stale_while_revalidate(&req).await.unwrap();
    assert_eq!(outcome.source, ResponseSource::Network);
    assert_eq!(outcome.response.body, "fresh");
    outcome.revalidation.unwrap().await.unwrap();

    assert_eq!(h.network.calls(), 2);
    assert_eq!(messages.try_recv().unwrap().kind, "cache-updated");
  }

  #[tokio::test]
  async fn test_failed_revalidation_keeps_entry_and_is_silent() {
    let h = harness();
    let mut messages = h.clients.subscribe();
    let req = request("/api/services");
    h.registry.store(&req, &Response::new(200, "kept")).unwrap();
    h.network.fail(req.url.as_str());

    assert!(!h.executor.revalidate(&req).await);
    assert_eq!(cached_body(&h.registry, &req).as_deref(), Some("kept"));
    assert!(messages.try_recv().is_err());
  }
}
