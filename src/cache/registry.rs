//! Owns the named cache partitions: creation, lookup, writes and cleanup.

use color_eyre::{eyre::eyre, Result};
use futures::future::{join_all, try_join_all};
use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

use super::traits::{CacheStorage, Entry, PartitionSummary};
use crate::http::{Request, Response};
use crate::network::Fetcher;

/// Partition names derived from the product identifier and version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
  pub product: String,
  /// `<product>-v<version>`, only compared during cleanup, never opened
  pub version_tag: String,
  pub static_name: String,
  pub dynamic_name: String,
}

impl CacheNames {
  pub fn new(product: &str, version: &str) -> Self {
    Self {
      product: product.to_string(),
      version_tag: format!("{}-v{}", product, version),
      static_name: format!("{}-static-v1", product),
      dynamic_name: format!("{}-dynamic-v1", product),
    }
  }

  /// Every name the current version considers its own.
  pub fn owned(&self) -> [&str; 3] {
    [
      self.version_tag.as_str(),
      self.static_name.as_str(),
      self.dynamic_name.as_str(),
    ]
  }

  /// Whether a cache belongs to this product's namespace.
  pub fn in_namespace(&self, name: &str) -> bool {
    name
      .strip_prefix(self.product.as_str())
      .is_some_and(|rest| rest.starts_with('-'))
  }
}

/// Registry of cache partitions.
///
/// It is the only component that writes to storage; strategies go through it.
pub struct CacheRegistry<S: CacheStorage> {
  storage: Arc<S>,
  names: Arc<CacheNames>,
  origin: Url,
  /// Declared static assets, compared against request paths when storing
  static_assets: Arc<HashSet<String>>,
}

impl<S: CacheStorage> CacheRegistry<S> {
  pub fn new(storage: S, names: CacheNames, origin: Url, static_assets: &[String]) -> Self {
    Self {
      storage: Arc::new(storage),
      names: Arc::new(names),
      origin,
      static_assets: Arc::new(static_assets.iter().cloned().collect()),
    }
  }

  pub fn names(&self) -> &CacheNames {
    &self.names
  }

  /// Fetch every asset and store them in the static partition, all or nothing.
  ///
  /// A failed fetch or a non-OK status aborts before anything is written.
  pub async fn initialize_static_cache(&self, fetcher: &dyn Fetcher, assets: &[Url]) -> Result<()> {
    let fetches = assets.iter().map(|url| fetch_static_asset(fetcher, url));

    let entries = try_join_all(fetches).await?;

    self.storage.put_all(&self.names.static_name, &entries)?;
    tracing::info!(
      partition = %self.names.static_name,
      assets = entries.len(),
      "Static cache populated"
    );

    Ok(())
  }

  /// Best-effort preload of optional URLs into the dynamic partition.
  ///
  /// Returns how many were stored; failures are logged and skipped.
  pub async fn preload_supplemental_data(&self, fetcher: &dyn Fetcher, urls: &[Url]) -> usize {
    if let Err(e) = self.storage.open_partition(&self.names.dynamic_name) {
      tracing::warn!(error = %e, "Failed to open dynamic partition for preload");
      return 0;
    }

    let preloads = urls.iter().map(|url| async move {
      let request = Request::get(url.clone());
      match fetcher.fetch(&request).await {
        Ok(response) if response.is_ok() => {
          let entry = Entry {
            key: request.cache_key(),
            url: url.to_string(),
            response,
          };
          match self.storage.put(&self.names.dynamic_name, &entry) {
            Ok(()) => true,
            Err(e) => {
              tracing::warn!(%url, error = %e, "Failed to store preloaded response");
              false
            }
          }
        }
        Ok(response) => {
          tracing::warn!(%url, status = response.status, "Preload returned non-OK status");
          false
        }
        Err(e) => {
          tracing::warn!(%url, error = %e, "Failed to preload");
          false
        }
      }
    });

    let stored = join_all(preloads).await.into_iter().filter(|ok| *ok).count();
    tracing::debug!(stored, requested = urls.len(), "Supplemental preload finished");
    stored
  }

  /// Search the owned partitions for a stored response. Read-only.
  pub fn lookup_across_partitions(&self, request: &Request) -> Result<Option<Response>> {
    let key = request.cache_key();

    for partition in [&self.names.static_name, &self.names.dynamic_name] {
      if let Some(response) = self.storage.get(partition, &key)? {
        tracing::trace!(url = %request.url, %partition, "Cache hit");
        return Ok(Some(response));
      }
    }

    Ok(None)
  }

  /// Partition a request's response belongs in.
  pub fn partition_for(&self, url: &Url) -> &str {
    let cross_origin = url.host_str() != self.origin.host_str();

    if cross_origin || self.static_assets.contains(url.path()) {
      &self.names.static_name
    } else {
      &self.names.dynamic_name
    }
  }

  /// Store a response, overwriting any previous entry for the same request.
  pub fn store(&self, request: &Request, response: &Response) -> Result<()> {
    let partition = self.partition_for(&request.url);
    let entry = Entry {
      key: request.cache_key(),
      url: request.url.to_string(),
      response: response.clone(),
    };

    self.storage.put(partition, &entry)?;
    tracing::debug!(url = %request.url, %partition, "Stored response");

    Ok(())
  }

  /// Delete partitions left behind by previous versions.
  ///
  /// Only names inside the product namespace are candidates; the current
  /// owned names are kept. Returns the deleted names.
  pub fn cleanup_obsolete_partitions(&self) -> Result<Vec<String>> {
    let owned = self.names.owned();
    let mut deleted = Vec::new();

    for name in self.storage.partition_names()? {
      if !self.names.in_namespace(&name) || owned.contains(&name.as_str()) {
        continue;
      }

      tracing::info!(partition = %name, "Deleting obsolete cache partition");
      if self.storage.delete_partition(&name)? {
        deleted.push(name);
      }
    }

    Ok(deleted)
  }

  /// Every existing partition with its entry count.
  pub fn partition_summaries(&self) -> Result<Vec<PartitionSummary>> {
    self
      .storage
      .partition_names()?
      .into_iter()
      .map(|name| {
        let entries = self.storage.entry_count(&name)?;
        Ok(PartitionSummary { name, entries })
      })
      .collect()
  }

  /// Number of entries in a partition.
  #[cfg(test)]
  pub fn entry_count(&self, partition: &str) -> Result<usize> {
    self.storage.entry_count(partition)
  }

  #[cfg(test)]
  pub fn open_partition(&self, name: &str) -> Result<()> {
    self.storage.open_partition(name)
  }
}

impl<S: CacheStorage> Clone for CacheRegistry<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      names: Arc::clone(&self.names),
      origin: self.origin.clone(),
      static_assets: Arc::clone(&self.static_assets),
    }
  }
}

/// Fetch one install-time asset; a non-OK status counts as a failure.
async fn fetch_static_asset(fetcher: &dyn Fetcher, url: &Url) -> Result<Entry> {
  let request = Request::get(url.clone());
  let response = fetcher
    .fetch(&request)
    .await
    .map_err(|e| eyre!("Static asset {} failed: {}", url, e))?;

  if !response.is_ok() {
    return Err(eyre!(
      "Static asset {} returned status {}",
      url,
      response.status
    ));
  }

  Ok(Entry {
    key: request.cache_key(),
    url: url.to_string(),
    response,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::testing::ScriptedNetwork;

  fn origin() -> Url {
    Url::parse("http://localhost:8080/").unwrap()
  }

  fn registry(product: &str) -> CacheRegistry<SqliteStorage> {
    CacheRegistry::new(
      SqliteStorage::in_memory().unwrap(),
      CacheNames::new(product, "1.0.0"),
      origin(),
      &["/".to_string(), "/index.html".to_string()],
    )
  }

  fn url(path: &str) -> Url {
    origin().join(path).unwrap()
  }

  #[test]
  fn test_cache_names() {
    let names = CacheNames::new("ruantech", "2.0.1");
    assert_eq!(names.version_tag, "ruantech-v2.0.1");
    assert_eq!(names.static_name, "ruantech-static-v1");
    assert_eq!(names.dynamic_name, "ruantech-dynamic-v1");
    assert!(names.in_namespace("ruantech-v1.0.0"));
    assert!(!names.in_namespace("ruantechx-static-v1"));
    assert!(!names.in_namespace("other-ruantech-v1"));
  }

  #[test]
  fn test_cleanup_only_removes_obsolete_product_partitions() {
    let registry = CacheRegistry::new(
      SqliteStorage::in_memory().unwrap(),
      CacheNames::new("A", "1.0.0"),
      origin(),
      &[],
    );
    for name in ["A-static-v1", "A-dynamic-v1", "A-v0.9.0", "B-unrelated"] {
      registry.open_partition(name).unwrap();
    }

    let deleted = registry.cleanup_obsolete_partitions().unwrap();

    assert_eq!(deleted, vec!["A-v0.9.0"]);
    let remaining: Vec<String> = registry
      .partition_summaries()
      .unwrap()
      .into_iter()
      .map(|s| s.name)
      .collect();
    assert_eq!(remaining, vec!["A-dynamic-v1", "A-static-v1", "B-unrelated"]);
  }

  #[test]
  fn test_store_then_lookup_round_trip() {
    let registry = registry("p");
    let request = Request::get(url("/about"));
    let response = Response::new(200, vec![1u8, 2, 3, 255]).with_header("content-type", "application/octet-stream");

    registry.store(&request, &response).unwrap();

    let found = registry.lookup_across_partitions(&request).unwrap().unwrap();
    assert_eq!(found.body, response.body);
    assert_eq!(found.status, response.status);
    assert!(registry
      .lookup_across_partitions(&Request::get(url("/missing")))
      .unwrap()
      .is_none());
  }

  #[test]
  fn test_store_picks_partition() {
    let registry = registry("p");

    assert_eq!(registry.partition_for(&url("/index.html")), "p-static-v1");
    assert_eq!(registry.partition_for(&url("/")), "p-static-v1");
    assert_eq!(
      registry.partition_for(&Url::parse("https://cdn.tailwindcss.com/").unwrap()),
      "p-static-v1"
    );
    assert_eq!(registry.partition_for(&url("/api/x")), "p-dynamic-v1");
  }

  #[tokio::test]
  async fn test_static_init_is_idempotent() {
    let registry = registry("p");
    let network = ScriptedNetwork::new();
    network.reply(url("/").as_str(), 200, "home");
    network.reply(url("/index.html").as_str(), 200, "index");

    let assets = vec![url("/"), url("/index.html")];
    registry.initialize_static_cache(&network, &assets).await.unwrap();
    registry.initialize_static_cache(&network, &assets).await.unwrap();

    assert_eq!(registry.entry_count("p-static-v1").unwrap(), 2);
  }

  #[tokio::test]
  async fn test_static_init_is_all_or_nothing() {
    let registry = registry("p");
    let network = ScriptedNetwork::new();
    network.reply(url("/").as_str(), 200, "home");
    network.reply(url("/index.html").as_str(), 404, "nope");

    let result = registry
      .initialize_static_cache(&network, &[url("/"), url("/index.html")])
      .await;

    assert!(result.is_err());
    assert_eq!(registry.entry_count("p-static-v1").unwrap(), 0);

    network.fail(url("/index.html").as_str());
    assert!(registry
      .initialize_static_cache(&network, &[url("/"), url("/index.html")])
      .await
      .is_err());
    assert_eq!(registry.entry_count("p-static-v1").unwrap(), 0);
  }

  #[tokio::test]
  async fn test_preload_tolerates_failures() {
    let registry = registry("p");
    let network = ScriptedNetwork::new();
    network.reply(url("/api/services/summary").as_str(), 200, "[]");
    network.fail(url("/api/user/preferences").as_str());

    let stored = registry
      .preload_supplemental_data(
        &network,
        &[url("/api/services/summary"), url("/api/user/preferences")],
      )
      .await;

    assert_eq!(stored, 1);
    assert_eq!(registry.entry_count("p-dynamic-v1").unwrap(), 1);
  }
}
