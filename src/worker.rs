//! The request-interception layer and its lifecycle: install, activate, fetch.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::sync::Arc;
use url::Url;

use crate::cache::{CacheNames, CacheRegistry, CacheStorage, Outcome, PartitionSummary};
use crate::clients::ClientHub;
use crate::config::Config;
use crate::fallback::OfflineFallback;
use crate::http::{Request, Response};
use crate::network::Fetcher;
use crate::strategy::{Executor, StrategyTable};

/// Result of the install step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub static_assets: usize,
  pub preloaded: usize,
}

/// Offline caching layer sitting between pages and the network.
pub struct CacheWorker<S: CacheStorage> {
  registry: CacheRegistry<S>,
  selector: StrategyTable,
  executor: Executor<S>,
  fetcher: Arc<dyn Fetcher>,
  static_assets: Vec<Url>,
  preload_urls: Vec<Url>,
  excluded_patterns: Vec<String>,
}

impl<S: CacheStorage> CacheWorker<S> {
  pub fn new(config: &Config, storage: S, fetcher: Arc<dyn Fetcher>, clients: ClientHub) -> Result<Self> {
    let resolve_all = |items: &[String]| -> Result<Vec<Url>> {
      items.iter().map(|item| config.resolve(item)).collect()
    };

    let registry = CacheRegistry::new(
      storage,
      CacheNames::new(&config.product, &config.version),
      config.origin.clone(),
      &config.static_assets,
    );
    let fallback = OfflineFallback::new(&config.api_prefix, config.resolve(&config.offline_page)?);
    let executor = Executor::new(registry.clone(), fetcher.clone(), fallback, clients);

    Ok(Self {
      registry,
      selector: StrategyTable::new(config.strategies.clone()),
      executor,
      fetcher,
      static_assets: resolve_all(&config.static_assets)?,
      preload_urls: resolve_all(&config.preload_urls)?,
      excluded_patterns: config.excluded_patterns.clone(),
    })
  }

  pub fn registry(&self) -> &CacheRegistry<S> {
    &self.registry
  }

  /// Install: populate the static partition and preload optional data.
  ///
  /// Both run concurrently. Only a static population failure fails the
  /// install; the worker must not activate with a broken static set.
  pub async fn install(&self) -> Result<InstallReport> {
    tracing::info!("Installing");

    let (static_result, preloaded) = tokio::join!(
      self
        .registry
        .initialize_static_cache(self.fetcher.as_ref(), &self.static_assets),
      self
        .registry
        .preload_supplemental_data(self.fetcher.as_ref(), &self.preload_urls),
    );
    static_result.map_err(|e| eyre!("Install failed: {}", e))?;

    let report = InstallReport {
      static_assets: self.static_assets.len(),
      preloaded,
    };
    tracing::info!(?report, "Installation complete");
    Ok(report)
  }

  /// Activate: remove partitions of previous versions. Returns their names.
  pub fn activate(&self) -> Result<Vec<String>> {
    tracing::info!("Activating");
    let deleted = self.registry.cleanup_obsolete_partitions()?;
    tracing::info!(deleted = deleted.len(), "Activation complete");
    Ok(deleted)
  }

  /// Whether a request is handled by this layer at all.
  ///
  /// Non-GET requests and tooling URLs go straight to the network.
  pub fn intercepts(&self, request: &Request) -> bool {
    if request.method != Method::GET {
      return false;
    }

    let url = request.url.as_str();
    !self
      .excluded_patterns
      .iter()
      .any(|pattern| url.contains(pattern.as_str()))
  }

  /// Handle an intercepted fetch. `None` means the request is not intercepted.
  ///
  /// Any error while running the strategy becomes an offline fallback, so
  /// an intercepted request always gets a response.
  pub async fn handle_fetch(&self, request: &Request) -> Option<Outcome> {
    if !self.intercepts(request) {
      return None;
    }

    let strategy = self.selector.select(request.url.as_str());
    tracing::debug!(url = %request.url, %strategy, "Intercepted");

    let outcome = match self.executor.run(strategy, request).await {
      Ok(outcome) => outcome,
      Err(e) => {
        tracing::error!(url = %request.url, error = %e, "Request failed");
        self.executor.offline(request)
      }
    };

    Some(outcome)
  }

  /// Send a request the layer does not intercept straight to the network.
  pub async fn pass_through(&self, request: &Request) -> Result<Response> {
    self.fetcher.fetch(request).await
  }

  pub fn partition_summaries(&self) -> Result<Vec<PartitionSummary>> {
    self.registry.partition_summaries()
  }
}
