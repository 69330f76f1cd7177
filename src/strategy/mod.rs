//! Caching strategies and the table that picks one per request.
//!
//! - `CacheFirst` - serve from cache, go to the network only on a miss
//! - `NetworkFirst` - go to the network, fall back to cache, then offline
//! - `StaleWhileRevalidate` - serve from cache and refresh it in the background

pub mod executor;
pub mod selector;

use serde::Deserialize;
use std::fmt;

pub use executor::Executor;
pub use selector::StrategyTable;

/// How a request is resolved against cache and network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
  CacheFirst,
  NetworkFirst,
  StaleWhileRevalidate,
}

impl Strategy {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::CacheFirst => "cache-first",
      Self::NetworkFirst => "network-first",
      Self::StaleWhileRevalidate => "stale-while-revalidate",
    }
  }
}

impl fmt::Display for Strategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One row of the strategy table: a strategy and the URL substrings that select it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StrategyRule {
  pub strategy: Strategy,
  pub patterns: Vec<String>,
}

impl StrategyRule {
  pub fn new(strategy: Strategy, patterns: &[&str]) -> Self {
    Self {
      strategy,
      patterns: patterns.iter().map(|p| p.to_string()).collect(),
    }
  }
}
