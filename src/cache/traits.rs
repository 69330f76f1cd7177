//! Core traits and types for the caching system.

use color_eyre::Result;
use tokio::task::JoinHandle;

use crate::http::Response;

/// One response to be written into a partition.
#[derive(Debug, Clone)]
pub struct Entry {
  /// Request identity hash (see `Request::cache_key`)
  pub key: String,
  /// Absolute URL, kept for inspection
  pub url: String,
  pub response: Response,
}

/// Name and size of a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSummary {
  pub name: String,
  pub entries: usize,
}

/// Trait for cache storage backends.
///
/// Partitions are named key-value stores. Writes overwrite any existing
/// entry for the same key; entries are never patched in place.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create the partition if it does not exist yet.
  fn open_partition(&self, name: &str) -> Result<()>;

  /// Names of every existing partition, sorted.
  fn partition_names(&self) -> Result<Vec<String>>;

  /// Delete a partition and all of its entries. Returns whether it existed.
  fn delete_partition(&self, name: &str) -> Result<bool>;

  /// Get a stored response.
  fn get(&self, partition: &str, key: &str) -> Result<Option<Response>>;

  /// Store a single response.
  fn put(&self, partition: &str, entry: &Entry) -> Result<()>;

  /// Store several responses atomically: either all are written or none.
  fn put_all(&self, partition: &str, entries: &[Entry]) -> Result<()>;

  /// Number of entries in a partition.
  fn entry_count(&self, partition: &str) -> Result<usize>;
}

/// Result from a strategy, including the response and where it came from.
#[derive(Debug)]
pub struct Outcome {
  /// The response handed back to the page
  pub response: Response,
  /// Where the response came from
  pub source: ResponseSource,
  /// Background revalidation started alongside a cached response
  pub revalidation: Option<JoinHandle<()>>,
}

impl Outcome {
  /// Fresh data from the network.
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      revalidation: None,
    }
  }

  /// Data served from a partition.
  pub fn from_cache(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Cache,
      revalidation: None,
    }
  }

  /// Synthesized offline stand-in.
  pub fn offline(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Offline,
      revalidation: None,
    }
  }

  pub fn with_revalidation(mut self, handle: JoinHandle<()>) -> Self {
    self.revalidation = Some(handle);
    self
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Live network response
  Network,
  /// Served from a cache partition
  Cache,
  /// Network and cache both unavailable, synthesized fallback
  Offline,
}
