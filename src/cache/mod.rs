//! Named cache partitions for intercepted requests.
//!
//! This module provides the storage side of the offline layer:
//! - Partitions are named key-value stores of full responses
//! - Entries are overwritten wholesale and never expire on their own
//! - Partitions outside the current version are removed on activation

mod registry;
mod storage;
mod traits;

pub use registry::{CacheNames, CacheRegistry};
pub use storage::SqliteStorage;
pub use traits::{CacheStorage, Outcome, PartitionSummary, ResponseSource};
