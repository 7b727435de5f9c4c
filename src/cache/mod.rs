//! Partitioned response cache with pluggable strategies.
//!
//! This module provides the service-worker side of offline support:
//! - Named, versioned partitions of request -> response snapshots
//! - Stale partition eviction by version token
//! - Cache-first, network-first and stale-while-revalidate strategies

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{MemoryStorage, SqliteStorage};
pub use traits::{CacheResult, CacheSource, CacheStorage, CachedEntry, PartitionSet, Purpose};
