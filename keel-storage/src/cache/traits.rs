//! Remote cache backend trait and cache statistics.

use std::collections::HashMap;

use async_trait::async_trait;
use keel_core::CacheError;

/// A shared, lossy key-value cache reachable over the network.
///
/// Implementations may drop entries at any time. Keys are opaque strings;
/// values are opaque bytes. Missing keys are simply absent from the map
/// returned by [`RemoteCache::get_multi`].
#[async_trait]
pub trait RemoteCache: Send + Sync {
    async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, CacheError>;

    async fn set_multi(&self, items: Vec<(String, Vec<u8>)>) -> Result<(), CacheError>;

    /// Remove entries. Absent keys are not an error.
    async fn delete_multi(&self, keys: &[String]) -> Result<(), CacheError>;

    async fn flush(&self) -> Result<(), CacheError>;

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(CacheStats::default())
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate memory usage in bytes.
    pub memory_bytes: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
