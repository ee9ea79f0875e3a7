//! In-process [`RemoteCache`] for tests and single-process deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use keel_core::CacheError;

use super::traits::{CacheStats, RemoteCache};

/// A map behind the [`RemoteCache`] trait with injectable latency and
/// failure, so degraded-tier behaviour can be exercised.
#[derive(Default)]
pub struct InMemoryRemoteCache {
    items: Mutex<HashMap<String, Vec<u8>>>,
    latency_micros: AtomicU64,
    failing: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    set_calls: AtomicU64,
}

impl InMemoryRemoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.latency_micros.store(micros, Ordering::Relaxed);
    }

    /// Make every call fail with a transport error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.items().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `set_multi` calls that reached the map.
    pub fn set_calls(&self) -> u64 {
        self.set_calls.load(Ordering::Relaxed)
    }

    /// Overwrite a raw entry, bypassing encoding.
    pub fn insert_raw(&self, key: impl Into<String>, value: Vec<u8>) {
        self.items().insert(key.into(), value);
    }

    fn items(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self) -> Result<(), CacheError> {
        let micros = self.latency_micros.load(Ordering::Relaxed);
        if micros > 0 {
            tokio::time::sleep(Duration::from_micros(micros)).await;
        }
        if self.failing.load(Ordering::Relaxed) {
            return Err(CacheError::Transport {
                reason: "remote cache marked failing".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteCache for InMemoryRemoteCache {
    async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, CacheError> {
        self.enter().await?;
        let found: HashMap<String, Vec<u8>> = {
            let items = self.items();
            keys.iter()
                .filter_map(|k| items.get(k).map(|v| (k.clone(), v.clone())))
                .collect()
        };
        self.hits.fetch_add(found.len() as u64, Ordering::Relaxed);
        self.misses
            .fetch_add((keys.len() - found.len()) as u64, Ordering::Relaxed);
        Ok(found)
    }

    async fn set_multi(&self, items: Vec<(String, Vec<u8>)>) -> Result<(), CacheError> {
        self.enter().await?;
        self.set_calls.fetch_add(1, Ordering::Relaxed);
        self.items().extend(items);
        Ok(())
    }

    async fn delete_multi(&self, keys: &[String]) -> Result<(), CacheError> {
        self.enter().await?;
        let mut items = self.items();
        for key in keys {
            items.remove(key);
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), CacheError> {
        self.enter().await?;
        self.items().clear();
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let items = self.items();
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: items.len() as u64,
            memory_bytes: items.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_returns_only_present_keys() {
        let cache = InMemoryRemoteCache::new();
        cache
            .set_multi(vec![("a".to_string(), b"1".to_vec())])
            .await
            .unwrap();
        let found = cache
            .get_multi(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found.get("a"), Some(&b"1".to_vec()));

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_failing_cache_errors() {
        let cache = InMemoryRemoteCache::new();
        cache.set_failing(true);
        let err = cache.get_multi(&["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, CacheError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let cache = InMemoryRemoteCache::new();
        cache.delete_multi(&["missing".to_string()]).await.unwrap();
        cache.flush().await.unwrap();
        assert!(cache.is_empty());
    }
}
