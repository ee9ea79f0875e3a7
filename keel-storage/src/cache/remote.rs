//! Remote cache client.
//!
//! Wraps a [`RemoteCache`] backend with per-operation timeouts and
//! degrade-on-failure semantics: a slow or broken remote tier is logged and
//! treated as empty, never surfaced to callers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use keel_core::{CacheError, KeelConfig, Key, PropertyList};
use tracing::{debug, warn};

use super::traits::RemoteCache;

/// What happened to a remote-tier write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Applied,
    /// Nothing to do, or the tier is disabled.
    Skipped,
    /// The backend failed or timed out; the write was dropped.
    Degraded,
}

#[derive(Clone)]
pub struct RemoteCacheClient {
    backend: Arc<dyn RemoteCache>,
    config: Arc<KeelConfig>,
}

impl std::fmt::Debug for RemoteCacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCacheClient")
            .field("prefix", &self.config.remote_key_prefix)
            .field("enabled", &self.config.remote_cache_enabled)
            .finish()
    }
}

impl RemoteCacheClient {
    pub fn new(backend: Arc<dyn RemoteCache>, config: Arc<KeelConfig>) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &Arc<dyn RemoteCache> {
        &self.backend
    }

    pub fn is_enabled(&self) -> bool {
        self.config.remote_cache_enabled
    }

    /// The backend key an entity is cached under.
    pub fn cache_key(&self, key: &Key) -> String {
        format!("{}{}", self.config.remote_key_prefix, key.encode())
    }

    pub fn encode(props: &PropertyList) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(props).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<PropertyList, CacheError> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        after: Duration,
        call: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        match tokio::time::timeout(after, call).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout { operation, after }),
        }
    }

    /// Look up `keys`; index `i` is `Some` on a decodable hit for `keys[i]`.
    ///
    /// Failures and undecodable entries read as misses.
    pub async fn get_multi(&self, keys: &[Key]) -> Vec<Option<PropertyList>> {
        if !self.is_enabled() || keys.is_empty() {
            return vec![None; keys.len()];
        }

        let cache_keys: Vec<String> = keys.iter().map(|k| self.cache_key(k)).collect();
        let found = match self
            .bounded(
                "get",
                self.config.remote_get_timeout,
                self.backend.get_multi(&cache_keys),
            )
            .await
        {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, keys = keys.len(), "Remote cache get degraded");
                return vec![None; keys.len()];
            }
        };

        cache_keys
            .iter()
            .map(|cache_key| {
                let bytes = found.get(cache_key)?;
                match Self::decode(bytes) {
                    Ok(props) => Some(props),
                    Err(e) => {
                        debug!(key = %cache_key, error = %e, "Remote cache entry undecodable");
                        None
                    }
                }
            })
            .collect()
    }

    /// Write entries. Entries larger than the item limit are left out.
    pub async fn set_multi(&self, entries: &[(Key, PropertyList)]) -> CacheOutcome {
        if !self.is_enabled() {
            return CacheOutcome::Skipped;
        }

        let mut items = Vec::with_capacity(entries.len());
        let mut payload = 0usize;
        for (key, props) in entries {
            let bytes = match Self::encode(props) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping remote cache write");
                    continue;
                }
            };
            if bytes.len() > self.config.remote_max_item_bytes {
                debug!(key = %key, size = bytes.len(), "Entity too large for remote cache");
                continue;
            }
            payload += bytes.len();
            items.push((self.cache_key(key), bytes));
        }
        if items.is_empty() {
            return CacheOutcome::Skipped;
        }

        let count = items.len();
        let after = self.config.remote_put_timeout(payload);
        match self
            .bounded("set", after, self.backend.set_multi(items))
            .await
        {
            Ok(()) => CacheOutcome::Applied,
            Err(e) => {
                warn!(error = %e, items = count, payload, "Remote cache set degraded");
                CacheOutcome::Degraded
            }
        }
    }

    /// Remove entries for `keys`.
    pub async fn delete_multi(&self, keys: &[Key]) -> CacheOutcome {
        if !self.is_enabled() || keys.is_empty() {
            return CacheOutcome::Skipped;
        }

        let cache_keys: Vec<String> = keys.iter().map(|k| self.cache_key(k)).collect();
        let payload = cache_keys.iter().map(String::len).sum();
        let after = self.config.remote_put_timeout(payload);
        match self
            .bounded("delete", after, self.backend.delete_multi(&cache_keys))
            .await
        {
            Ok(()) => CacheOutcome::Applied,
            Err(e) => {
                warn!(error = %e, keys = keys.len(), "Remote cache delete degraded");
                CacheOutcome::Degraded
            }
        }
    }
}
