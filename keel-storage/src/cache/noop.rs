//! Remote cache that stores nothing.

use std::collections::HashMap;

use async_trait::async_trait;
use keel_core::CacheError;

use super::traits::RemoteCache;

/// Every read misses and every write is discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRemoteCache;

#[async_trait]
impl RemoteCache for NoopRemoteCache {
    async fn get_multi(&self, _keys: &[String]) -> Result<HashMap<String, Vec<u8>>, CacheError> {
        Ok(HashMap::new())
    }

    async fn set_multi(&self, _items: Vec<(String, Vec<u8>)>) -> Result<(), CacheError> {
        Ok(())
    }

    async fn delete_multi(&self, _keys: &[String]) -> Result<(), CacheError> {
        Ok(())
    }

    async fn flush(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
