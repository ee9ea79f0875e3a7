//! Query execution with local-cache back-fill.
//!
//! Queries always go to the store; caches cannot answer them. Full-entity
//! results outside a transaction are copied into the local tier so later
//! lookups by key skip the store. Keys-only and projected results never are,
//! since they do not carry the whole entity.

use std::marker::PhantomData;
use std::sync::Arc;
use std::vec;

use keel_core::{Entity, KeelResult, Key, PropertyList, Query};
use tracing::debug;

use crate::cache::LocalCache;
use crate::keel::{keyed_default, load, Keel};

impl Keel {
    /// Run `query` and append decoded results to `dst`, returning their keys.
    ///
    /// Results are cached locally only when `dst` started empty. On a decode
    /// failure the error is returned and `dst` may already hold earlier
    /// results.
    pub async fn get_all<E: Entity>(&self, query: &Query, dst: &mut Vec<E>) -> KeelResult<Vec<Key>> {
        let cache = dst.is_empty() && self.caches_query(query);
        let results = self.fetch(query).await?;

        let mut keys = Vec::with_capacity(results.len());
        let mut fill = Vec::new();
        dst.reserve(results.len());
        for (key, props) in results {
            let value = if query.is_keys_only() {
                keyed_default::<E>(&key)
            } else {
                load::<E>(&key, &props)?
            };
            if cache {
                fill.push((key.encode(), value.clone()));
            }
            dst.push(value);
            keys.push(key);
        }
        if cache {
            debug!(entities = fill.len(), kind = query.kind(), "Caching query results");
            self.local.put_many(fill);
        }
        Ok(keys)
    }

    /// Keys of every result of `query`. Any projection is dropped.
    pub async fn get_all_keys(&self, query: &Query) -> KeelResult<Vec<Key>> {
        let results = self.fetch(&query.as_keys_only()).await?;
        Ok(results.into_iter().map(|(key, _)| key).collect())
    }

    /// Run `query` and decode results lazily.
    pub async fn run<E: Entity>(&self, query: &Query) -> KeelResult<QueryIter<E>> {
        let local = self
            .caches_query(query)
            .then(|| Arc::clone(&self.local));
        let results = self.fetch(query).await?;
        Ok(QueryIter {
            results: results.into_iter(),
            local,
            keys_only: query.is_keys_only(),
            _entity: PhantomData,
        })
    }

    /// Number of results of `query`.
    pub async fn count(&self, query: &Query) -> KeelResult<usize> {
        Ok(self.fetch(&query.as_keys_only()).await?.len())
    }

    fn caches_query(&self, query: &Query) -> bool {
        query.is_full() && !self.is_in_transaction() && self.config.local_cache_enabled
    }

    async fn fetch(&self, query: &Query) -> KeelResult<Vec<(Key, PropertyList)>> {
        query.validate()?;
        let results = self.store_call(self.ops().run_query(query)).await?;
        debug!(kind = query.kind(), results = results.len(), "Query executed");
        Ok(results)
    }
}

/// Lazily decoded query results.
///
/// Each full entity is copied into the local cache as it is yielded.
pub struct QueryIter<E> {
    results: vec::IntoIter<(Key, PropertyList)>,
    local: Option<Arc<LocalCache>>,
    keys_only: bool,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Iterator for QueryIter<E> {
    type Item = KeelResult<(Key, E)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, props) = self.results.next()?;
        if self.keys_only {
            let value = keyed_default::<E>(&key);
            return Some(Ok((key, value)));
        }
        Some(load::<E>(&key, &props).map(|value| {
            if let Some(local) = &self.local {
                local.put(key.encode(), &value);
            }
            (key, value)
        }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.results.size_hint()
    }
}

impl<E: Entity> ExactSizeIterator for QueryIter<E> {}

impl<E> std::fmt::Debug for QueryIter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryIter")
            .field("remaining", &self.results.len())
            .field("keys_only", &self.keys_only)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryRemoteCache;
    use crate::store::MemoryStore;
    use keel_core::{EntitySchema, IdField, KeelConfig, KeelError, KeyId, StoreError};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Item {
        #[serde(skip)]
        id: i64,
        data: String,
        rank: i64,
    }

    impl Entity for Item {
        fn schema() -> EntitySchema {
            EntitySchema::new("Item").with_id(IdField::int("id"))
        }
        fn id(&self) -> KeyId {
            KeyId::from_int(self.id)
        }
        fn set_id(&mut self, id: &KeyId) {
            if let KeyId::Int(n) = id {
                self.id = *n;
            }
        }
    }

    async fn seeded() -> (Keel, MemoryStore) {
        let store = MemoryStore::new();
        let keel = Keel::new(
            Arc::new(store.clone()),
            Arc::new(InMemoryRemoteCache::new()),
            KeelConfig::default(),
        )
        .unwrap();
        let mut items: Vec<Item> = ["one", "two", "three"]
            .iter()
            .enumerate()
            .map(|(i, data)| Item {
                id: i as i64 + 1,
                data: data.to_string(),
                rank: i as i64,
            })
            .collect();
        keel.put_multi(&mut items).await.unwrap();
        keel.flush_local_cache();
        (keel, store)
    }

    #[tokio::test]
    async fn test_get_all_caches_full_results() {
        let (keel, _store) = seeded().await;
        let mut dst: Vec<Item> = Vec::new();
        let keys = keel
            .get_all(&Query::new("Item").filter("data", "two"), &mut dst)
            .await
            .unwrap();
        assert_eq!(keys, vec![Key::with_int("Item", 2)]);
        assert_eq!(dst[0].id, 2);
        assert_eq!(dst[0].data, "two");
        assert!(keel.local_cache().contains(&keys[0].encode()));
    }

    #[tokio::test]
    async fn test_get_all_appends_without_caching() {
        let (keel, _store) = seeded().await;
        let mut dst = vec![Item::default()];
        keel.get_all(&Query::new("Item"), &mut dst).await.unwrap();
        assert_eq!(dst.len(), 4);
        assert!(keel.local_cache().is_empty());
    }

    #[tokio::test]
    async fn test_keys_only_results_not_cached() {
        let (keel, _store) = seeded().await;
        let mut dst = Vec::new();
        let keys = keel
            .get_all::<Item>(&Query::new("Item").keys_only(), &mut dst)
            .await
            .unwrap();
        assert_eq!(keys.len(), 3);
        assert_eq!(dst[2].id, 3);
        assert!(dst[2].data.is_empty());
        assert!(keel.local_cache().is_empty());
    }

    #[tokio::test]
    async fn test_projection_not_cached() {
        let (keel, _store) = seeded().await;
        let mut dst = Vec::new();
        keel.get_all::<Item>(&Query::new("Item").project(&["data"]), &mut dst)
            .await
            .unwrap();
        assert_eq!(dst[0].data, "one");
        assert_eq!(dst[2].rank, 0);
        assert!(keel.local_cache().is_empty());
    }

    #[tokio::test]
    async fn test_get_all_keys_and_count() {
        let (keel, _store) = seeded().await;
        let projected = Query::new("Item").project(&["data"]);
        assert_eq!(keel.get_all_keys(&projected).await.unwrap().len(), 3);
        assert_eq!(keel.count(&Query::new("Item").limit(2)).await.unwrap(), 2);
        assert_eq!(keel.count(&Query::new("Missing")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_backfills_as_it_goes() {
        let (keel, _store) = seeded().await;
        let mut iter = keel.run::<Item>(&Query::new("Item")).await.unwrap();
        assert_eq!(iter.len(), 3);
        let (key, item) = iter.next().unwrap().unwrap();
        assert_eq!(item.data, "one");
        assert!(keel.local_cache().contains(&key.encode()));
        assert!(!keel.local_cache().contains(&Key::with_int("Item", 2).encode()));
        assert_eq!(iter.count(), 2);
        assert_eq!(keel.local_cache().len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_query_rejected() {
        let (keel, store) = seeded().await;
        let err = keel.count(&Query::new("Item").limit(0)).await.unwrap_err();
        assert!(matches!(err, KeelError::Store(StoreError::InvalidQuery { .. })));
        assert_eq!(store.stats().query_calls, 0);
    }
}
