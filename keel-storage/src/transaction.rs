//! Transaction-scoped cache bypass.
//!
//! Inside a transaction every read goes to the store transaction, so a
//! stale cache can never feed a transactional decision. Writes are recorded
//! and reach the caches only after a successful commit: the local tier
//! receives the committed values and deletions, the remote tier is
//! invalidated for every touched key.

use std::any::Any;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use keel_core::{Entity, KeelError, KeelResult, Key, StoreError};
use tracing::{debug, warn};

use crate::cache::{LocalCache, RemoteCacheClient};
use crate::keel::Keel;
use crate::store::{Transaction, TransactionOptions};

enum PendingWrite {
    Put {
        key: Key,
        value: Box<dyn Any + Send + Sync>,
    },
    Delete {
        key: Key,
    },
}

impl PendingWrite {
    fn key(&self) -> &Key {
        match self {
            PendingWrite::Put { key, .. } | PendingWrite::Delete { key } => key,
        }
    }
}

/// The open store transaction plus cache updates awaiting its commit.
pub(crate) struct TxScope {
    txn: Arc<dyn Transaction>,
    pending: Mutex<Vec<PendingWrite>>,
}

impl TxScope {
    fn new(txn: Arc<dyn Transaction>) -> Self {
        Self {
            txn,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn transaction(&self) -> &dyn Transaction {
        self.txn.as_ref()
    }

    fn pending(&self) -> MutexGuard<'_, Vec<PendingWrite>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn record_puts<E: Entity>(&self, items: Vec<(Key, E)>) {
        self.pending().extend(items.into_iter().map(|(key, value)| PendingWrite::Put {
            key,
            value: Box::new(value),
        }));
    }

    pub(crate) fn record_deletes(&self, keys: &[Key]) {
        self.pending()
            .extend(keys.iter().cloned().map(|key| PendingWrite::Delete { key }));
    }

    /// Apply recorded writes to the caches, in the order they were made.
    async fn apply(&self, local: &LocalCache, remote: &RemoteCacheClient, local_enabled: bool) {
        let writes = std::mem::take(&mut *self.pending());
        if writes.is_empty() {
            return;
        }

        let touched: Vec<Key> = writes
            .iter()
            .map(PendingWrite::key)
            .cloned()
            .collect::<BTreeSet<Key>>()
            .into_iter()
            .collect();
        remote.delete_multi(&touched).await;

        if local_enabled {
            for write in writes {
                match write {
                    PendingWrite::Put { key, value } => local.put_erased(key.encode(), value),
                    PendingWrite::Delete { key } => local.delete(&key.encode()),
                }
            }
        }
        debug!(keys = touched.len(), "Applied committed transaction to caches");
    }
}

impl Keel {
    /// Run `body` inside a store transaction.
    ///
    /// `body` receives a transactional handle: its reads bypass both cache
    /// tiers and its writes touch the caches only after the commit succeeds.
    /// A commit conflict reruns `body` until `options.attempts` tries are
    /// used. An error from `body` rolls back and is returned as is.
    ///
    /// Calling this on a transactional handle flattens into the running
    /// transaction when the store supports nesting, and fails with
    /// [`KeelError::NestedTransaction`] otherwise.
    pub async fn run_in_transaction<T, F, Fut>(
        &self,
        options: TransactionOptions,
        mut body: F,
    ) -> KeelResult<T>
    where
        F: FnMut(Keel) -> Fut,
        Fut: Future<Output = KeelResult<T>>,
    {
        if self.is_in_transaction() {
            if self.store.supports_nested_transactions() {
                return body(self.clone()).await;
            }
            return Err(KeelError::NestedTransaction);
        }

        let attempts = options.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let txn = self.store_call(self.store.begin(&options)).await?;
            let scope = Arc::new(TxScope::new(Arc::clone(&txn)));
            let handle = Keel {
                txn: Some(Arc::clone(&scope)),
                ..self.clone()
            };

            let value = match body(handle).await {
                Ok(value) => value,
                Err(e) => {
                    if let Err(rollback) = txn.rollback().await {
                        warn!(error = %rollback, "Transaction rollback failed");
                    }
                    return Err(e);
                }
            };

            match self.store_call(txn.commit()).await {
                Ok(()) => {
                    scope
                        .apply(&self.local, &self.remote, self.config.local_cache_enabled)
                        .await;
                    return Ok(value);
                }
                Err(StoreError::Conflict { key }) if attempt < attempts => {
                    debug!(key = %key, attempt, attempts, "Transaction conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryRemoteCache;
    use crate::store::{MemoryStore, StoreOps};
    use keel_core::{EntitySchema, IdField, KeelConfig, KeyId, PropertyList, Value};
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        #[serde(skip)]
        id: i64,
        value: i64,
    }

    impl Entity for Counter {
        fn schema() -> EntitySchema {
            EntitySchema::new("Counter").with_id(IdField::int("id"))
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

    fn setup(store: MemoryStore) -> (Keel, MemoryStore, Arc<InMemoryRemoteCache>) {
        let remote = Arc::new(InMemoryRemoteCache::new());
        let config = KeelConfig::default()
            .with_remote_get_timeout(Duration::from_secs(1))
            .with_remote_put_timeouts(Duration::from_secs(1), Duration::from_secs(1));
        let keel = Keel::new(Arc::new(store.clone()), remote.clone(), config).unwrap();
        (keel, store, remote)
    }

    fn counter_props(value: i64) -> PropertyList {
        let mut props = PropertyList::new();
        props.push("value", Value::Int(value));
        props
    }

    #[tokio::test]
    async fn test_commit_updates_local_and_invalidates_remote() {
        let (keel, _store, remote) = setup(MemoryStore::new());
        let mut c = Counter { id: 1, value: 1 };
        let key = keel.put(&mut c).await.unwrap();
        let remote_key = keel.remote_cache().cache_key(&key);
        assert!(remote.contains(&remote_key));

        keel.run_in_transaction(TransactionOptions::default(), |tx| async move {
            assert!(tx.is_in_transaction());
            let mut c = Counter { id: 1, value: 0 };
            tx.get(&mut c).await?;
            c.value += 1;
            tx.put(&mut c).await?;
            Ok(())
        })
        .await
        .unwrap();

        assert!(!remote.contains(&remote_key));
        assert_eq!(
            keel.local_cache().get::<Counter>(&key.encode()),
            Some(Counter { id: 1, value: 2 })
        );
    }

    #[tokio::test]
    async fn test_body_error_leaves_caches_untouched() {
        let (keel, store, _remote) = setup(MemoryStore::new());
        let result: KeelResult<()> = keel
            .run_in_transaction(TransactionOptions::default(), |tx| async move {
                tx.put(&mut Counter { id: 7, value: 7 }).await?;
                Err(KeelError::NestedTransaction)
            })
            .await;
        assert!(result.is_err());
        assert!(keel.local_cache().is_empty());
        assert!(!store.contains(&Key::with_int("Counter", 7)).unwrap());
    }

    #[tokio::test]
    async fn test_conflict_retries_body() {
        let (keel, store, _remote) = setup(MemoryStore::new());
        keel.put(&mut Counter { id: 1, value: 0 }).await.unwrap();

        let runs = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&runs);
        let interferer = store.clone();
        keel.run_in_transaction(TransactionOptions::default(), move |tx| {
            let run = counter.fetch_add(1, Ordering::SeqCst);
            let interferer = interferer.clone();
            async move {
                let mut c = Counter { id: 1, value: 0 };
                tx.get(&mut c).await?;
                if run == 0 {
                    interferer
                        .put_multi(vec![(Key::with_int("Counter", 1), counter_props(100))])
                        .await?;
                }
                c.value += 1;
                tx.put(&mut c).await?;
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        let mut c = Counter { id: 1, value: 0 };
        keel.get(&mut c).await.unwrap();
        assert_eq!(c.value, 101);
    }

    #[tokio::test]
    async fn test_conflict_exhausts_attempts() {
        let (keel, store, _remote) = setup(MemoryStore::new());
        keel.put(&mut Counter { id: 1, value: 0 }).await.unwrap();

        let interferer = store.clone();
        let err = keel
            .run_in_transaction(TransactionOptions::default().with_attempts(2), move |tx| {
                let interferer = interferer.clone();
                async move {
                    let mut c = Counter { id: 1, value: 0 };
                    tx.get(&mut c).await?;
                    interferer
                        .put_multi(vec![(Key::with_int("Counter", 1), counter_props(5))])
                        .await?;
                    tx.put(&mut c).await?;
                    Ok(())
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, KeelError::Store(StoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_nested_transaction_rejected_without_support() {
        let (keel, _store, _remote) = setup(MemoryStore::new());
        let err = keel
            .run_in_transaction(TransactionOptions::default(), |tx| async move {
                tx.run_in_transaction(TransactionOptions::default(), |_inner| async move { Ok(()) })
                    .await
            })
            .await
            .unwrap_err();
        assert_eq!(err, KeelError::NestedTransaction);
    }

    #[tokio::test]
    async fn test_nested_transaction_flattened_with_support() {
        let (keel, store, _remote) = setup(MemoryStore::new().with_nested_transactions(true));
        keel.run_in_transaction(TransactionOptions::default(), |tx| async move {
            tx.run_in_transaction(TransactionOptions::default(), |inner| async move {
                assert!(inner.is_in_transaction());
                inner.put(&mut Counter { id: 3, value: 3 }).await?;
                Ok(())
            })
            .await
        })
        .await
        .unwrap();
        assert!(store.contains(&Key::with_int("Counter", 3)).unwrap());
        assert_eq!(store.stats().commits, 1);
    }

    #[tokio::test]
    async fn test_delete_in_transaction_applied_on_commit() {
        let (keel, _store, _remote) = setup(MemoryStore::new());
        let key = keel.put(&mut Counter { id: 4, value: 4 }).await.unwrap();
        assert!(keel.local_cache().contains(&key.encode()));

        let target = key.clone();
        keel.run_in_transaction(TransactionOptions::default(), move |tx| {
            let target = target.clone();
            async move {
                tx.delete(&target).await?;
                Ok(())
            }
        })
        .await
        .unwrap();
        assert!(!keel.local_cache().contains(&key.encode()));
    }
}
