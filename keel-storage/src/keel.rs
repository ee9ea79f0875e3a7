//! The caller-facing handle and batch orchestration.
//!
//! A [`Keel`] handle serves reads from the fastest tier that has an entity
//! and keeps every tier coherent on writes:
//!
//! - get: local cache, then one batched remote lookup, then the store in
//!   concurrent chunks, back-filling the faster tiers on the way out.
//! - put: store first, then the remote tier, then the local tier, and only
//!   for chunks the store accepted.
//! - delete: store, then both caches unconditionally.
//!
//! Per-entity failures are reported positionally through [`MultiError`];
//! cache-tier failures are logged and never returned.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::join_all;
use keel_core::{
    from_properties, normalize_slots, to_properties, Entity, EntitySlot, KeelConfig, KeelError,
    KeelResult, Key, KeyError, KeyResolver, MultiError, PropertyList, StoreError,
};
use tracing::{debug, warn};

use crate::batch;
use crate::cache::{LocalCache, RemoteCache, RemoteCacheClient};
use crate::store::{Datastore, StoreOps};
use crate::transaction::TxScope;

/// Handle over the three tiers.
///
/// Cloning is cheap; clones share the local cache, the resolver registry and
/// the backends.
#[derive(Clone)]
pub struct Keel {
    pub(crate) store: Arc<dyn Datastore>,
    pub(crate) remote: RemoteCacheClient,
    pub(crate) local: Arc<LocalCache>,
    pub(crate) resolver: Arc<KeyResolver>,
    pub(crate) config: Arc<KeelConfig>,
    pub(crate) txn: Option<Arc<TxScope>>,
}

impl std::fmt::Debug for Keel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keel")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("in_transaction", &self.is_in_transaction())
            .finish()
    }
}

impl Keel {
    /// Create a handle after validating `config`.
    pub fn new(
        store: Arc<dyn Datastore>,
        remote: Arc<dyn RemoteCache>,
        config: KeelConfig,
    ) -> KeelResult<Self> {
        config.validate()?;
        Ok(Self::assemble(store, remote, config))
    }

    /// Create a handle with the default configuration.
    pub fn with_defaults(store: Arc<dyn Datastore>, remote: Arc<dyn RemoteCache>) -> Self {
        Self::assemble(store, remote, KeelConfig::default())
    }

    fn assemble(store: Arc<dyn Datastore>, remote: Arc<dyn RemoteCache>, config: KeelConfig) -> Self {
        let config = Arc::new(config);
        Self {
            store,
            remote: RemoteCacheClient::new(remote, Arc::clone(&config)),
            local: Arc::new(LocalCache::new()),
            resolver: Arc::new(KeyResolver::new()),
            config,
            txn: None,
        }
    }

    pub fn config(&self) -> &KeelConfig {
        &self.config
    }

    /// The local tier, for diagnostics.
    pub fn local_cache(&self) -> &LocalCache {
        &self.local
    }

    pub fn remote_cache(&self) -> &RemoteCacheClient {
        &self.remote
    }

    pub fn is_in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    /// Drop every local-cache entry of this handle and its clones.
    pub fn flush_local_cache(&self) {
        self.local.flush();
    }

    /// Best-effort key of `entity`; `None` if its type cannot produce one.
    pub fn key<E: Entity>(&self, entity: &E) -> Option<Key> {
        self.resolver.resolve(entity).ok()
    }

    pub fn key_error<E: Entity>(&self, entity: &E) -> KeelResult<Key> {
        self.resolver.resolve(entity)
    }

    pub fn kind<E: Entity>(&self, entity: &E) -> KeelResult<String> {
        self.resolver.kind_of(entity)
    }

    /// Store operations route through the active transaction, if any.
    pub(crate) fn ops(&self) -> &dyn StoreOps {
        match &self.txn {
            Some(scope) => scope.transaction().as_ops(),
            None => self.store.as_ops(),
        }
    }

    fn local_enabled(&self) -> bool {
        self.txn.is_none() && self.config.local_cache_enabled
    }

    fn remote_enabled(&self) -> bool {
        self.txn.is_none() && self.remote.is_enabled()
    }

    /// Bound a store call by the configured store timeout.
    pub(crate) async fn store_call<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.config.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable {
                reason: format!("store call exceeded {:?}", self.config.store_timeout),
            }),
        }
    }

    // ========================================================================
    // GET
    // ========================================================================

    /// Load one entity in place; its id must already be set.
    pub async fn get<E: Entity>(&self, entity: &mut E) -> KeelResult<()> {
        self.get_entities(vec![entity]).await.map_err(single_error)
    }

    /// Load a batch in place. Index `i` of a returned [`MultiError`] describes
    /// `entities[i]`; failing entities are left unmodified.
    pub async fn get_multi<E: Entity>(&self, entities: &mut [E]) -> KeelResult<()> {
        self.get_entities(entities.iter_mut().collect()).await
    }

    /// [`Keel::get_multi`] over boxed or borrowed entities.
    pub async fn get_multi_slots<S: EntitySlot>(&self, slots: &mut [S]) -> KeelResult<()> {
        self.get_entities(normalize_slots(slots)).await
    }

    async fn get_entities<E: Entity>(&self, mut entities: Vec<&mut E>) -> KeelResult<()> {
        let n = entities.len();
        if n == 0 {
            return Ok(());
        }
        let keys = entities
            .iter()
            .map(|e| self.resolver.resolve_for_lookup(&**e))
            .collect::<KeelResult<Vec<Key>>>()?;
        let encoded: Vec<String> = keys.iter().map(Key::encode).collect();
        let mut pending: Vec<usize> = (0..n).collect();

        if self.local_enabled() {
            pending.clear();
            for (i, hit) in self.local.get_many::<E>(&encoded).into_iter().enumerate() {
                match hit {
                    Some(value) => *entities[i] = value,
                    None => pending.push(i),
                }
            }
            debug!(hits = n - pending.len(), misses = pending.len(), "Local cache lookup");
        }

        if self.remote_enabled() && !pending.is_empty() {
            let lookup: Vec<Key> = pending.iter().map(|&i| keys[i].clone()).collect();
            let found = self.remote.get_multi(&lookup).await;
            let mut missed = Vec::with_capacity(pending.len());
            let mut fill = Vec::new();
            for (&i, hit) in pending.iter().zip(found) {
                let Some(props) = hit else {
                    missed.push(i);
                    continue;
                };
                match load::<E>(&keys[i], &props) {
                    Ok(value) => {
                        if self.local_enabled() {
                            fill.push((encoded[i].clone(), value.clone()));
                        }
                        *entities[i] = value;
                    }
                    Err(e) => {
                        debug!(key = %keys[i], error = %e, "Remote cache entry does not fit requested type");
                        missed.push(i);
                    }
                }
            }
            debug!(
                hits = pending.len() - missed.len(),
                misses = missed.len(),
                "Remote cache lookup"
            );
            self.local.put_many(fill);
            pending = missed;
        }

        if pending.is_empty() {
            return Ok(());
        }
        let mut errors = MultiError::new(n);

        let chunks = batch::chunked(
            pending.iter().map(|&i| (i, keys[i].clone())).collect(),
            self.config.get_batch_limit,
        );
        debug!(keys = pending.len(), chunks = chunks.len(), "Fetching from store");
        let results = join_all(chunks.iter().map(|chunk| {
            let chunk_keys: Vec<Key> = chunk.iter().map(|(_, key)| key.clone()).collect();
            async move { self.store_call(self.ops().get_multi(&chunk_keys)).await }
        }))
        .await;

        let mut remote_fill: Vec<(Key, PropertyList)> = Vec::new();
        let mut local_fill: Vec<(String, E)> = Vec::new();
        for (chunk, result) in chunks.into_iter().zip(results) {
            let found = match result.and_then(|found| check_len(found, chunk.len())) {
                Ok(found) => found,
                Err(e) => {
                    warn!(error = %e, keys = chunk.len(), "Store get chunk failed");
                    for (i, _) in chunk {
                        errors.set(i, KeelError::Store(e.clone()));
                    }
                    continue;
                }
            };
            for ((i, key), item) in chunk.into_iter().zip(found) {
                match item {
                    Ok(props) => match load::<E>(&key, &props) {
                        Ok(value) => {
                            if self.local_enabled() {
                                local_fill.push((encoded[i].clone(), value.clone()));
                            }
                            if self.remote_enabled() {
                                remote_fill.push((key, props));
                            }
                            *entities[i] = value;
                        }
                        Err(e) => errors.set(i, e),
                    },
                    Err(StoreError::NotFound { key }) => errors.set(i, KeelError::NotFound { key }),
                    Err(e) => errors.set(i, KeelError::Store(e)),
                }
            }
        }

        if !remote_fill.is_empty() {
            self.remote.set_multi(&remote_fill).await;
        }
        self.local.put_many(local_fill);
        errors.into_result()
    }

    // ========================================================================
    // PUT
    // ========================================================================

    /// Save one entity, writing an allocated id back into it.
    pub async fn put<E: Entity>(&self, entity: &mut E) -> KeelResult<Key> {
        let mut keys = self.put_entities(vec![entity]).await.map_err(single_error)?;
        keys.pop().ok_or_else(|| {
            KeelError::Store(StoreError::Unavailable {
                reason: "store returned no key".to_string(),
            })
        })
    }

    /// Save a batch. Entities with incomplete int ids receive allocated ids.
    pub async fn put_multi<E: Entity>(&self, entities: &mut [E]) -> KeelResult<Vec<Key>> {
        self.put_entities(entities.iter_mut().collect()).await
    }

    /// [`Keel::put_multi`] over boxed or borrowed entities.
    pub async fn put_multi_slots<S: EntitySlot>(&self, slots: &mut [S]) -> KeelResult<Vec<Key>> {
        self.put_entities(normalize_slots(slots)).await
    }

    async fn put_entities<E: Entity>(&self, entities: Vec<&mut E>) -> KeelResult<Vec<Key>> {
        let n = entities.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut keys = entities
            .iter()
            .map(|e| self.resolver.resolve_for_put(&**e))
            .collect::<KeelResult<Vec<Key>>>()?;
        let props = entities
            .iter()
            .zip(&keys)
            .map(|(e, key)| {
                to_properties(&**e).map_err(|source| KeelError::Encode {
                    key: key.clone(),
                    source,
                })
            })
            .collect::<KeelResult<Vec<PropertyList>>>()?;

        let ranges = batch::chunk_ranges(n, self.config.put_batch_limit);
        debug!(entities = n, chunks = ranges.len(), "Writing to store");
        let results = join_all(ranges.iter().map(|range| {
            let entries: Vec<(Key, PropertyList)> = range
                .clone()
                .map(|i| (keys[i].clone(), props[i].clone()))
                .collect();
            async move { self.store_call(self.ops().put_multi(entries)).await }
        }))
        .await;

        let mut entities = entities;
        let mut errors = MultiError::new(n);
        let mut written = Vec::with_capacity(n);
        for (range, result) in ranges.into_iter().zip(results) {
            match result.and_then(|assigned| check_len(assigned, range.len())) {
                Ok(assigned) => {
                    for (i, key) in range.zip(assigned) {
                        entities[i].set_key(&key);
                        keys[i] = key;
                        written.push(i);
                    }
                }
                Err(e) => {
                    warn!(error = %e, entities = range.len(), "Store put chunk failed");
                    for i in range {
                        errors.set(i, KeelError::Store(e.clone()));
                    }
                }
            }
        }

        let cached: Vec<(Key, E)> = written
            .iter()
            .map(|&i| (keys[i].clone(), entities[i].clone()))
            .collect();
        match &self.txn {
            Some(scope) => scope.record_puts(cached),
            None => {
                if self.remote_enabled() {
                    let remote_fill: Vec<(Key, PropertyList)> = written
                        .iter()
                        .map(|&i| (keys[i].clone(), props[i].clone()))
                        .collect();
                    self.remote.set_multi(&remote_fill).await;
                }
                if self.local_enabled() {
                    self.local.put_many(
                        cached
                            .into_iter()
                            .map(|(key, value)| (key.encode(), value))
                            .collect(),
                    );
                }
            }
        }

        errors.into_result()?;
        Ok(keys)
    }

    // ========================================================================
    // DELETE
    // ========================================================================

    pub async fn delete(&self, key: &Key) -> KeelResult<()> {
        self.delete_multi(std::slice::from_ref(key))
            .await
            .map_err(single_error)
    }

    /// Delete from the store, then from both caches. Missing keys are fine.
    pub async fn delete_multi(&self, keys: &[Key]) -> KeelResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        if let Some(incomplete) = keys.iter().find(|k| k.is_incomplete()) {
            return Err(KeyError::IncompleteKey {
                kind: incomplete.kind().to_string(),
            }
            .into());
        }

        let ranges = batch::chunk_ranges(keys.len(), self.config.delete_batch_limit);
        debug!(keys = keys.len(), chunks = ranges.len(), "Deleting from store");
        let results = join_all(ranges.iter().map(|range| {
            let chunk = &keys[range.clone()];
            async move { self.store_call(self.ops().delete_multi(chunk)).await }
        }))
        .await;

        let mut errors = MultiError::new(keys.len());
        for (range, result) in ranges.into_iter().zip(results) {
            if let Err(e) = result {
                warn!(error = %e, keys = range.len(), "Store delete chunk failed");
                for i in range {
                    errors.set(i, KeelError::Store(e.clone()));
                }
            }
        }

        match &self.txn {
            Some(scope) => scope.record_deletes(keys),
            None => {
                if self.remote_enabled() {
                    self.remote.delete_multi(keys).await;
                }
                if self.local_enabled() {
                    let encoded: Vec<String> = keys.iter().map(Key::encode).collect();
                    self.local.delete_many(&encoded);
                }
            }
        }

        errors.into_result()
    }
}

/// Decode an entity read under `key`.
pub(crate) fn load<E: Entity>(key: &Key, props: &PropertyList) -> KeelResult<E> {
    let mut value: E = from_properties(props).map_err(|source| KeelError::Decode {
        key: key.clone(),
        source,
    })?;
    value.set_key(key);
    Ok(value)
}

/// A keys-only result: the zero value carrying just its key.
pub(crate) fn keyed_default<E: Entity>(key: &Key) -> E {
    let mut value = E::default();
    value.set_key(key);
    value
}

fn check_len<T>(items: Vec<T>, expected: usize) -> Result<Vec<T>, StoreError> {
    if items.len() == expected {
        Ok(items)
    } else {
        Err(StoreError::Unavailable {
            reason: format!("store answered {} of {} items", items.len(), expected),
        })
    }
}

/// Unwrap the only entry of a one-element multi-error.
fn single_error(err: KeelError) -> KeelError {
    match err {
        KeelError::Multi(multi) if multi.len() == 1 => match multi.get(0) {
            Some(inner) => inner.clone(),
            None => KeelError::Multi(multi),
        },
        other => other,
    }
}

// =============================================================================
// TESTS
// =============================================================================
