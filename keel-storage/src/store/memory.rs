//! In-memory store with optimistic transactions.
//!
//! Entities live in a key-ordered map with a version per entity. The store
//! enforces the same per-call batch limits a hosted backend would, so
//! oversized batches fail here exactly as they would in production.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use keel_core::{Key, KeyId, PropertyList, Query, StoreError};

use super::{Datastore, GetResult, StoreOps, Transaction, TransactionOptions};

/// Entity groups a cross-group transaction may touch.
pub const MAX_CROSS_GROUP_ENTITY_GROUPS: usize = 25;

/// Call counters, for asserting which tier served a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub get_calls: u64,
    pub keys_read: u64,
    pub put_calls: u64,
    pub entities_written: u64,
    pub delete_calls: u64,
    pub query_calls: u64,
    pub commits: u64,
}

#[derive(Default)]
struct Counters {
    get_calls: AtomicU64,
    keys_read: AtomicU64,
    put_calls: AtomicU64,
    entities_written: AtomicU64,
    delete_calls: AtomicU64,
    query_calls: AtomicU64,
    commits: AtomicU64,
}

#[derive(Debug, Clone)]
struct Stored {
    props: PropertyList,
    version: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    entities: BTreeMap<Key, Stored>,
    next_id: i64,
    clock: u64,
}

impl StoreState {
    fn version_of(&self, key: &Key) -> u64 {
        self.entities.get(key).map_or(0, |s| s.version)
    }

    fn complete(&mut self, key: Key) -> Key {
        if key.is_incomplete() {
            self.next_id += 1;
            key.with_id(KeyId::Int(self.next_id))
        } else {
            key
        }
    }

    fn write(&mut self, key: Key, props: Option<PropertyList>) {
        match props {
            Some(props) => {
                self.clock += 1;
                let version = self.clock;
                self.entities.insert(key, Stored { props, version });
            }
            None => {
                self.entities.remove(&key);
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BatchLimits {
    get: usize,
    put: usize,
    delete: usize,
}

impl BatchLimits {
    fn check(limit: usize, operation: &'static str, got: usize) -> Result<(), StoreError> {
        if got > limit {
            return Err(StoreError::BatchTooLarge {
                operation,
                limit,
                got,
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct Shared {
    state: RwLock<StoreState>,
    unavailable: AtomicBool,
    latency_micros: AtomicU64,
    counters: Counters,
}

impl Shared {
    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>, StoreError> {
        self.state.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>, StoreError> {
        self.state.write().map_err(|_| StoreError::LockPoisoned)
    }

    async fn enter(&self) -> Result<(), StoreError> {
        let micros = self.latency_micros.load(Ordering::Relaxed);
        if micros > 0 {
            tokio::time::sleep(Duration::from_micros(micros)).await;
        }
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable {
                reason: "store marked unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn allocate(&self, incomplete: &Key, n: usize) -> Result<Vec<Key>, StoreError> {
        let mut state = self.write()?;
        Ok((0..n).map(|_| state.complete(incomplete.clone())).collect())
    }

    fn query(&self, query: &Query) -> Result<Vec<(Key, PropertyList)>, StoreError> {
        query.validate()?;
        self.counters.query_calls.fetch_add(1, Ordering::Relaxed);
        let state = self.read()?;
        let limit = query.limit_value().unwrap_or(usize::MAX);
        Ok(state
            .entities
            .iter()
            .filter(|(key, stored)| query.matches(key, &stored.props))
            .take(limit)
            .map(|(key, stored)| (key.clone(), query.shape(&stored.props)))
            .collect())
    }
}

/// Reference [`Datastore`] kept entirely in memory.
///
/// Clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    limits: BatchLimits,
    nested_transactions: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store with the hosted backend's limits (get 1000, put 500, delete 500).
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            limits: BatchLimits {
                get: 1000,
                put: 500,
                delete: 500,
            },
            nested_transactions: false,
        }
    }

    /// Override the per-call batch limits.
    pub fn with_limits(mut self, get: usize, put: usize, delete: usize) -> Self {
        self.limits = BatchLimits { get, put, delete };
        self
    }

    /// Allow transactions inside transactions (they are flattened).
    pub fn with_nested_transactions(mut self, enabled: bool) -> Self {
        self.nested_transactions = enabled;
        self
    }

    /// Make every call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.shared.latency_micros.store(micros, Ordering::Relaxed);
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.shared.read()?.entities.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    pub fn contains(&self, key: &Key) -> Result<bool, StoreError> {
        Ok(self.shared.read()?.entities.contains_key(key))
    }

    pub fn stats(&self) -> StoreStats {
        let c = &self.shared.counters;
        StoreStats {
            get_calls: c.get_calls.load(Ordering::Relaxed),
            keys_read: c.keys_read.load(Ordering::Relaxed),
            put_calls: c.put_calls.load(Ordering::Relaxed),
            entities_written: c.entities_written.load(Ordering::Relaxed),
            delete_calls: c.delete_calls.load(Ordering::Relaxed),
            query_calls: c.query_calls.load(Ordering::Relaxed),
            commits: c.commits.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl StoreOps for MemoryStore {
    async fn get_multi(&self, keys: &[Key]) -> Result<Vec<GetResult>, StoreError> {
        BatchLimits::check(self.limits.get, "get", keys.len())?;
        self.shared.enter().await?;
        let c = &self.shared.counters;
        c.get_calls.fetch_add(1, Ordering::Relaxed);
        c.keys_read.fetch_add(keys.len() as u64, Ordering::Relaxed);

        let state = self.shared.read()?;
        Ok(keys
            .iter()
            .map(|key| match state.entities.get(key) {
                Some(stored) => Ok(stored.props.clone()),
                None => Err(StoreError::NotFound { key: key.clone() }),
            })
            .collect())
    }

    async fn put_multi(&self, entries: Vec<(Key, PropertyList)>) -> Result<Vec<Key>, StoreError> {
        BatchLimits::check(self.limits.put, "put", entries.len())?;
        self.shared.enter().await?;
        let c = &self.shared.counters;
        c.put_calls.fetch_add(1, Ordering::Relaxed);
        c.entities_written
            .fetch_add(entries.len() as u64, Ordering::Relaxed);

        let mut state = self.shared.write()?;
        let mut keys = Vec::with_capacity(entries.len());
        for (key, props) in entries {
            let key = state.complete(key);
            state.write(key.clone(), Some(props));
            keys.push(key);
        }
        Ok(keys)
    }

    async fn delete_multi(&self, keys: &[Key]) -> Result<(), StoreError> {
        BatchLimits::check(self.limits.delete, "delete", keys.len())?;
        self.shared.enter().await?;
        self.shared
            .counters
            .delete_calls
            .fetch_add(1, Ordering::Relaxed);

        let mut state = self.shared.write()?;
        for key in keys {
            state.write(key.clone(), None);
        }
        Ok(())
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<(Key, PropertyList)>, StoreError> {
        self.shared.enter().await?;
        self.shared.query(query)
    }

    async fn allocate_ids(&self, incomplete: &Key, n: usize) -> Result<Vec<Key>, StoreError> {
        self.shared.enter().await?;
        self.shared.allocate(incomplete, n)
    }
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn begin(&self, options: &TransactionOptions) -> Result<Arc<dyn Transaction>, StoreError> {
        self.shared.enter().await?;
        Ok(Arc::new(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            limits: self.limits,
            options: options.clone(),
            log: Mutex::new(TxLog::default()),
            closed: AtomicBool::new(false),
        }))
    }

    fn supports_nested_transactions(&self) -> bool {
        self.nested_transactions
    }

    fn as_ops(&self) -> &dyn StoreOps {
        self
    }
}

// ============================================================================
// TRANSACTIONS
// ============================================================================

#[derive(Default)]
struct TxLog {
    /// Version of each entity when first read; 0 if it did not exist.
    reads: HashMap<Key, u64>,
    /// Buffered writes; `None` is a delete.
    writes: BTreeMap<Key, Option<PropertyList>>,
    groups: BTreeSet<Key>,
}

/// Optimistic transaction over a [`MemoryStore`].
struct MemoryTransaction {
    shared: Arc<Shared>,
    limits: BatchLimits,
    options: TransactionOptions,
    log: Mutex<TxLog>,
    closed: AtomicBool,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::TransactionClosed);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.options.read_only {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }

    fn log(&self) -> Result<std::sync::MutexGuard<'_, TxLog>, StoreError> {
        self.log.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn track_group(&self, log: &mut TxLog, key: &Key) -> Result<(), StoreError> {
        log.groups.insert(key.root().clone());
        let allowed = if self.options.cross_group {
            MAX_CROSS_GROUP_ENTITY_GROUPS
        } else {
            1
        };
        if log.groups.len() > allowed {
            return Err(StoreError::CrossGroup {
                groups: log.groups.len(),
                allowed,
            });
        }
        Ok(())
    }

    fn buffer_writes(&self, writes: Vec<(Key, Option<PropertyList>)>) -> Result<(), StoreError> {
        let mut log = self.log()?;
        for (key, _) in &writes {
            self.track_group(&mut log, key)?;
        }
        log.writes.extend(writes);
        Ok(())
    }
}

#[async_trait]
impl StoreOps for MemoryTransaction {
    async fn get_multi(&self, keys: &[Key]) -> Result<Vec<GetResult>, StoreError> {
        self.ensure_open()?;
        BatchLimits::check(self.limits.get, "get", keys.len())?;
        self.shared.enter().await?;
        let c = &self.shared.counters;
        c.get_calls.fetch_add(1, Ordering::Relaxed);
        c.keys_read.fetch_add(keys.len() as u64, Ordering::Relaxed);

        let mut guard = self.log()?;
        let log = &mut *guard;
        for key in keys {
            self.track_group(log, key)?;
        }
        let state = self.shared.read()?;
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            // Own buffered writes are visible to later reads.
            let result = match log.writes.get(key) {
                Some(Some(props)) => Ok(props.clone()),
                Some(None) => Err(StoreError::NotFound { key: key.clone() }),
                None => {
                    log.reads
                        .entry(key.clone())
                        .or_insert_with(|| state.version_of(key));
                    match state.entities.get(key) {
                        Some(stored) => Ok(stored.props.clone()),
                        None => Err(StoreError::NotFound { key: key.clone() }),
                    }
                }
            };
            results.push(result);
        }
        Ok(results)
    }

    async fn put_multi(&self, entries: Vec<(Key, PropertyList)>) -> Result<Vec<Key>, StoreError> {
        self.ensure_writable()?;
        BatchLimits::check(self.limits.put, "put", entries.len())?;
        self.shared.enter().await?;

        let mut writes = Vec::with_capacity(entries.len());
        let mut keys = Vec::with_capacity(entries.len());
        for (key, props) in entries {
            let key = if key.is_incomplete() {
                self.shared.write()?.complete(key)
            } else {
                key
            };
            keys.push(key.clone());
            writes.push((key, Some(props)));
        }
        self.buffer_writes(writes)?;
        Ok(keys)
    }

    async fn delete_multi(&self, keys: &[Key]) -> Result<(), StoreError> {
        self.ensure_writable()?;
        BatchLimits::check(self.limits.delete, "delete", keys.len())?;
        self.shared.enter().await?;
        self.buffer_writes(keys.iter().map(|k| (k.clone(), None)).collect())
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<(Key, PropertyList)>, StoreError> {
        self.ensure_open()?;
        self.shared.enter().await?;
        if let Some(ancestor) = query.ancestor_key() {
            let mut log = self.log()?;
            self.track_group(&mut log, ancestor)?;
        }
        self.shared.query(query)
    }

    async fn allocate_ids(&self, incomplete: &Key, n: usize) -> Result<Vec<Key>, StoreError> {
        self.ensure_open()?;
        self.shared.enter().await?;
        self.shared.allocate(incomplete, n)
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(StoreError::TransactionClosed);
        }
        self.shared.enter().await?;

        let log = std::mem::take(&mut *self.log()?);
        let mut state = self.shared.write()?;
        if let Some((key, _)) = log
            .reads
            .iter()
            .find(|(key, version)| state.version_of(key) != **version)
        {
            return Err(StoreError::Conflict { key: key.clone() });
        }
        for (key, props) in log.writes {
            state.write(key, props);
        }
        self.shared.counters.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(StoreError::TransactionClosed);
        }
        Ok(())
    }

    fn options(&self) -> &TransactionOptions {
        &self.options
    }

    fn as_ops(&self) -> &dyn StoreOps {
        self
    }
}

// =============================================================================
// TESTS
// =============================================================================
