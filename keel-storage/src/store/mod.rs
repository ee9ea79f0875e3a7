//! Persistent store traits.
//!
//! The store is the authoritative tier. It is consumed through these traits
//! only; [`MemoryStore`] is the in-process reference implementation used by
//! tests and embedders that need no durable backend.

pub mod memory;

pub use memory::{MemoryStore, StoreStats};

use std::sync::Arc;

use async_trait::async_trait;
use keel_core::{Key, PropertyList, Query, StoreError};
use serde::{Deserialize, Serialize};

/// Result of one index of a batched store get.
pub type GetResult = Result<PropertyList, StoreError>;

/// Options for a store transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOptions {
    /// Allow the transaction to span several entity groups.
    pub cross_group: bool,
    /// Total tries when the commit reports a conflict.
    pub attempts: u32,
    pub read_only: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            cross_group: false,
            attempts: 3,
            read_only: false,
        }
    }
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cross_group(mut self, enabled: bool) -> Self {
        self.cross_group = enabled;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// Operations available both on the store and inside a transaction.
///
/// A call failing as a whole (unavailable backend, oversized batch) returns
/// the outer `Err`; per-entity outcomes are reported positionally.
#[async_trait]
pub trait StoreOps: Send + Sync {
    /// Fetch entities; index `i` of the result answers `keys[i]`.
    async fn get_multi(&self, keys: &[Key]) -> Result<Vec<GetResult>, StoreError>;

    /// Write entities, allocating integer ids for incomplete keys.
    ///
    /// Returns the complete key of every entry, in input order.
    async fn put_multi(&self, entries: Vec<(Key, PropertyList)>) -> Result<Vec<Key>, StoreError>;

    /// Delete entities. Missing keys are not an error.
    async fn delete_multi(&self, keys: &[Key]) -> Result<(), StoreError>;

    /// Matching entities ordered by key, shaped per the query.
    async fn run_query(&self, query: &Query) -> Result<Vec<(Key, PropertyList)>, StoreError>;

    /// Reserve `n` integer ids under `incomplete`'s kind and parent.
    async fn allocate_ids(&self, incomplete: &Key, n: usize) -> Result<Vec<Key>, StoreError>;
}

/// The authoritative store.
#[async_trait]
pub trait Datastore: StoreOps {
    async fn begin(&self, options: &TransactionOptions) -> Result<Arc<dyn Transaction>, StoreError>;

    /// Whether a transaction may be started inside another one.
    fn supports_nested_transactions(&self) -> bool {
        false
    }

    fn as_ops(&self) -> &dyn StoreOps;
}

/// A store transaction. Writes become visible only on commit.
#[async_trait]
pub trait Transaction: StoreOps {
    /// Apply buffered writes, failing with [`StoreError::Conflict`] if an
    /// entity read by this transaction changed since.
    async fn commit(&self) -> Result<(), StoreError>;

    async fn rollback(&self) -> Result<(), StoreError>;

    fn options(&self) -> &TransactionOptions;

    fn as_ops(&self) -> &dyn StoreOps;
}
