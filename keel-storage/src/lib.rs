//! KEEL Storage - Tiered Entity Access
//!
//! Coordinates three tiers for every entity operation: a per-handle local
//! cache, a shared remote byte cache and the authoritative store. The
//! [`Keel`] handle is the entry point; the store and remote cache are
//! pluggable through [`Datastore`] and [`RemoteCache`].

pub mod batch;
pub mod cache;
pub mod keel;
pub mod query;
pub mod store;
pub mod transaction;

pub use keel::Keel;
pub use query::QueryIter;

// Re-export cache types for backend implementors
pub use cache::{
    CacheOutcome, CacheStats, InMemoryRemoteCache, LocalCache, NoopRemoteCache, RemoteCache,
    RemoteCacheClient,
};

pub use store::{
    Datastore, GetResult, MemoryStore, StoreOps, StoreStats, Transaction, TransactionOptions,
};
