//! Process-local cache tier.
//!
//! Holds owned, typed copies of entities keyed by their canonical key
//! string. Entries are type-erased so one cache serves every entity type;
//! reading an entry back as a different type is a miss.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use keel_core::Entity;

use super::traits::CacheStats;

type Slot = Box<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct LocalCache {
    entries: Mutex<HashMap<String, Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("entries", &self.len())
            .finish()
    }
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    // Every operation is a single map call, so a panic elsewhere cannot leave
    // the map half-updated.
    fn entries(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the entry at `key`, if it holds an `E`.
    pub fn get<E: Entity>(&self, key: &str) -> Option<E> {
        let found = self
            .entries()
            .get(key)
            .and_then(|slot| slot.downcast_ref::<E>())
            .cloned();
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Positional lookup of several keys under one lock acquisition.
    pub fn get_many<E: Entity>(&self, keys: &[String]) -> Vec<Option<E>> {
        let found: Vec<Option<E>> = {
            let entries = self.entries();
            keys.iter()
                .map(|key| {
                    entries
                        .get(key)
                        .and_then(|slot| slot.downcast_ref::<E>())
                        .cloned()
                })
                .collect()
        };
        let hits = found.iter().filter(|v| v.is_some()).count() as u64;
        self.hits.fetch_add(hits, Ordering::Relaxed);
        self.misses
            .fetch_add(keys.len() as u64 - hits, Ordering::Relaxed);
        found
    }

    /// Store a copy of `value`, replacing any previous entry.
    pub fn put<E: Entity>(&self, key: String, value: &E) {
        self.entries().insert(key, Box::new(value.clone()));
    }

    pub fn put_many<E: Entity>(&self, items: Vec<(String, E)>) {
        let mut entries = self.entries();
        for (key, value) in items {
            entries.insert(key, Box::new(value));
        }
    }

    pub(crate) fn put_erased(&self, key: String, value: Slot) {
        self.entries().insert(key, value);
    }

    pub fn delete(&self, key: &str) {
        self.entries().remove(key);
    }

    pub fn delete_many(&self, keys: &[String]) {
        let mut entries = self.entries();
        for key in keys {
            entries.remove(key);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    /// Drop every entry. Calling it on an empty cache is a no-op.
    pub fn flush(&self) {
        self.entries().clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.len() as u64,
            memory_bytes: 0,
        }
    }
}
