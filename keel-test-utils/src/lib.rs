//! KEEL Test Utilities
//!
//! Shared test infrastructure for the KEEL workspace:
//! - Fixture entity types covering each key shape
//! - A harness wiring a handle to in-memory backends
//! - Proptest generators for keys and entities
//! - Custom assertions for positional multi-errors

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use keel_core::{
    Entity, EntitySchema, IdField, KeelConfig, KeelError, KeelResult, Key, KeyId, MultiError,
    Query, StoreError,
};
pub use keel_storage::{InMemoryRemoteCache, Keel, MemoryStore, TransactionOptions};

fn set_int(slot: &mut i64, id: &KeyId) {
    if let KeyId::Int(n) = id {
        *slot = *n;
    }
}

// ============================================================================
// FIXTURE ENTITIES
// ============================================================================

/// Int-keyed entity with an optional kind override and parent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HasId {
    #[serde(skip)]
    pub id: i64,
    pub name: String,
    #[serde(skip)]
    pub kind: String,
    #[serde(skip)]
    pub parent: Option<Key>,
}

impl HasId {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_parent(mut self, parent: Key) -> Self {
        self.parent = Some(parent);
        self
    }
}

impl Entity for HasId {
    fn schema() -> EntitySchema {
        EntitySchema::new("HasId").with_id(IdField::int("id"))
    }

    fn id(&self) -> KeyId {
        KeyId::from_int(self.id)
    }

    fn set_id(&mut self, id: &KeyId) {
        set_int(&mut self.id, id);
    }

    fn kind(&self) -> Option<&str> {
        Some(&self.kind)
    }

    fn parent(&self) -> Option<Key> {
        self.parent.clone()
    }

    fn set_key(&mut self, key: &Key) {
        self.set_id(key.id());
        self.kind = key.kind().to_string();
        self.parent = key.parent().cloned();
    }
}

/// String-keyed entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HasString {
    #[serde(skip)]
    pub id: String,
    pub data: String,
}

impl HasString {
    pub fn new(id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: data.into(),
        }
    }
}

impl Entity for HasString {
    fn schema() -> EntitySchema {
        EntitySchema::new("HasString").with_id(IdField::string("id"))
    }

    fn id(&self) -> KeyId {
        KeyId::from_name(self.id.as_str())
    }

    fn set_id(&mut self, id: &KeyId) {
        if let KeyId::Name(name) = id {
            self.id = name.clone();
        }
    }
}

/// Entity stored under a schema-level default kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HasDefaultKind {
    #[serde(skip)]
    pub id: i64,
    pub data: String,
}

impl Entity for HasDefaultKind {
    fn schema() -> EntitySchema {
        EntitySchema::new("HasDefaultKind")
            .with_id(IdField::int("id"))
            .with_default_kind("DefaultKind")
    }

    fn id(&self) -> KeyId {
        KeyId::from_int(self.id)
    }

    fn set_id(&mut self, id: &KeyId) {
        set_int(&mut self.id, id);
    }
}

/// Declares two id fields; key derivation must refuse it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TwoId {
    #[serde(skip)]
    pub id: i64,
    #[serde(skip)]
    pub name: String,
}

impl Entity for TwoId {
    fn schema() -> EntitySchema {
        EntitySchema::new("TwoId")
            .with_id(IdField::int("id"))
            .with_id(IdField::string("name"))
    }

    fn id(&self) -> KeyId {
        KeyId::from_int(self.id)
    }

    fn set_id(&mut self, id: &KeyId) {
        set_int(&mut self.id, id);
    }
}

/// Declares no id field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoId {
    pub data: String,
}

impl Entity for NoId {
    fn schema() -> EntitySchema {
        EntitySchema::new("NoId")
    }

    fn id(&self) -> KeyId {
        KeyId::Incomplete
    }

    fn set_id(&mut self, _id: &KeyId) {}
}

/// Query target: results are filtered on `data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryItem {
    #[serde(skip)]
    pub id: i64,
    pub data: String,
}

impl QueryItem {
    pub fn new(id: i64, data: impl Into<String>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }
}

impl Entity for QueryItem {
    fn schema() -> EntitySchema {
        EntitySchema::new("QueryItem").with_id(IdField::int("id"))
    }

    fn id(&self) -> KeyId {
        KeyId::from_int(self.id)
    }

    fn set_id(&mut self, id: &KeyId) {
        set_int(&mut self.id, id);
    }
}

/// Entity with a timestamp property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(skip)]
    pub id: i64,
    pub name: String,
    pub at: DateTime<Utc>,
}

impl Entity for Event {
    fn schema() -> EntitySchema {
        EntitySchema::new("Event").with_id(IdField::int("id"))
    }

    fn id(&self) -> KeyId {
        KeyId::from_int(self.id)
    }

    fn set_id(&mut self, id: &KeyId) {
        set_int(&mut self.id, id);
    }
}

// ============================================================================
// MIGRATION LAYOUTS
// ============================================================================

/// Kind shared by both migration layouts.
pub const MIGRATION_KIND: &str = "Migration";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationPerson {
    pub name: String,
    pub age: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationSub {
    pub data: String,
    pub noise: Vec<i64>,
    pub sub: MigrationLeaf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationLeaf {
    pub data: String,
}

/// The layout entities are first written with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationA {
    #[serde(skip)]
    pub id: i64,
    pub number: i64,
    pub word: String,
    pub car: String,
    pub sub: MigrationSub,
    pub son: MigrationPerson,
    pub daughter: MigrationPerson,
    pub parents: Vec<MigrationPerson>,
    pub tags: Option<String>,
}

impl Entity for MigrationA {
    fn schema() -> EntitySchema {
        EntitySchema::new("MigrationA")
            .with_id(IdField::int("id"))
            .with_default_kind(MIGRATION_KIND)
    }

    fn id(&self) -> KeyId {
        KeyId::from_int(self.id)
    }

    fn set_id(&mut self, id: &KeyId) {
        set_int(&mut self.id, id);
    }
}

/// The same data read back with renamed, flattened and widened fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationB {
    #[serde(skip)]
    pub id: i64,
    #[serde(rename = "number")]
    pub fancy_number: i64,
    #[serde(rename = "word")]
    pub slang: String,
    #[serde(rename = "car")]
    pub cars: Vec<String>,
    #[serde(rename = "sub.data")]
    pub animal: String,
    #[serde(rename = "sub.noise")]
    pub music: Vec<i64>,
    #[serde(rename = "sub.sub.data")]
    pub flower: String,
    #[serde(rename = "son")]
    pub sons: Vec<MigrationPerson>,
    #[serde(rename = "daughter.name")]
    pub daughter_name: String,
    #[serde(rename = "daughter.age")]
    pub daughter_age: i64,
    #[serde(rename = "parents")]
    pub old_folks: Vec<MigrationPerson>,
    /// Widened from an absent optional scalar.
    pub tags: Vec<String>,
}

impl Entity for MigrationB {
    fn schema() -> EntitySchema {
        EntitySchema::new("MigrationB")
            .with_id(IdField::int("id"))
            .with_default_kind(MIGRATION_KIND)
    }

    fn id(&self) -> KeyId {
        KeyId::from_int(self.id)
    }

    fn set_id(&mut self, id: &KeyId) {
        set_int(&mut self.id, id);
    }
}

// ============================================================================
// HARNESS
// ============================================================================

/// Remote timeouts loose enough for a loaded test machine.
pub fn relaxed_config() -> KeelConfig {
    KeelConfig::default()
        .with_remote_get_timeout(Duration::from_secs(1))
        .with_remote_put_timeouts(Duration::from_secs(1), Duration::from_secs(1))
}

/// A handle wired to in-memory backends, with the backends kept for
/// inspection.
#[derive(Clone)]
pub struct TestHarness {
    pub keel: Keel,
    pub store: MemoryStore,
    pub remote: Arc<InMemoryRemoteCache>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::build(MemoryStore::new(), relaxed_config())
    }

    pub fn with_store(store: MemoryStore) -> Self {
        Self::build(store, relaxed_config())
    }

    pub fn with_config(config: KeelConfig) -> Self {
        Self::build(MemoryStore::new(), config)
    }

    /// Panics if `config` does not validate.
    pub fn build(store: MemoryStore, config: KeelConfig) -> Self {
        let remote = Arc::new(InMemoryRemoteCache::new());
        let keel = Keel::new(Arc::new(store.clone()), remote.clone(), config)
            .expect("test harness config must validate");
        Self {
            keel,
            store,
            remote,
        }
    }

    /// A second handle over the same backends with its own local cache.
    pub fn sibling(&self) -> Keel {
        Keel::new(
            Arc::new(self.store.clone()),
            self.remote.clone(),
            self.keel.config().clone(),
        )
        .expect("config already validated")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a fmt subscriber filtered by `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for keys and fixture entities.

    use super::*;
    use proptest::prelude::*;

    /// Kinds drawn from a small alphabet, including separator characters.
    pub fn arb_kind() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9:/%_]{0,11}"
    }

    pub fn arb_key_id() -> impl Strategy<Value = KeyId> {
        prop_oneof![
            (1i64..i64::MAX).prop_map(KeyId::Int),
            "[a-z0-9:/% ]{1,16}".prop_map(KeyId::Name),
        ]
    }

    /// Complete keys up to three levels deep.
    pub fn arb_key() -> impl Strategy<Value = Key> {
        let leaf = (arb_kind(), arb_key_id()).prop_map(|(kind, id)| Key::new(kind, id));
        leaf.prop_recursive(2, 3, 1, |inner| {
            (inner, arb_kind(), arb_key_id())
                .prop_map(|(parent, kind, id)| Key::new(kind, id).with_parent(parent))
        })
    }

    pub fn arb_has_id() -> impl Strategy<Value = HasId> {
        (1i64..1_000_000, "[a-z ]{0,24}").prop_map(|(id, name)| HasId::new(id, name))
    }

    /// Entities with distinct ids `1..=len`.
    pub fn arb_batch(max_len: usize) -> impl Strategy<Value = Vec<HasId>> {
        prop::collection::vec("[a-z]{0,12}", 0..=max_len).prop_map(|names| {
            names
                .into_iter()
                .enumerate()
                .map(|(i, name)| HasId::new(i as i64 + 1, name))
                .collect()
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built batches for common scenarios.

    use super::*;

    /// `HasId` entities with ids `1..=n`, named after their id.
    pub fn has_id_batch(n: usize) -> Vec<HasId> {
        (1..=n as i64).map(|i| HasId::new(i, format!("n{i}"))).collect()
    }

    /// Zero-valued `HasId` shells with ids `1..=n`, ready for a get.
    pub fn has_id_shells(n: usize) -> Vec<HasId> {
        (1..=n as i64).map(|i| HasId::new(i, "")).collect()
    }

    pub fn query_items() -> Vec<QueryItem> {
        vec![
            QueryItem::new(1, "one"),
            QueryItem::new(2, "two"),
            QueryItem::new(3, "three"),
        ]
    }

    pub fn migration_a(id: i64) -> MigrationA {
        MigrationA {
            id,
            number: 123,
            word: "rabbit".to_string(),
            car: "BMW".to_string(),
            sub: MigrationSub {
                data: "fox".to_string(),
                noise: vec![1, 2, 3],
                sub: MigrationLeaf {
                    data: "rose".to_string(),
                },
            },
            son: MigrationPerson {
                name: "John".to_string(),
                age: 5,
            },
            daughter: MigrationPerson {
                name: "Maria".to_string(),
                age: 6,
            },
            parents: vec![
                MigrationPerson {
                    name: "Sven".to_string(),
                    age: 56,
                },
                MigrationPerson {
                    name: "Sonya".to_string(),
                    age: 49,
                },
            ],
            tags: None,
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over positional multi-errors.

    use super::*;

    /// Assert `result` failed with a multi-error of `len` entries where
    /// exactly `missing` are not-found and every other index succeeded.
    #[track_caller]
    pub fn assert_missing_exactly<T: std::fmt::Debug>(
        result: &KeelResult<T>,
        len: usize,
        missing: &[usize],
    ) {
        let multi = match result {
            Err(KeelError::Multi(multi)) => multi,
            other => panic!("Expected multi-error, got: {:?}", other),
        };
        assert_eq!(multi.len(), len, "multi-error length");
        assert_eq!(multi.failed_indices(), missing, "failed indices");
        for &i in missing {
            assert!(multi.is_not_found(i), "index {i} should be not-found: {:?}", multi.get(i));
        }
    }

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &KeelResult<T>) {
        match result {
            Err(e) if e.is_not_found() => {}
            other => panic!("Expected NotFound, got: {:?}", other),
        }
    }

    /// Assert every entity equals its counterpart, naming the first mismatch.
    #[track_caller]
    pub fn assert_same_entities<E: PartialEq + std::fmt::Debug>(got: &[E], want: &[E]) {
        assert_eq!(got.len(), want.len(), "batch length");
        if let Some(i) = (0..got.len()).find(|&i| got[i] != want[i]) {
            panic!("entity {i} differs: got {:?}, want {:?}", got[i], want[i]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{from_properties, to_properties, KeyResolver};
    use proptest::prelude::*;

    #[test]
    fn test_fixture_keys() {
        let resolver = KeyResolver::new();
        assert_eq!(
            resolver.resolve(&HasId::new(4, "x")).unwrap(),
            Key::with_int("HasId", 4)
        );
        assert_eq!(
            resolver.resolve(&HasId::new(4, "x").with_kind("Custom")).unwrap(),
            Key::with_int("Custom", 4)
        );
        assert_eq!(
            resolver.resolve(&HasDefaultKind::default()).unwrap(),
            Key::incomplete("DefaultKind")
        );
        assert_eq!(
            resolver.resolve(&HasString::new("abc", "")).unwrap(),
            Key::with_name("HasString", "abc")
        );
        assert!(resolver.resolve(&TwoId::default()).is_err());
        assert!(resolver.resolve(&NoId::default()).is_err());
        assert_eq!(
            resolver.kind_of(&fixtures::migration_a(1)).unwrap(),
            resolver.kind_of(&MigrationB::default()).unwrap()
        );
    }

    #[test]
    fn test_migration_layouts_compatible() {
        let props = to_properties(&fixtures::migration_a(1)).unwrap();
        let b: MigrationB = from_properties(&props).unwrap();
        assert_eq!(b.fancy_number, 123);
        assert_eq!(b.cars, vec!["BMW".to_string()]);
        assert_eq!(b.animal, "fox");
        assert_eq!(b.slang, "rabbit");
        assert_eq!(b.flower, "rose");
        assert_eq!((b.daughter_name.as_str(), b.daughter_age), ("Maria", 6));
        assert_eq!(b.old_folks.len(), 2);
        assert!(b.tags.is_empty());
    }

    #[test]
    fn test_set_key_restores_kind_and_parent() {
        let parent = Key::with_name("Fruit", "Apple");
        let key = Key::with_int("Seed", 9).with_parent(parent.clone());
        let mut e = HasId::default();
        e.set_key(&key);
        assert_eq!(e.id, 9);
        assert_eq!(e.kind, "Seed");
        assert_eq!(e.parent, Some(parent));
    }

    proptest! {
        #[test]
        fn prop_generated_keys_complete(key in generators::arb_key()) {
            prop_assert!(!key.is_incomplete());
            prop_assert_eq!(Key::decode(&key.encode()).unwrap(), key);
        }

        #[test]
        fn prop_generated_batches_have_distinct_ids(batch in generators::arb_batch(50)) {
            for (i, e) in batch.iter().enumerate() {
                prop_assert_eq!(e.id, i as i64 + 1);
            }
        }
    }
}
