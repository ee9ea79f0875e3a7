//! KEEL Core - Keys, Entities and Properties
//!
//! Pure, synchronous data model shared by every tier: structured keys and
//! their canonical string form, the entity capability trait and its
//! per-type key resolver, the flattened property codec, query
//! descriptions, configuration and the error taxonomy.

pub mod config;
pub mod entity;
pub mod error;
pub mod key;
pub mod property;
pub mod query;
pub mod resolver;

pub use config::KeelConfig;
pub use entity::{normalize_slots, Entity, EntitySchema, EntitySlot, IdField, IdType};
pub use error::{
    is_not_found_at, CacheError, ConfigError, KeelError, KeelResult, KeyError, MultiError,
    PropertyError, StoreError,
};
pub use key::{Key, KeyId};
pub use property::{from_properties, to_properties, PropertyList, Value};
pub use query::{Filter, Query};
pub use resolver::{EntityBinding, KeyResolver};
