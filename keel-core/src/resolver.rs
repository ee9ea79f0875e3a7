//! Key derivation from entity values.
//!
//! Each entity type's schema is validated the first time the type is seen
//! and the outcome (binding or error) is remembered in a per-resolver
//! registry keyed by [`TypeId`]. Deriving a key afterwards only reads
//! instance accessors.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::entity::{Entity, IdField, IdType};
use crate::error::{KeelResult, KeyError, StoreError};
use crate::{Key, KeyId};

/// Validated key-derivation data for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityBinding {
    pub type_name: &'static str,
    pub id_field: IdField,
    pub default_kind: Option<&'static str>,
}

impl EntityBinding {
    fn from_schema<E: Entity>() -> Result<Self, KeyError> {
        let schema = E::schema();
        match schema.id_fields.as_slice() {
            [] => Err(KeyError::MissingIdField {
                type_name: schema.type_name,
            }),
            [field] => Ok(Self {
                type_name: schema.type_name,
                id_field: *field,
                default_kind: schema.default_kind.filter(|k| !k.is_empty()),
            }),
            fields => Err(KeyError::MultipleIdFields {
                type_name: schema.type_name,
                fields: fields.iter().map(|f| f.name).collect(),
            }),
        }
    }

    fn check_id(&self, id: &KeyId) -> Result<(), KeyError> {
        let found = match (self.id_field.ty, id) {
            (_, KeyId::Incomplete) | (IdType::Int, KeyId::Int(_)) | (IdType::Str, KeyId::Name(_)) => {
                return Ok(())
            }
            (_, KeyId::Int(_)) => IdType::Int,
            (_, KeyId::Name(_)) => IdType::Str,
        };
        Err(KeyError::IdTypeMismatch {
            type_name: self.type_name,
            declared: self.id_field.ty.as_str(),
            found: found.as_str(),
        })
    }

    /// Instance kind, then the schema default, then the type name.
    fn kind_for<'a, E: Entity>(&'a self, entity: &'a E) -> &'a str {
        entity
            .kind()
            .filter(|k| !k.is_empty())
            .or(self.default_kind)
            .unwrap_or(self.type_name)
    }
}

type Registry = HashMap<TypeId, Result<Arc<EntityBinding>, KeyError>>;

/// Derives keys from entity values.
#[derive(Debug, Default)]
pub struct KeyResolver {
    registry: RwLock<Registry>,
}

impl KeyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// The validated binding for `E`, computed on first use.
    pub fn binding<E: Entity>(&self) -> KeelResult<Arc<EntityBinding>> {
        let type_id = TypeId::of::<E>();
        {
            let registry = self
                .registry
                .read()
                .map_err(|_| StoreError::LockPoisoned)?;
            if let Some(cached) = registry.get(&type_id) {
                return Ok(cached.clone()?);
            }
        }

        let computed = EntityBinding::from_schema::<E>().map(Arc::new);
        let mut registry = self
            .registry
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        let entry = registry.entry(type_id).or_insert(computed);
        Ok(entry.clone()?)
    }

    /// Derive the key of `entity`. Incomplete keys are allowed.
    pub fn resolve<E: Entity>(&self, entity: &E) -> KeelResult<Key> {
        let binding = self.binding::<E>()?;
        let id = entity.id();
        binding.check_id(&id)?;
        let key = Key::new(binding.kind_for(entity), id);
        Ok(match entity.parent() {
            Some(parent) => key.with_parent(parent),
            None => key,
        })
    }

    /// Derive a key for a put; an empty string id cannot be allocated.
    pub fn resolve_for_put<E: Entity>(&self, entity: &E) -> KeelResult<Key> {
        let binding = self.binding::<E>()?;
        let key = self.resolve(entity)?;
        if key.is_incomplete() && binding.id_field.ty == IdType::Str {
            return Err(KeyError::IncompleteStringId {
                kind: key.kind().to_string(),
            }
            .into());
        }
        Ok(key)
    }

    /// Derive a key for a get; the entity must already have an id.
    pub fn resolve_for_lookup<E: Entity>(&self, entity: &E) -> KeelResult<Key> {
        let key = self.resolve(entity)?;
        if key.is_incomplete() {
            return Err(KeyError::IncompleteKey {
                kind: key.kind().to_string(),
            }
            .into());
        }
        Ok(key)
    }

    /// The kind `entity` would be stored under.
    pub fn kind_of<E: Entity>(&self, entity: &E) -> KeelResult<String> {
        let binding = self.binding::<E>()?;
        Ok(binding.kind_for(entity).to_string())
    }

    /// Number of types seen so far, valid or not.
    pub fn registered_types(&self) -> usize {
        self.registry.read().map(|r| r.len()).unwrap_or(0)
    }
}

// =============================================================================
// TESTS
// =============================================================================
