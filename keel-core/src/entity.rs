//! The entity capability trait and input-shape normalisation.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Key, KeyId};

/// Which id component a type declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdType {
    Int,
    Str,
}

impl IdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdType::Int => "int",
            IdType::Str => "string",
        }
    }
}

/// A declared id field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdField {
    pub name: &'static str,
    pub ty: IdType,
}

impl IdField {
    pub fn int(name: &'static str) -> Self {
        Self {
            name,
            ty: IdType::Int,
        }
    }

    pub fn string(name: &'static str) -> Self {
        Self {
            name,
            ty: IdType::Str,
        }
    }
}

/// Static description of an entity type, checked once per type by the
/// [`KeyResolver`](crate::KeyResolver).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    /// Last-resort kind when neither the instance nor the schema names one.
    pub type_name: &'static str,
    /// Must hold exactly one entry for key derivation to succeed.
    pub id_fields: Vec<IdField>,
    pub default_kind: Option<&'static str>,
}

impl EntitySchema {
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            id_fields: Vec::new(),
            default_kind: None,
        }
    }

    pub fn with_id(mut self, field: IdField) -> Self {
        self.id_fields.push(field);
        self
    }

    pub fn with_default_kind(mut self, kind: &'static str) -> Self {
        self.default_kind = Some(kind);
        self
    }
}

/// A value that can be stored and cached.
///
/// Id fields are carried by the key, not the properties, so implementors
/// mark them `#[serde(skip)]` and expose them through [`Entity::id`] and
/// [`Entity::set_id`].
///
/// ```ignore
/// #[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// struct Fruit {
///     #[serde(skip)]
///     id: i64,
///     name: String,
/// }
///
/// impl Entity for Fruit {
///     fn schema() -> EntitySchema {
///         EntitySchema::new("Fruit").with_id(IdField::int("id"))
///     }
///     fn id(&self) -> KeyId {
///         KeyId::from_int(self.id)
///     }
///     fn set_id(&mut self, id: &KeyId) {
///         if let KeyId::Int(n) = id {
///             self.id = *n;
///         }
///     }
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Clone + Default + Send + Sync + 'static {
    fn schema() -> EntitySchema;

    /// Current id; zero or empty ids are [`KeyId::Incomplete`].
    fn id(&self) -> KeyId;

    /// Write back an id assigned by the store or taken from a key.
    fn set_id(&mut self, id: &KeyId);

    /// Per-instance kind override; empty strings are ignored.
    fn kind(&self) -> Option<&str> {
        None
    }

    fn parent(&self) -> Option<Key> {
        None
    }

    /// Write back the key an entity was loaded under.
    ///
    /// Types that keep their kind or parent in fields override this to
    /// restore them too.
    fn set_key(&mut self, key: &Key) {
        self.set_id(key.id());
    }
}

/// An element of a batch whose entity may be behind one level of
/// indirection.
///
/// Batch calls normalise every supported container into `Vec<&mut E>`
/// before doing any work, so the engine only sees one shape.
pub trait EntitySlot: Send {
    type Entity: Entity;

    fn entity(&self) -> &Self::Entity;

    fn entity_mut(&mut self) -> &mut Self::Entity;
}

impl<E: Entity> EntitySlot for Box<E> {
    type Entity = E;

    fn entity(&self) -> &E {
        self
    }

    fn entity_mut(&mut self) -> &mut E {
        self
    }
}

impl<E: Entity> EntitySlot for &mut E {
    type Entity = E;

    fn entity(&self) -> &E {
        self
    }

    fn entity_mut(&mut self) -> &mut E {
        self
    }
}

/// Borrow every slot's entity mutably, preserving order.
pub fn normalize_slots<S: EntitySlot>(slots: &mut [S]) -> Vec<&mut S::Entity> {
    slots.iter_mut().map(S::entity_mut).collect()
}
