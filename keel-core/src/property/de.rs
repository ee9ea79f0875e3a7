//! Serde deserializer reading a value back out of a [`PropertyList`].
//!
//! Decoding is driven by the requesting type rather than by the layout that
//! produced the properties, which is what lets a type with a different but
//! path-compatible shape read an older entity:
//!
//! - a field renamed to `a.b` reads the property at that dotted path
//! - a sequence field reads every value of its path
//! - a scalar field reads a single-valued property
//! - a sequence of structs reads parallel values by index
//! - a missing property decodes to the field's zero value
//!
//! Properties with no matching field are ignored.

use std::collections::BTreeSet;

use serde::de::{
    self, DeserializeOwned, DeserializeSeed, IntoDeserializer, MapAccess, SeqAccess, Visitor,
};

use super::ser::join_path;
use super::value::{PropertyList, Value};
use crate::error::PropertyError;

type Result<T> = std::result::Result<T, PropertyError>;

/// Decode a struct-shaped value from properties.
pub fn from_properties<T: DeserializeOwned>(props: &PropertyList) -> Result<T> {
    T::deserialize(PropertyDeserializer {
        props,
        path: String::new(),
        index: None,
    })
}

struct PropertyDeserializer<'a> {
    props: &'a PropertyList,
    path: String,
    /// Position inside an enclosing sequence of structs.
    index: Option<usize>,
}

impl<'a> PropertyDeserializer<'a> {
    /// The value this deserializer stands for, `None` when absent.
    fn scalar(&self) -> Result<Option<&'a Value>> {
        let Some(values) = self.props.get(&self.path) else {
            return Ok(None);
        };
        match self.index {
            Some(i) => Ok(values.get(i)),
            None => match values {
                [] => Ok(None),
                [value] => Ok(Some(value)),
                _ => Err(PropertyError::MultipleValues {
                    path: self.path.clone(),
                    count: values.len(),
                }),
            },
        }
    }

    /// Like [`Self::scalar`] but treating null as absent.
    fn present(&self) -> Result<Option<&'a Value>> {
        Ok(self.scalar()?.filter(|v| !matches!(v, Value::Null)))
    }

    fn mismatch(&self, expected: &'static str, found: &Value) -> PropertyError {
        PropertyError::TypeMismatch {
            path: self.path.clone(),
            expected,
            found: found.type_name(),
        }
    }

    fn has_children(&self) -> bool {
        self.props.children(&self.path).next().is_some()
    }

    /// Number of elements a sequence at this path holds.
    ///
    /// A lone null is an absent optional scalar, not a one-element sequence.
    fn seq_len(&self) -> usize {
        let own = match self.props.get(&self.path) {
            None | Some([Value::Null]) => 0,
            Some(values) => values.len(),
        };
        self.props
            .children(&self.path)
            .map(|(_, values)| values.len())
            .fold(own, usize::max)
    }

    fn child(&self, name: &str) -> PropertyDeserializer<'a> {
        PropertyDeserializer {
            props: self.props,
            path: join_path(&self.path, name),
            index: self.index,
        }
    }

    /// Distinct first path segments below this path.
    fn child_names(&self) -> Vec<String> {
        let skip = if self.path.is_empty() {
            0
        } else {
            self.path.len() + 1
        };
        let names: BTreeSet<String> = if self.path.is_empty() {
            self.props
                .paths()
                .map(|p| p.split('.').next().unwrap_or(p).to_string())
                .collect()
        } else {
            self.props
                .children(&self.path)
                .map(|(p, _)| {
                    let rest = &p[skip..];
                    rest.split('.').next().unwrap_or(rest).to_string()
                })
                .collect()
        };
        names.into_iter().collect()
    }

    fn int(&self) -> Result<i64> {
        match self.present()? {
            None => Ok(0),
            Some(Value::Int(n)) => Ok(*n),
            Some(Value::Bool(b)) => Ok(i64::from(*b)),
            Some(other) => Err(self.mismatch("int", other)),
        }
    }

    fn float(&self) -> Result<f64> {
        match self.present()? {
            None => Ok(0.0),
            Some(Value::Float(f)) => Ok(*f),
            Some(Value::Int(n)) => Ok(*n as f64),
            Some(other) => Err(self.mismatch("float", other)),
        }
    }
}

macro_rules! deserialize_int {
    ($($method:ident => $visit:ident as $ty:ty,)*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
                let n = self.int()?;
                let narrowed = <$ty>::try_from(n).map_err(|_| PropertyError::TypeMismatch {
                    path: self.path.clone(),
                    expected: stringify!($ty),
                    found: "out-of-range int",
                })?;
                visitor.$visit(narrowed)
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for PropertyDeserializer<'de> {
    type Error = PropertyError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        if self.index.is_none() && self.props.get(&self.path).is_some_and(|v| v.len() > 1) {
            return self.deserialize_seq(visitor);
        }
        match self.scalar()? {
            Some(Value::Null) => visitor.visit_unit(),
            Some(Value::Bool(b)) => visitor.visit_bool(*b),
            Some(Value::Int(n)) => visitor.visit_i64(*n),
            Some(Value::Float(f)) => visitor.visit_f64(*f),
            Some(Value::Str(s)) => visitor.visit_str(s),
            Some(Value::Bytes(b)) => visitor.visit_bytes(b),
            None if self.has_children() || self.path.is_empty() => self.deserialize_map(visitor),
            None => visitor.visit_unit(),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.present()? {
            None => visitor.visit_bool(false),
            Some(Value::Bool(b)) => visitor.visit_bool(*b),
            Some(other) => Err(self.mismatch("bool", other)),
        }
    }

    deserialize_int! {
        deserialize_i8 => visit_i8 as i8,
        deserialize_i16 => visit_i16 as i16,
        deserialize_i32 => visit_i32 as i32,
        deserialize_i64 => visit_i64 as i64,
        deserialize_u8 => visit_u8 as u8,
        deserialize_u16 => visit_u16 as u16,
        deserialize_u32 => visit_u32 as u32,
        deserialize_u64 => visit_u64 as u64,
    }

    fn deserialize_f32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_f32(self.float()? as f32)
    }

    fn deserialize_f64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_f64(self.float()?)
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_str(visitor)
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.present()? {
            None => visitor.visit_str(""),
            Some(Value::Str(s)) => visitor.visit_str(s),
            Some(other) => Err(self.mismatch("string", other)),
        }
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.present()? {
            None => visitor.visit_bytes(&[]),
            Some(Value::Bytes(b)) => visitor.visit_bytes(b),
            Some(Value::Str(s)) => visitor.visit_bytes(s.as_bytes()),
            Some(other) => Err(self.mismatch("bytes", other)),
        }
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let absent = match self.index {
            Some(_) => self.present()?.is_none() && !self.has_children(),
            None => {
                let own_present = self
                    .props
                    .get(&self.path)
                    .is_some_and(|vs| vs.iter().any(|v| !matches!(v, Value::Null)));
                !own_present && !self.has_children()
            }
        };
        if absent {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        if self.index.is_some() {
            return Err(PropertyError::Unsupported {
                path: self.path,
                reason: "nested sequences".to_string(),
            });
        }
        let len = self.seq_len();
        visitor.visit_seq(SeqReader {
            de: self,
            next: 0,
            len,
        })
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let names = self.child_names();
        visitor.visit_map(FieldReader {
            de: self,
            fields: names.into_iter(),
            current: None,
        })
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        let names: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        visitor.visit_map(FieldReader {
            de: self,
            fields: names.into_iter(),
            current: None,
        })
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        match self.present()? {
            Some(Value::Str(s)) => visitor.visit_enum(s.as_str().into_deserializer()),
            Some(other) => Err(self.mismatch("enum variant name", other)),
            None => Err(PropertyError::Unsupported {
                path: self.path,
                reason: "missing enum variant has no zero value".to_string(),
            }),
        }
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_str(visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_unit()
    }
}

struct SeqReader<'a> {
    de: PropertyDeserializer<'a>,
    next: usize,
    len: usize,
}

impl<'de> SeqAccess<'de> for SeqReader<'de> {
    type Error = PropertyError;

    fn next_element_seed<T: DeserializeSeed<'de>>(&mut self, seed: T) -> Result<Option<T::Value>> {
        if self.next >= self.len {
            return Ok(None);
        }
        let element = PropertyDeserializer {
            props: self.de.props,
            path: self.de.path.clone(),
            index: Some(self.next),
        };
        self.next += 1;
        seed.deserialize(element).map(Some)
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.len - self.next)
    }
}

struct FieldReader<'a> {
    de: PropertyDeserializer<'a>,
    fields: std::vec::IntoIter<String>,
    current: Option<String>,
}

impl<'de> MapAccess<'de> for FieldReader<'de> {
    type Error = PropertyError;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>> {
        match self.fields.next() {
            Some(name) => {
                let field: de::value::StrDeserializer<'_, PropertyError> =
                    name.as_str().into_deserializer();
                let key = seed.deserialize(field)?;
                self.current = Some(name);
                Ok(Some(key))
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value> {
        let name = self
            .current
            .take()
            .ok_or_else(|| PropertyError::Message("field value without name".to_string()))?;
        seed.deserialize(self.de.child(&name))
    }
}
