//! Serde serializer flattening a value into a [`PropertyList`].
//!
//! Structs and string-keyed maps flatten into dotted paths, sequences into
//! multi-valued properties. Sequences of structs become parallel
//! multi-valued properties, one per field. A sequence inside a sequence has
//! no flattened form and is rejected.

use serde::ser::{self, Impossible, Serialize};

use super::value::{PropertyList, Value};
use crate::error::PropertyError;

type Result<T> = std::result::Result<T, PropertyError>;

/// Flatten any struct-shaped value into properties.
pub fn to_properties<T: Serialize + ?Sized>(value: &T) -> Result<PropertyList> {
    let mut out = PropertyList::new();
    value.serialize(PropertySerializer {
        out: &mut out,
        path: String::new(),
        in_seq: false,
    })?;
    Ok(out)
}

pub(crate) fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

struct PropertySerializer<'a> {
    out: &'a mut PropertyList,
    path: String,
    in_seq: bool,
}

impl PropertySerializer<'_> {
    fn push(self, value: Value) -> Result<()> {
        if self.path.is_empty() {
            return Err(PropertyError::Unsupported {
                path: self.path,
                reason: format!("a top-level {} has no property name", value.type_name()),
            });
        }
        self.out.push(self.path, value);
        Ok(())
    }

    fn unsupported(&self, reason: &str) -> PropertyError {
        PropertyError::Unsupported {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

impl<'a> ser::Serializer for PropertySerializer<'a> {
    type Ok = ();
    type Error = PropertyError;

    type SerializeSeq = SeqSerializer<'a>;
    type SerializeTuple = SeqSerializer<'a>;
    type SerializeTupleStruct = SeqSerializer<'a>;
    type SerializeTupleVariant = Impossible<(), PropertyError>;
    type SerializeMap = MapSerializer<'a>;
    type SerializeStruct = StructSerializer<'a>;
    type SerializeStructVariant = Impossible<(), PropertyError>;

    fn serialize_bool(self, v: bool) -> Result<()> {
        self.push(Value::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<()> {
        self.push(Value::Int(v.into()))
    }

    fn serialize_i16(self, v: i16) -> Result<()> {
        self.push(Value::Int(v.into()))
    }

    fn serialize_i32(self, v: i32) -> Result<()> {
        self.push(Value::Int(v.into()))
    }

    fn serialize_i64(self, v: i64) -> Result<()> {
        self.push(Value::Int(v))
    }

    fn serialize_u8(self, v: u8) -> Result<()> {
        self.push(Value::Int(v.into()))
    }

    fn serialize_u16(self, v: u16) -> Result<()> {
        self.push(Value::Int(v.into()))
    }

    fn serialize_u32(self, v: u32) -> Result<()> {
        self.push(Value::Int(v.into()))
    }

    fn serialize_u64(self, v: u64) -> Result<()> {
        let v = i64::try_from(v).map_err(|_| self.unsupported("u64 above i64::MAX"))?;
        self.push(Value::Int(v))
    }

    fn serialize_f32(self, v: f32) -> Result<()> {
        self.push(Value::Float(v.into()))
    }

    fn serialize_f64(self, v: f64) -> Result<()> {
        self.push(Value::Float(v))
    }

    fn serialize_char(self, v: char) -> Result<()> {
        self.push(Value::Str(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<()> {
        self.push(Value::Str(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<()> {
        self.push(Value::Bytes(v.to_vec()))
    }

    fn serialize_none(self) -> Result<()> {
        self.push(Value::Null)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<()> {
        // A `Some` that writes nothing would read back as `None`.
        let mut written = PropertyList::new();
        value.serialize(PropertySerializer {
            out: &mut written,
            path: self.path.clone(),
            in_seq: self.in_seq,
        })?;
        if written.is_empty() {
            return Err(self.unsupported("`Some` of an empty sequence has no stored form"));
        }
        self.out.append(written);
        Ok(())
    }

    fn serialize_unit(self) -> Result<()> {
        self.push(Value::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<()> {
        self.push(Value::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<()> {
        self.push(Value::Str(variant.to_string()))
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<()> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<()> {
        Err(self.unsupported("enum variants with data"))
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<SeqSerializer<'a>> {
        if self.in_seq {
            return Err(self.unsupported("nested sequences"));
        }
        Ok(SeqSerializer {
            out: self.out,
            path: self.path,
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqSerializer<'a>> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SeqSerializer<'a>> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        Err(self.unsupported("enum variants with data"))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<MapSerializer<'a>> {
        Ok(MapSerializer {
            out: self.out,
            path: self.path,
            in_seq: self.in_seq,
            next_key: None,
        })
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<StructSerializer<'a>> {
        Ok(StructSerializer {
            out: self.out,
            path: self.path,
            in_seq: self.in_seq,
        })
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant> {
        Err(self.unsupported("enum variants with data"))
    }
}

struct SeqSerializer<'a> {
    out: &'a mut PropertyList,
    path: String,
}

impl SeqSerializer<'_> {
    fn element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        value.serialize(PropertySerializer {
            out: self.out,
            path: self.path.clone(),
            in_seq: true,
        })
    }
}

impl ser::SerializeSeq for SeqSerializer<'_> {
    type Ok = ();
    type Error = PropertyError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.element(value)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl ser::SerializeTuple for SeqSerializer<'_> {
    type Ok = ();
    type Error = PropertyError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.element(value)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for SeqSerializer<'_> {
    type Ok = ();
    type Error = PropertyError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.element(value)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

struct StructSerializer<'a> {
    out: &'a mut PropertyList,
    path: String,
    in_seq: bool,
}

impl ser::SerializeStruct for StructSerializer<'_> {
    type Ok = ();
    type Error = PropertyError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, key: &'static str, value: &T) -> Result<()> {
        value.serialize(PropertySerializer {
            out: self.out,
            path: join_path(&self.path, key),
            in_seq: self.in_seq,
        })
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

struct MapSerializer<'a> {
    out: &'a mut PropertyList,
    path: String,
    in_seq: bool,
    next_key: Option<String>,
}

impl ser::SerializeMap for MapSerializer<'_> {
    type Ok = ();
    type Error = PropertyError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<()> {
        self.next_key = Some(key.serialize(MapKeySerializer)?);
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let key = self
            .next_key
            .take()
            .ok_or_else(|| PropertyError::Message("map value without key".to_string()))?;
        value.serialize(PropertySerializer {
            out: self.out,
            path: join_path(&self.path, &key),
            in_seq: self.in_seq,
        })
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

/// Accepts only string-like map keys.
struct MapKeySerializer;

impl ser::Serializer for MapKeySerializer {
    type Ok = String;
    type Error = PropertyError;

    type SerializeSeq = Impossible<String, PropertyError>;
    type SerializeTuple = Impossible<String, PropertyError>;
    type SerializeTupleStruct = Impossible<String, PropertyError>;
    type SerializeTupleVariant = Impossible<String, PropertyError>;
    type SerializeMap = Impossible<String, PropertyError>;
    type SerializeStruct = Impossible<String, PropertyError>;
    type SerializeStructVariant = Impossible<String, PropertyError>;

    fn serialize_str(self, v: &str) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_char(self, v: char) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<String> {
        Ok(variant.to_string())
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<String> {
        value.serialize(self)
    }

    fn serialize_bool(self, _v: bool) -> Result<String> {
        Err(non_string_key())
    }

    fn serialize_i8(self, v: i8) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_i16(self, v: i16) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_i32(self, v: i32) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_i64(self, v: i64) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_u8(self, v: u8) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_u16(self, v: u16) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_u32(self, v: u32) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_u64(self, v: u64) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_f32(self, _v: f32) -> Result<String> {
        Err(non_string_key())
    }

    fn serialize_f64(self, _v: f64) -> Result<String> {
        Err(non_string_key())
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<String> {
        Err(non_string_key())
    }

    fn serialize_none(self) -> Result<String> {
        Err(non_string_key())
    }

    fn serialize_some<T: Serialize + ?Sized>(self, _value: &T) -> Result<String> {
        Err(non_string_key())
    }

    fn serialize_unit(self) -> Result<String> {
        Err(non_string_key())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<String> {
        Err(non_string_key())
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<String> {
        Err(non_string_key())
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq> {
        Err(non_string_key())
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple> {
        Err(non_string_key())
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct> {
        Err(non_string_key())
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        Err(non_string_key())
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap> {
        Err(non_string_key())
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self::SerializeStruct> {
        Err(non_string_key())
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant> {
        Err(non_string_key())
    }
}

fn non_string_key() -> PropertyError {
    PropertyError::Message("map keys must be strings or integers".to_string())
}
