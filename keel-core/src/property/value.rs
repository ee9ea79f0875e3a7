//! Property values and the flattened property list.

use std::collections::BTreeMap;
use std::ops::Bound;

use serde::{Deserialize, Serialize};

/// A single stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

/// The persisted shape of an entity: dotted property paths mapped to one or
/// more values.
///
/// A path with several values is a multi-valued property; there is no
/// distinction between a scalar and a one-element sequence.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PropertyList {
    properties: BTreeMap<String, Vec<Value>>,
}

impl PropertyList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value to the property at `path`.
    pub fn push(&mut self, path: impl Into<String>, value: Value) {
        self.properties.entry(path.into()).or_default().push(value);
    }

    /// Move every value of `other` onto the end of the matching paths.
    pub fn append(&mut self, other: PropertyList) {
        for (path, values) in other.properties {
            self.properties.entry(path).or_default().extend(values);
        }
    }

    pub fn get(&self, path: &str) -> Option<&[Value]> {
        self.properties.get(path).map(Vec::as_slice)
    }

    /// The only value at `path`, if it holds exactly one.
    pub fn single(&self, path: &str) -> Option<&Value> {
        match self.get(path) {
            Some([value]) => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.properties.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.properties
            .iter()
            .map(|(path, values)| (path.as_str(), values.as_slice()))
    }

    /// Properties strictly below `prefix` (`prefix.` followed by anything).
    pub fn children<'a>(&'a self, prefix: &str) -> impl Iterator<Item = (&'a str, &'a [Value])> {
        let start = format!("{prefix}.");
        let range = self
            .properties
            .range::<String, _>((Bound::Included(start.clone()), Bound::Unbounded));
        range
            .take_while(move |(path, _)| path.starts_with(&start))
            .map(|(path, values)| (path.as_str(), values.as_slice()))
    }

    /// Keep only the listed paths and everything below them.
    pub fn project(&self, paths: &[String]) -> PropertyList {
        let properties = self
            .properties
            .iter()
            .filter(|(path, _)| {
                paths.iter().any(|p| {
                    path.as_str() == p
                        || (path.starts_with(p.as_str()) && path[p.len()..].starts_with('.'))
                })
            })
            .map(|(path, values)| (path.clone(), values.clone()))
            .collect();
        PropertyList { properties }
    }

    /// Approximate encoded size, used for remote-cache size classes.
    pub fn approximate_size(&self) -> usize {
        self.properties
            .iter()
            .map(|(path, values)| {
                path.len()
                    + values
                        .iter()
                        .map(|v| match v {
                            Value::Str(s) => s.len() + 2,
                            Value::Bytes(b) => b.len() + 2,
                            _ => 8,
                        })
                        .sum::<usize>()
            })
            .sum()
    }
}
