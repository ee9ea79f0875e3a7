//! Query description.
//!
//! Only what the store contract needs: a kind, equality filters, an optional
//! ancestor, a limit, a projection and the keys-only flag. Results are
//! ordered by key.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::property::{PropertyList, Value};
use crate::Key;

/// Equality filter on a property path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub path: String,
    pub value: Value,
}

impl Filter {
    /// A multi-valued property matches if any of its values is equal.
    pub fn matches(&self, props: &PropertyList) -> bool {
        props
            .get(&self.path)
            .is_some_and(|values| values.iter().any(|v| v == &self.value))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    kind: String,
    filters: Vec<Filter>,
    ancestor: Option<Key>,
    limit: Option<usize>,
    projection: Vec<String>,
    keys_only: bool,
}

impl Query {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            filters: Vec::new(),
            ancestor: None,
            limit: None,
            projection: Vec::new(),
            keys_only: false,
        }
    }

    pub fn filter(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            path: path.into(),
            value: value.into(),
        });
        self
    }

    /// Restrict results to `ancestor` and its descendants.
    pub fn ancestor(mut self, ancestor: Key) -> Self {
        self.ancestor = Some(ancestor);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Return only the listed property paths.
    pub fn project<S: AsRef<str>>(mut self, paths: &[S]) -> Self {
        self.projection = paths.iter().map(|p| p.as_ref().to_string()).collect();
        self
    }

    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }

    /// The same query returning keys only, with any projection dropped.
    pub fn as_keys_only(&self) -> Query {
        Query {
            projection: Vec::new(),
            keys_only: true,
            ..self.clone()
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn ancestor_key(&self) -> Option<&Key> {
        self.ancestor.as_ref()
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    pub fn projection(&self) -> &[String] {
        &self.projection
    }

    pub fn is_keys_only(&self) -> bool {
        self.keys_only
    }

    /// True if results carry every property of the entity.
    pub fn is_full(&self) -> bool {
        !self.keys_only && self.projection.is_empty()
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.kind.is_empty() {
            return Err(StoreError::InvalidQuery {
                reason: "query has no kind".to_string(),
            });
        }
        if self.keys_only && !self.projection.is_empty() {
            return Err(StoreError::InvalidQuery {
                reason: "keys-only queries cannot project properties".to_string(),
            });
        }
        if self.limit == Some(0) {
            return Err(StoreError::InvalidQuery {
                reason: "limit must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// True if the entity at `key` with `props` is a result of this query.
    pub fn matches(&self, key: &Key, props: &PropertyList) -> bool {
        if key.kind() != self.kind {
            return false;
        }
        if let Some(ancestor) = &self.ancestor {
            if !key.has_ancestor(ancestor) {
                return false;
            }
        }
        self.filters.iter().all(|f| f.matches(props))
    }

    /// Shape a matching entity's properties the way this query returns them.
    pub fn shape(&self, props: &PropertyList) -> PropertyList {
        if self.keys_only {
            PropertyList::new()
        } else if self.projection.is_empty() {
            props.clone()
        } else {
            props.project(&self.projection)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(data: &str) -> PropertyList {
        let mut p = PropertyList::new();
        p.push("data", Value::from(data));
        p.push("extra", Value::Int(7));
        p
    }

    #[test]
    fn test_matches_kind_and_filters() {
        let query = Query::new("QueryItem").filter("data", "two");
        assert!(query.matches(&Key::with_int("QueryItem", 2), &props("two")));
        assert!(!query.matches(&Key::with_int("QueryItem", 1), &props("one")));
        assert!(!query.matches(&Key::with_int("Other", 2), &props("two")));
    }

    #[test]
    fn test_multi_valued_filter_matches_any() {
        let mut p = PropertyList::new();
        p.push("tags", Value::from("a"));
        p.push("tags", Value::from("b"));
        assert!(Query::new("K").filter("tags", "b").matches(&Key::with_int("K", 1), &p));
    }

    #[test]
    fn test_ancestor_filter() {
        let root = Key::with_name("Fruit", "Apple");
        let child = Key::with_int("Seed", 1).with_parent(root.clone());
        let query = Query::new("Seed").ancestor(root);
        assert!(query.matches(&child, &PropertyList::new()));
        assert!(!query.matches(&Key::with_int("Seed", 1), &PropertyList::new()));
    }

    #[test]
    fn test_shape() {
        let full = Query::new("QueryItem");
        assert!(full.is_full());
        assert_eq!(full.shape(&props("one")), props("one"));

        let keys = Query::new("QueryItem").keys_only();
        assert!(!keys.is_full());
        assert!(keys.shape(&props("one")).is_empty());

        let projected = Query::new("QueryItem").project(&["data"]);
        let shaped = projected.shape(&props("one"));
        assert!(shaped.contains("data"));
        assert!(!shaped.contains("extra"));

        let converted = projected.as_keys_only();
        assert!(converted.is_keys_only());
        assert!(converted.projection().is_empty());
        assert!(converted.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        assert!(Query::new("K").validate().is_ok());
        assert!(Query::new("").validate().is_err());
        assert!(Query::new("K").keys_only().project(&["a"]).validate().is_err());
        assert!(Query::new("K").limit(0).validate().is_err());
    }
}
