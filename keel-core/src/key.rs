//! Structured entity keys and their canonical string form.
//!
//! A [`Key`] names one entity: a kind, at most one id component, and an
//! optional parent chain. The canonical string form produced by
//! [`Key::encode`] is what both cache tiers index by.
//!
//! # Canonical Format
//!
//! Segments are written root-first and joined by `/`. Each segment is
//! `kind:i<int>`, `kind:s<string>` or `kind:_` for an incomplete id.
//! `%`, `/` and `:` inside kinds and string ids are percent-escaped, so the
//! format decodes unambiguously.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::KeyError;

/// Separator between segments of a key path.
const SEGMENT_SEPARATOR: char = '/';

/// Separator between a segment's kind and its id.
const ID_SEPARATOR: char = ':';

/// The identifying component of a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyId {
    /// No id yet; valid only as a put argument awaiting allocation.
    Incomplete,
    /// Integer id, allocated by the store or chosen by the caller.
    Int(i64),
    /// String id, always chosen by the caller.
    Name(String),
}

impl KeyId {
    /// Normalise zero / empty ids to [`KeyId::Incomplete`].
    pub fn from_int(id: i64) -> Self {
        if id == 0 {
            KeyId::Incomplete
        } else {
            KeyId::Int(id)
        }
    }

    pub fn from_name(name: impl Into<String>) -> Self {
        let name = name.into();
        if name.is_empty() {
            KeyId::Incomplete
        } else {
            KeyId::Name(name)
        }
    }

    pub fn is_incomplete(&self) -> bool {
        matches!(self, KeyId::Incomplete)
    }
}

/// A structured entity key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    kind: String,
    id: KeyId,
    parent: Option<Box<Key>>,
}

impl Key {
    pub fn new(kind: impl Into<String>, id: KeyId) -> Self {
        Self {
            kind: kind.into(),
            id,
            parent: None,
        }
    }

    /// Key with an integer id; `0` yields an incomplete key.
    pub fn with_int(kind: impl Into<String>, id: i64) -> Self {
        Self::new(kind, KeyId::from_int(id))
    }

    /// Key with a string id; `""` yields an incomplete key.
    pub fn with_name(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(kind, KeyId::from_name(name))
    }

    pub fn incomplete(kind: impl Into<String>) -> Self {
        Self::new(kind, KeyId::Incomplete)
    }

    /// Attach an ancestor chain.
    pub fn with_parent(mut self, parent: Key) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> &KeyId {
        &self.id
    }

    /// Integer id, or `0` if the key has none.
    pub fn int_id(&self) -> i64 {
        match self.id {
            KeyId::Int(id) => id,
            _ => 0,
        }
    }

    /// String id, or `""` if the key has none.
    pub fn string_id(&self) -> &str {
        match &self.id {
            KeyId::Name(name) => name,
            _ => "",
        }
    }

    pub fn parent(&self) -> Option<&Key> {
        self.parent.as_deref()
    }

    /// True if this key has no id component (its ancestors may be complete).
    pub fn is_incomplete(&self) -> bool {
        self.id.is_incomplete()
    }

    /// The same key with its own id replaced.
    pub fn with_id(&self, id: KeyId) -> Key {
        Key {
            kind: self.kind.clone(),
            id,
            parent: self.parent.clone(),
        }
    }

    /// The root ancestor, which names this key's entity group.
    pub fn root(&self) -> &Key {
        let mut current = self;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// True if `ancestor` is this key or one of its ancestors.
    pub fn has_ancestor(&self, ancestor: &Key) -> bool {
        let mut current = Some(self);
        while let Some(key) = current {
            if key == ancestor {
                return true;
            }
            current = key.parent();
        }
        false
    }

    /// Segments from the root down to this key.
    fn segments(&self) -> Vec<(&str, &KeyId)> {
        let mut segments = Vec::new();
        let mut current = Some(self);
        while let Some(key) = current {
            segments.push((key.kind.as_str(), &key.id));
            current = key.parent();
        }
        segments.reverse();
        segments
    }

    /// Canonical string form used by both cache tiers.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (i, (kind, id)) in self.segments().into_iter().enumerate() {
            if i > 0 {
                out.push(SEGMENT_SEPARATOR);
            }
            escape_into(kind, &mut out);
            out.push(ID_SEPARATOR);
            match id {
                KeyId::Incomplete => out.push('_'),
                KeyId::Int(n) => {
                    out.push('i');
                    out.push_str(&n.to_string());
                }
                KeyId::Name(name) => {
                    out.push('s');
                    escape_into(name, &mut out);
                }
            }
        }
        out
    }

    /// Parse the canonical string form.
    pub fn decode(encoded: &str) -> Result<Key, KeyError> {
        let malformed = |reason: &str| KeyError::Malformed {
            encoded: encoded.to_string(),
            reason: reason.to_string(),
        };

        if encoded.is_empty() {
            return Err(malformed("empty key"));
        }

        let mut key: Option<Key> = None;
        for segment in encoded.split(SEGMENT_SEPARATOR) {
            let (kind, id) = segment
                .split_once(ID_SEPARATOR)
                .ok_or_else(|| malformed("segment without id separator"))?;
            let kind = unescape(kind).ok_or_else(|| malformed("bad escape in kind"))?;
            if kind.is_empty() {
                return Err(malformed("empty kind"));
            }
            let id = match id.split_at_checked(1) {
                Some(("_", "")) => KeyId::Incomplete,
                Some(("i", digits)) => {
                    let n: i64 = digits
                        .parse()
                        .map_err(|_| malformed("integer id is not a number"))?;
                    if n == 0 {
                        return Err(malformed("integer id of zero"));
                    }
                    KeyId::Int(n)
                }
                Some(("s", name)) => {
                    let name = unescape(name).ok_or_else(|| malformed("bad escape in id"))?;
                    if name.is_empty() {
                        return Err(malformed("empty string id"));
                    }
                    KeyId::Name(name)
                }
                _ => return Err(malformed("unknown id tag")),
            };
            let mut next = Key::new(kind, id);
            next.parent = key.map(Box::new);
            key = Some(next);
        }

        key.ok_or_else(|| malformed("empty key"))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    /// Root-first path ordering, so children sort after their ancestors.
    fn cmp(&self, other: &Self) -> Ordering {
        self.segments().cmp(&other.segments())
    }
}

fn escape_into(raw: &str, out: &mut String) {
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            ':' => out.push_str("%3A"),
            _ => out.push(c),
        }
    }
}

fn unescape(escaped: &str) -> Option<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => {
                let code: String = chars.by_ref().take(2).collect();
                match code.as_str() {
                    "25" => out.push('%'),
                    "2F" => out.push('/'),
                    "3A" => out.push(':'),
                    _ => return None,
                }
            }
            '/' | ':' => return None,
            _ => out.push(c),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zero_and_empty_ids_are_incomplete() {
        assert!(Key::with_int("HasId", 0).is_incomplete());
        assert!(Key::with_name("HasString", "").is_incomplete());
        assert!(!Key::with_int("HasId", 1).is_incomplete());
        assert_eq!(Key::with_int("HasId", 7).int_id(), 7);
        assert_eq!(Key::with_int("HasId", 7).string_id(), "");
        assert_eq!(Key::with_name("HasString", "new").string_id(), "new");
    }

    #[test]
    fn test_equality_uses_kind_and_id() {
        assert_eq!(Key::with_int("HasId", 1), Key::with_int("HasId", 1));
        assert_ne!(Key::with_int("HasId", 1), Key::with_int("OtherKind", 1));
        assert_ne!(Key::with_int("HasId", 1), Key::with_name("HasId", "1"));
        let parent = Key::with_name("Fruit", "Apple");
        assert_ne!(
            Key::with_int("HasId", 1),
            Key::with_int("HasId", 1).with_parent(parent)
        );
    }

    #[test]
    fn test_encode_format() {
        let key = Key::with_int("Seed", 3).with_parent(Key::with_name("Fruit", "Apple"));
        assert_eq!(key.encode(), "Fruit:sApple/Seed:i3");
        assert_eq!(Key::incomplete("HasId").encode(), "HasId:_");
        assert_eq!(Key::with_name("a/b", "c:d%").encode(), "a%2Fb:sc%3Ad%25");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        for bad in ["", "NoSeparator", ":i1", "Kind:x1", "Kind:i0", "Kind:iabc", "Kind:s", "K%zz:i1"] {
            assert!(Key::decode(bad).is_err(), "expected {bad:?} to be rejected");
        }
    }

    #[test]
    fn test_root_and_ancestors() {
        let root = Key::with_name("Fruit", "Apple");
        let child = Key::with_int("Seed", 3).with_parent(root.clone());
        let grandchild = Key::with_int("Cell", 9).with_parent(child.clone());
        assert_eq!(grandchild.root(), &root);
        assert!(grandchild.has_ancestor(&root));
        assert!(grandchild.has_ancestor(&child));
        assert!(!root.has_ancestor(&child));
    }

    #[test]
    fn test_ordering_is_numeric_for_int_ids() {
        let mut keys = vec![
            Key::with_int("HasId", 10),
            Key::with_int("HasId", 2),
            Key::with_int("HasId", 1),
        ];
        keys.sort();
        let ids: Vec<i64> = keys.iter().map(Key::int_id).collect();
        assert_eq!(ids, vec![1, 2, 10]);
    }

    fn segment_strategy() -> impl Strategy<Value = (String, KeyId)> {
        let id = prop_oneof![
            Just(KeyId::Incomplete),
            any::<i64>().prop_map(KeyId::from_int),
            "[a-zA-Z0-9/:% ]{1,12}".prop_map(KeyId::Name),
        ];
        ("[a-zA-Z/:%]{1,10}", id)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Property: the canonical form round-trips for arbitrary key paths.
        #[test]
        fn prop_encode_decode_roundtrip(segments in prop::collection::vec(segment_strategy(), 1..4)) {
            let mut key: Option<Key> = None;
            for (kind, id) in segments {
                let next = Key::new(kind, id);
                key = Some(match key {
                    Some(parent) => next.with_parent(parent),
                    None => next,
                });
            }
            let key = key.expect("at least one segment");
            let decoded = Key::decode(&key.encode());
            prop_assert_eq!(Ok(key), decoded);
        }

        /// Property: distinct keys never share a canonical form.
        #[test]
        fn prop_encoding_is_injective(a in segment_strategy(), b in segment_strategy()) {
            let ka = Key::new(a.0, a.1);
            let kb = Key::new(b.0, b.1);
            if ka != kb {
                prop_assert_ne!(ka.encode(), kb.encode());
            }
        }
    }
}
