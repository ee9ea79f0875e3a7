//! Error types for keel operations

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::Key;

/// Malformed key or id declaration (the "bad key shape" family).
///
/// Always fatal to the single operation that produced it and never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("{type_name} declares more than one id field: {fields:?}")]
    MultipleIdFields {
        type_name: &'static str,
        fields: Vec<&'static str>,
    },

    #[error("{type_name} declares no id field")]
    MissingIdField { type_name: &'static str },

    #[error("{type_name} declares a {declared} id but the value carries a {found} id")]
    IdTypeMismatch {
        type_name: &'static str,
        declared: &'static str,
        found: &'static str,
    },

    #[error("Cannot put {kind} with an empty string id; the store only allocates integer ids")]
    IncompleteStringId { kind: String },

    #[error("Incomplete key for {kind} cannot be used for a lookup")]
    IncompleteKey { kind: String },

    #[error("Malformed encoded key {encoded:?}: {reason}")]
    Malformed { encoded: String, reason: String },
}

/// Persistent store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("No such entity: {key}")]
    NotFound { key: Key },

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Batch of {got} exceeds the store limit of {limit} for {operation}")]
    BatchTooLarge {
        operation: &'static str,
        limit: usize,
        got: usize,
    },

    #[error("Concurrent transaction conflict on {key}")]
    Conflict { key: Key },

    #[error("Transaction touched {groups} entity groups, allowed {allowed}")]
    CrossGroup { groups: usize, allowed: usize },

    #[error("Transaction already committed or rolled back")]
    TransactionClosed,

    #[error("Write attempted in a read-only transaction")]
    ReadOnly,

    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Remote cache tier errors.
///
/// These never reach callers of the handle; the tier is degraded instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Remote cache {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Remote cache transport error: {reason}")]
    Transport { reason: String },

    #[error("Remote cache serialization error: {reason}")]
    Serialization { reason: String },
}

/// Property codec errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PropertyError {
    #[error("Property {path:?} holds {found}, expected {expected}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Property {path:?} has {count} values but the field holds one")]
    MultipleValues { path: String, count: usize },

    #[error("Unsupported shape at {path:?}: {reason}")]
    Unsupported { path: String, reason: String },

    #[error("{0}")]
    Message(String),
}

impl serde::ser::Error for PropertyError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        PropertyError::Message(msg.to_string())
    }
}

impl serde::de::Error for PropertyError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        PropertyError::Message(msg.to_string())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all keel operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum KeelError {
    #[error("Bad key shape: {0}")]
    Key(#[from] KeyError),

    #[error("No such entity: {key}")]
    NotFound { key: Key },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to decode {key}: {source}")]
    Decode { key: Key, source: PropertyError },

    #[error("Failed to encode {key}: {source}")]
    Encode { key: Key, source: PropertyError },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Multi(MultiError),

    #[error("Nested transactions are not supported by this store")]
    NestedTransaction,
}

impl KeelError {
    /// True for a plain not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, KeelError::NotFound { .. })
    }

    /// The multi-error carried by this error, if any.
    pub fn as_multi(&self) -> Option<&MultiError> {
        match self {
            KeelError::Multi(m) => Some(m),
            _ => None,
        }
    }
}

/// Result type alias for keel operations.
pub type KeelResult<T> = Result<T, KeelError>;

/// Positional error set over a batch.
///
/// Always sized to the input; index `i` is `Some` iff operation `i` failed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MultiError {
    errors: Vec<Option<KeelError>>,
}

impl MultiError {
    /// An all-success error set for a batch of `len` operations.
    pub fn new(len: usize) -> Self {
        Self {
            errors: vec![None; len],
        }
    }

    pub fn from_vec(errors: Vec<Option<KeelError>>) -> Self {
        Self { errors }
    }

    pub fn set(&mut self, index: usize, error: KeelError) {
        self.errors[index] = Some(error);
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&KeelError> {
        self.errors.get(index).and_then(Option::as_ref)
    }

    /// True if index `index` failed because the entity does not exist.
    pub fn is_not_found(&self, index: usize) -> bool {
        self.get(index).is_some_and(KeelError::is_not_found)
    }

    pub fn has_errors(&self) -> bool {
        self.errors.iter().any(Option::is_some)
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.errors
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|_| i))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&KeelError>> {
        self.errors.iter().map(Option::as_ref)
    }

    pub fn into_vec(self) -> Vec<Option<KeelError>> {
        self.errors
    }

    /// `Ok(())` when no index failed, otherwise the error set itself.
    pub fn into_result(self) -> KeelResult<()> {
        if self.has_errors() {
            Err(KeelError::Multi(self))
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed: Vec<&KeelError> = self.errors.iter().flatten().collect();
        match failed.first() {
            None => write!(f, "no errors in batch of {}", self.errors.len()),
            Some(first) if failed.len() == 1 => {
                write!(f, "{} (1 of {} failed)", first, self.errors.len())
            }
            Some(first) => write!(
                f,
                "{} (and {} other errors, {} of {} failed)",
                first,
                failed.len() - 1,
                failed.len(),
                self.errors.len()
            ),
        }
    }
}

impl std::error::Error for MultiError {}

/// True if `err` reports index `index` as not found.
///
/// A non-multi not-found error counts for index 0, matching single-entity calls.
pub fn is_not_found_at(err: &KeelError, index: usize) -> bool {
    match err {
        KeelError::Multi(m) => m.is_not_found(index),
        KeelError::NotFound { .. } => index == 0,
        _ => false,
    }
}

// =============================================================================
// TESTS
// =============================================================================
