//! Configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, KeelError, KeelResult};

/// Tuning for batch limits and cache-tier behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeelConfig {
    /// Maximum keys per store get call.
    pub get_batch_limit: usize,
    /// Maximum entities per store put call.
    pub put_batch_limit: usize,
    /// Maximum keys per store delete call.
    pub delete_batch_limit: usize,
    pub remote_get_timeout: Duration,
    pub remote_put_timeout_small: Duration,
    pub remote_put_timeout_large: Duration,
    /// Batch payload size above which the large put timeout applies.
    pub remote_put_large_threshold: usize,
    /// Serialized entities above this size are never written to the remote tier.
    pub remote_max_item_bytes: usize,
    /// Prepended to every canonical key in the remote tier.
    pub remote_key_prefix: String,
    /// Per-call bound on store operations.
    pub store_timeout: Duration,
    pub local_cache_enabled: bool,
    pub remote_cache_enabled: bool,
}

impl Default for KeelConfig {
    fn default() -> Self {
        Self {
            get_batch_limit: 1000,
            put_batch_limit: 500,
            delete_batch_limit: 500,
            remote_get_timeout: Duration::from_millis(31),
            remote_put_timeout_small: Duration::from_millis(5),
            remote_put_timeout_large: Duration::from_millis(15),
            remote_put_large_threshold: 50 * 1024,
            remote_max_item_bytes: 1024 * 1024,
            remote_key_prefix: "k:".to_string(),
            store_timeout: Duration::from_secs(30),
            local_cache_enabled: true,
            remote_cache_enabled: true,
        }
    }
}

impl KeelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the get, put and delete chunk sizes.
    pub fn with_batch_limits(mut self, get: usize, put: usize, delete: usize) -> Self {
        self.get_batch_limit = get;
        self.put_batch_limit = put;
        self.delete_batch_limit = delete;
        self
    }

    pub fn with_remote_get_timeout(mut self, timeout: Duration) -> Self {
        self.remote_get_timeout = timeout;
        self
    }

    /// Set the small and large remote put timeouts.
    pub fn with_remote_put_timeouts(mut self, small: Duration, large: Duration) -> Self {
        self.remote_put_timeout_small = small;
        self.remote_put_timeout_large = large;
        self
    }

    pub fn with_remote_max_item_bytes(mut self, max: usize) -> Self {
        self.remote_max_item_bytes = max;
        self
    }

    pub fn with_remote_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.remote_key_prefix = prefix.into();
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Enable or disable the process-local tier.
    pub fn with_local_cache(mut self, enabled: bool) -> Self {
        self.local_cache_enabled = enabled;
        self
    }

    /// Enable or disable the remote tier.
    pub fn with_remote_cache(mut self, enabled: bool) -> Self {
        self.remote_cache_enabled = enabled;
        self
    }

    /// Large-put timeout applies when `payload_bytes` exceeds the threshold.
    pub fn remote_put_timeout(&self, payload_bytes: usize) -> Duration {
        if payload_bytes > self.remote_put_large_threshold {
            self.remote_put_timeout_large
        } else {
            self.remote_put_timeout_small
        }
    }

    pub fn validate(&self) -> KeelResult<()> {
        for (field, value) in [
            ("get_batch_limit", self.get_batch_limit),
            ("put_batch_limit", self.put_batch_limit),
            ("delete_batch_limit", self.delete_batch_limit),
            ("remote_max_item_bytes", self.remote_max_item_bytes),
        ] {
            if value == 0 {
                return Err(invalid(field, value.to_string(), "must be greater than 0"));
            }
        }

        for (field, value) in [
            ("remote_get_timeout", self.remote_get_timeout),
            ("remote_put_timeout_small", self.remote_put_timeout_small),
            ("remote_put_timeout_large", self.remote_put_timeout_large),
            ("store_timeout", self.store_timeout),
        ] {
            if value.is_zero() {
                return Err(invalid(field, format!("{:?}", value), "must be positive"));
            }
        }

        if self.remote_put_timeout_large < self.remote_put_timeout_small {
            return Err(invalid(
                "remote_put_timeout_large",
                format!("{:?}", self.remote_put_timeout_large),
                "must not be shorter than remote_put_timeout_small",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, value: String, reason: &str) -> KeelError {
    KeelError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value,
        reason: format!("{field} {reason}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = KeelConfig::default();
        assert_eq!(config.get_batch_limit, 1000);
        assert_eq!(config.put_batch_limit, 500);
        assert_eq!(config.delete_batch_limit, 500);
        assert_eq!(config.remote_get_timeout, Duration::from_millis(31));
        assert_eq!(config.remote_put_large_threshold, 51_200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_put_timeout_size_class() {
        let config = KeelConfig::default();
        assert_eq!(config.remote_put_timeout(100), Duration::from_millis(5));
        assert_eq!(config.remote_put_timeout(51_200), Duration::from_millis(5));
        assert_eq!(config.remote_put_timeout(51_201), Duration::from_millis(15));
    }

    #[test]
    fn test_validate_rejects_zero_limit() {
        let config = KeelConfig::new().with_batch_limits(0, 500, 500);
        match config.validate() {
            Err(KeelError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, "get_batch_limit")
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_inverted_timeouts() {
        let config = KeelConfig::new()
            .with_remote_put_timeouts(Duration::from_millis(20), Duration::from_millis(10));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = KeelConfig::new()
            .with_remote_key_prefix("test:")
            .with_local_cache(false);
        let json = serde_json::to_string(&config).unwrap();
        let back: KeelConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
