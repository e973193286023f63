//! Configuration validation rules.
//!
//! This module provides validation logic for `StoreConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::StoreConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl StoreConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `root_path` is empty
    /// - `key_prefix` is empty, contains a path separator, or starts with `.`
    /// - `max_read_bytes` or `queue_capacity` is 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid { field: "root_path".into(), reason: "must not be empty".into() });
        }

        if self.key_prefix.is_empty() {
            return Err(ConfigError::Invalid { field: "key_prefix".into(), reason: "must not be empty".into() });
        }
        if self.key_prefix.contains(['/', '\\', '\0']) {
            return Err(ConfigError::Invalid {
                field: "key_prefix".into(),
                reason: "must not contain path separators".into(),
            });
        }
        // Temp files written during `put` start with a dot and must never look owned.
        if self.key_prefix.starts_with('.') {
            return Err(ConfigError::Invalid { field: "key_prefix".into(), reason: "must not start with '.'".into() });
        }

        if self.max_read_bytes == 0 {
            return Err(ConfigError::Invalid { field: "max_read_bytes".into(), reason: "must be greater than 0".into() });
        }

        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid { field: "queue_capacity".into(), reason: "must be greater than 0".into() });
        }

        if let Some(limit) = self.size_limit_bytes.filter(|limit| *limit < 0) {
            tracing::warn!(size_limit_bytes = limit, "negative size limit; eviction is disabled");
        }

        Ok(())
    }
}
