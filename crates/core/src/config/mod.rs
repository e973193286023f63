//! Store configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (FILECACHE_*)
//! 2. TOML config file (if FILECACHE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::cache::hash::KeyDigest;

mod validation;

pub use validation::ConfigError;

/// Configuration for a single cache store instance.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (FILECACHE_*)
/// 2. TOML file from FILECACHE_CONFIG_FILE (if set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base directory for every cache file.
    ///
    /// Set via FILECACHE_ROOT_PATH environment variable.
    #[serde(default = "default_root_path")]
    pub root_path: PathBuf,

    /// Prefix marking files and namespace directories as owned by the store.
    ///
    /// Ownership is a plain prefix match. Two stores sharing a root must not
    /// use prefixes where one starts with the other (`cache_` and
    /// `cache_img_`): the shorter one would size, evict and clear the
    /// other's files. See `CacheStore::overlaps`.
    ///
    /// Set via FILECACHE_KEY_PREFIX environment variable.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Size budget in bytes. Unset or negative disables eviction.
    ///
    /// Set via FILECACHE_SIZE_LIMIT_BYTES environment variable.
    #[serde(default)]
    pub size_limit_bytes: Option<i64>,

    /// Whether sizing, eviction and clear descend into namespace directories.
    ///
    /// Set via FILECACHE_SCAN_NAMESPACES environment variable.
    #[serde(default = "default_true")]
    pub scan_namespaces: bool,

    /// Digest used to derive content-addressed keys.
    ///
    /// Set via FILECACHE_DIGEST environment variable (`md5` or `sha256`).
    #[serde(default)]
    pub digest: KeyDigest,

    /// Largest payload a read will load into memory.
    ///
    /// Set via FILECACHE_MAX_READ_BYTES environment variable.
    #[serde(default = "default_max_read_bytes")]
    pub max_read_bytes: u64,

    /// Number of writes the background queue buffers before `submit` blocks.
    ///
    /// Set via FILECACHE_QUEUE_CAPACITY environment variable.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_root_path() -> PathBuf {
    PathBuf::from("./filecache")
}

fn default_key_prefix() -> String {
    "cache_".into()
}

fn default_true() -> bool {
    true
}

fn default_max_read_bytes() -> u64 {
    64 * 1024 * 1024 // 64MB
}

fn default_queue_capacity() -> usize {
    64
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root_path: default_root_path(),
            key_prefix: default_key_prefix(),
            size_limit_bytes: None,
            scan_namespaces: true,
            digest: KeyDigest::default(),
            max_read_bytes: default_max_read_bytes(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl StoreConfig {
    /// Defaults rooted at `root_path`.
    pub fn with_root(root_path: impl Into<PathBuf>) -> Self {
        Self { root_path: root_path.into(), ..Default::default() }
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `FILECACHE_`
    /// 2. TOML file from `FILECACHE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("FILECACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("FILECACHE_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// The effective eviction budget, `None` when eviction is disabled.
    pub fn size_limit(&self) -> Option<u64> {
        self.size_limit_bytes.and_then(|limit| u64::try_from(limit).ok())
    }
}
