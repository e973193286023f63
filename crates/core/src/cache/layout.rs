//! On-disk naming for cache entries.
//!
//! ```text
//! <root>/<prefix><key>
//! <root>/<prefix><namespace>/<prefix><key>
//! ```

use std::path::{Path, PathBuf};

use crate::Error;

/// Resolves keys and namespaces to paths beneath a root directory.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
    prefix: String,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self { root: root.into(), prefix: prefix.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether a file or directory name belongs to the store.
    ///
    /// Matching is by prefix, so a store with prefix `cache_` also owns the
    /// files of a store using `cache_img_` in the same root.
    pub fn owns(&self, name: &str) -> bool {
        name.starts_with(&self.prefix)
    }

    /// Whether two layouts would claim each other's files.
    pub fn overlaps(&self, other: &Layout) -> bool {
        self.root == other.root && (self.prefix.starts_with(&other.prefix) || other.prefix.starts_with(&self.prefix))
    }

    /// Name of an in-flight write's temp file. Its length does not depend on the key.
    pub fn temp_name(&self, seq: u64) -> String {
        format!(".{}tmp.{}.{seq}.partial", self.prefix, std::process::id())
    }

    /// Whether `name` is a temp file left by [`Layout::temp_name`].
    pub fn is_temp(&self, name: &str) -> bool {
        name.strip_prefix('.')
            .and_then(|rest| rest.strip_prefix(self.prefix.as_str()))
            .is_some_and(|rest| rest.starts_with("tmp.") && rest.ends_with(".partial"))
    }

    /// Directory holding the entries of `namespace`; the root for `None` or `""`.
    pub fn dir_for(&self, namespace: Option<&str>) -> PathBuf {
        match normalize(namespace) {
            Some(ns) => self.root.join(format!("{}{ns}", self.prefix)),
            None => self.root.clone(),
        }
    }

    /// Deterministic entry path. Does not check the file exists.
    pub fn path_for(&self, namespace: Option<&str>, key: &str) -> PathBuf {
        self.dir_for(namespace).join(format!("{}{key}", self.prefix))
    }

    /// Same as [`Layout::path_for`] after validating both components.
    pub fn checked_path(&self, namespace: Option<&str>, key: &str) -> Result<PathBuf, Error> {
        validate_component("key", key)?;
        if let Some(ns) = normalize(namespace) {
            validate_component("namespace", ns)?;
        }
        Ok(self.path_for(namespace, key))
    }
}

/// Treats an empty namespace as the root.
pub(crate) fn normalize(namespace: Option<&str>) -> Option<&str> {
    namespace.filter(|ns| !ns.is_empty())
}

fn validate_component(what: &str, value: &str) -> Result<(), Error> {
    if value.is_empty() {
        return Err(Error::InvalidInput(format!("{what} must not be empty")));
    }
    if value == "." || value == ".." {
        return Err(Error::InvalidInput(format!("{what} must not be '{value}'")));
    }
    if value.contains(['/', '\\', '\0']) {
        return Err(Error::InvalidInput(format!("{what} '{value}' contains a path separator")));
    }
    Ok(())
}
