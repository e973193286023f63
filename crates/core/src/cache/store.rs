//! Disk-backed entry storage.
//!
//! Provides the read, write, metadata and deletion operations of
//! [`CacheStore`]. Size accounting and eviction live in
//! [`super::eviction`], background writes in [`super::queue`].

use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Serialize, de::DeserializeOwned};

use super::codec::{Codec, Json};
use super::eviction::SizeLimitSource;
use super::layout::{Layout, normalize};
use crate::Error;
use crate::config::StoreConfig;

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Handle to a cache directory.
///
/// Cheap to clone; clones share configuration and size-limit source.
///
/// Concurrent writers to the same key are not serialized: each write lands
/// through its own temp file and the last rename wins.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<Inner>,
}

struct Inner {
    layout: Layout,
    config: StoreConfig,
    limit: Box<dyn SizeLimitSource>,
}

/// An owned file found while scanning the cache.
#[derive(Debug, Clone)]
pub(crate) struct OwnedFile {
    pub path: PathBuf,
    pub len: u64,
    pub modified: SystemTime,
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("root", &self.inner.layout.root())
            .field("prefix", &self.inner.layout.prefix())
            .field("size_limit", &self.inner.limit.size_limit())
            .finish()
    }
}

impl CacheStore {
    /// Create a store using the size limit from `config`.
    ///
    /// Does not touch the filesystem; directories are created on first write.
    pub fn new(config: StoreConfig) -> Result<Self, Error> {
        let limit = config.size_limit_bytes;
        Self::with_limit_source(config, limit)
    }

    /// Create a store with default configuration rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        Self::new(StoreConfig::with_root(root))
    }

    /// Create a store whose size budget is read from `limit` before every
    /// eviction pass.
    pub fn with_limit_source(config: StoreConfig, limit: impl SizeLimitSource + 'static) -> Result<Self, Error> {
        config.validate().map_err(|e| Error::InvalidInput(e.to_string()))?;

        let root = std::path::absolute(&config.root_path).unwrap_or_else(|_| config.root_path.clone());
        let layout = Layout::new(root, config.key_prefix.clone());

        Ok(Self { inner: Arc::new(Inner { layout, config, limit: Box::new(limit) }) })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn root(&self) -> &Path {
        self.inner.layout.root()
    }

    pub fn prefix(&self) -> &str {
        self.inner.layout.prefix()
    }

    /// Whether this store and `other` would claim each other's files.
    pub fn overlaps(&self, other: &CacheStore) -> bool {
        self.inner.layout.overlaps(&other.inner.layout)
    }

    /// Current size budget, `None` when eviction is disabled.
    pub fn size_limit(&self) -> Option<u64> {
        self.inner.limit.size_limit()
    }

    /// Key derived from a string with this store's digest.
    pub fn hash(&self, input: &str) -> String {
        self.inner.config.digest.hash(input)
    }

    /// Key derived from a serializable value with this store's digest.
    pub fn hash_value<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, Error> {
        self.inner.config.digest.hash_value(value)
    }

    /// Path an entry would occupy. Does not imply the file exists.
    pub fn path_for(&self, namespace: Option<&str>, key: &str) -> PathBuf {
        self.inner.layout.path_for(namespace, key)
    }

    /// Store `payload` under `key`, replacing any previous entry.
    ///
    /// The eviction pass runs afterwards whether or not the write succeeded.
    pub fn put(&self, namespace: Option<&str>, key: &str, payload: &[u8]) -> Result<(), Error> {
        let result = self.write_payload(namespace, key, payload);
        self.finish_write(namespace, key, result)
    }

    /// Serialize `value` with serde_json and store it.
    pub fn put_value<T: Serialize + ?Sized>(&self, namespace: Option<&str>, key: &str, value: &T) -> Result<(), Error> {
        let result = serde_json::to_vec(value)
            .map_err(Error::from)
            .and_then(|payload| self.write_payload(namespace, key, &payload));
        self.finish_write(namespace, key, result)
    }

    /// Encode `value` with `codec` and store it.
    pub fn put_with<C: Codec>(
        &self, namespace: Option<&str>, key: &str, value: &C::Value, codec: &C,
    ) -> Result<(), Error> {
        let result = codec
            .encode(value)
            .and_then(|payload| self.write_payload(namespace, key, &payload));
        self.finish_write(namespace, key, result)
    }

    fn finish_write(&self, namespace: Option<&str>, key: &str, result: Result<(), Error>) -> Result<(), Error> {
        if let Err(e) = &result {
            tracing::warn!(namespace = namespace.unwrap_or_default(), key, error = %e, "cache write failed");
        }
        self.enforce_limit();
        result
    }

    fn write_payload(&self, namespace: Option<&str>, key: &str, payload: &[u8]) -> Result<(), Error> {
        let path = self.inner.layout.checked_path(namespace, key)?;
        let dir = self.inner.layout.dir_for(namespace);
        fs::create_dir_all(&dir).map_err(|e| Error::io("create_dir", &dir, e))?;

        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = dir.join(self.inner.layout.temp_name(seq));

        let written = File::create(&tmp).and_then(|mut file| {
            file.write_all(payload)?;
            file.sync_all()
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(Error::io("write", &tmp, e));
        }

        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(Error::io("rename", &path, e));
        }

        tracing::debug!(path = %path.display(), bytes = payload.len(), "cache entry written");
        Ok(())
    }

    /// Read the raw payload of an entry.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no entry exists
    /// - `ResourceExhausted` if the payload exceeds `max_read_bytes` or
    ///   cannot be buffered
    /// - `Io` for any other filesystem failure
    pub fn get(&self, namespace: Option<&str>, key: &str) -> Result<Vec<u8>, Error> {
        let (mut file, path) = self.open_entry(namespace, key)?;

        let len = file.metadata().map_err(|e| Error::io("stat", &path, e))?.len();
        let budget = self.inner.config.max_read_bytes;
        if len > budget {
            tracing::warn!(path = %path.display(), bytes = len, budget, "cache entry exceeds read budget");
            return Err(Error::ResourceExhausted(format!("{} is {len} bytes, read budget is {budget}", path.display())));
        }

        let mut buf = Vec::new();
        usize::try_from(len)
            .ok()
            .and_then(|len| buf.try_reserve_exact(len).ok())
            .ok_or_else(|| {
                tracing::warn!(path = %path.display(), bytes = len, "could not allocate buffer for cache entry");
                Error::ResourceExhausted(format!("cannot buffer {len} bytes for {}", path.display()))
            })?;

        file.read_to_end(&mut buf).map_err(|e| Error::io("read", &path, e))?;
        Ok(buf)
    }

    /// Read an entry and decode it with `codec`.
    ///
    /// Any decode failure is reported as `Corrupt`.
    pub fn get_with<C: Codec>(&self, namespace: Option<&str>, key: &str, codec: &C) -> Result<C::Value, Error> {
        let bytes = self.get(namespace, key)?;
        codec.decode(bytes).inspect_err(|e| {
            tracing::warn!(namespace = namespace.unwrap_or_default(), key, error = %e, "cache entry failed to decode");
        })
    }

    /// Read an entry stored with [`CacheStore::put_value`].
    pub fn get_value<T: Serialize + DeserializeOwned>(&self, namespace: Option<&str>, key: &str) -> Result<T, Error> {
        self.get_with(namespace, key, &Json::<T>::new())
    }

    /// Open an entry for streaming reads.
    pub fn reader(&self, namespace: Option<&str>, key: &str) -> Result<BufReader<File>, Error> {
        self.open_entry(namespace, key).map(|(file, _)| BufReader::new(file))
    }

    fn open_entry(&self, namespace: Option<&str>, key: &str) -> Result<(File, PathBuf), Error> {
        let path = self.inner.layout.checked_path(namespace, key)?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(entry_label(namespace, key)));
            }
            Err(e) => return Err(Error::io("open", &path, e)),
        };

        // A namespace directory shares its name with the root-level key.
        let meta = file.metadata().map_err(|e| Error::io("stat", &path, e))?;
        if !meta.is_file() {
            return Err(Error::NotFound(entry_label(namespace, key)));
        }
        Ok((file, path))
    }

    pub fn exists(&self, namespace: Option<&str>, key: &str) -> bool {
        self.inner
            .layout
            .checked_path(namespace, key)
            .is_ok_and(|path| path.is_file())
    }

    /// Last modification time, `None` if the entry is absent.
    pub fn modified_at(&self, namespace: Option<&str>, key: &str) -> Option<DateTime<Utc>> {
        let path = self.inner.layout.checked_path(namespace, key).ok()?;
        let meta = fs::metadata(path).ok().filter(fs::Metadata::is_file)?;
        let modified = meta.modified().ok()?;
        Some(DateTime::<Utc>::from(modified))
    }

    /// Time since the entry was last modified, `None` if absent.
    pub fn age(&self, namespace: Option<&str>, key: &str) -> Option<TimeDelta> {
        self.modified_at(namespace, key)
            .map(|modified| (Utc::now() - modified).abs())
    }

    /// Whether the entry was last modified at or before `date`.
    ///
    /// Absent entries count as older than any date.
    pub fn is_older_than(&self, namespace: Option<&str>, key: &str, date: DateTime<Utc>) -> bool {
        self.modified_at(namespace, key)
            .is_none_or(|modified| modified <= date)
    }

    /// Absolute paths of the entries directly inside `namespace` (or the root).
    ///
    /// Order is whatever the filesystem yields.
    pub fn list(&self, namespace: Option<&str>) -> Vec<PathBuf> {
        if normalize(namespace).is_some() && self.inner.layout.checked_path(namespace, "_").is_err() {
            return Vec::new();
        }

        let dir = self.inner.layout.dir_for(namespace);
        let Ok(entries) = fs::read_dir(&dir) else {
            return Vec::new();
        };

        entries
            .flatten()
            .filter(|entry| entry.file_type().is_ok_and(|ty| ty.is_file()))
            .filter(|entry| entry.file_name().to_str().is_some_and(|name| self.inner.layout.owns(name)))
            .map(|entry| entry.path())
            .collect()
    }

    /// Remove one entry. Returns true iff a file was removed.
    pub fn delete(&self, namespace: Option<&str>, key: &str) -> bool {
        let Ok(path) = self.inner.layout.checked_path(namespace, key) else {
            return false;
        };
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "cache entry deleted");
                true
            }
            Err(_) => false,
        }
    }

    /// Remove every owned file in `namespace`, then the namespace directory.
    ///
    /// Directory removal is attempted even if some files could not be
    /// deleted. Returns true only if everything was removed.
    pub fn delete_namespace(&self, namespace: &str) -> bool {
        if namespace.is_empty() || self.inner.layout.checked_path(Some(namespace), "_").is_err() {
            return false;
        }

        let dir = self.inner.layout.dir_for(Some(namespace));
        let Ok(entries) = fs::read_dir(&dir) else {
            return false;
        };

        let mut all_removed = true;
        for entry in entries.flatten() {
            let owned = entry
                .file_name()
                .to_str()
                .is_some_and(|name| self.inner.layout.owns(name) || self.inner.layout.is_temp(name));
            if !owned {
                all_removed = false;
                continue;
            }
            if let Err(e) = fs::remove_file(entry.path()) {
                tracing::warn!(path = %entry.path().display(), error = %e, "failed to delete namespaced entry");
                all_removed = false;
            }
        }

        match fs::remove_dir(&dir) {
            Ok(()) => {
                tracing::debug!(namespace, "cache namespace deleted");
                all_removed
            }
            Err(e) => {
                tracing::warn!(path = %dir.display(), error = %e, "failed to delete namespace directory");
                false
            }
        }
    }

    /// Remove every owned entry.
    ///
    /// With `scan_namespaces` enabled, namespace directories are emptied and
    /// removed too; otherwise only root-level entries are touched. Failures
    /// are logged and skipped. Returns the number of files removed.
    pub fn clear(&self) -> usize {
        let root = self.root();
        let Ok(entries) = fs::read_dir(root) else {
            return 0;
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if self.inner.layout.is_temp(&name) {
                remove_stale_temp(&entry.path());
                continue;
            }
            if !self.inner.layout.owns(&name) {
                continue;
            }
            let Ok(ty) = entry.file_type() else {
                continue;
            };

            if ty.is_file() {
                match fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) => tracing::warn!(path = %entry.path().display(), error = %e, "failed to clear entry"),
                }
            } else if ty.is_dir() && self.inner.config.scan_namespaces {
                let namespace = &name[self.prefix().len()..];
                removed += self.list(Some(namespace)).iter().filter(|path| fs::remove_file(path).is_ok()).count();
                self.sweep_temps(&entry.path());
                let _ = fs::remove_dir(entry.path());
            }
        }

        tracing::debug!(removed, "cache cleared");
        removed
    }

    /// Delete temp files abandoned by interrupted writes in `dir`.
    fn sweep_temps(&self, dir: &Path) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            if entry.file_name().to_str().is_some_and(|name| self.inner.layout.is_temp(name)) {
                remove_stale_temp(&entry.path());
            }
        }
    }

    /// Sum of the sizes of all owned files.
    pub fn total_size(&self) -> u64 {
        self.owned_files().iter().map(|file| file.len).sum()
    }

    /// Every owned file at the root and, when enabled, one level down in
    /// owned namespace directories.
    pub(crate) fn owned_files(&self) -> Vec<OwnedFile> {
        let mut files = Vec::new();
        let Ok(entries) = fs::read_dir(self.root()) else {
            return files;
        };

        for entry in entries.flatten() {
            if !entry.file_name().to_str().is_some_and(|name| self.inner.layout.owns(name)) {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if meta.is_file() {
                files.push(owned_file(entry.path(), &meta));
            } else if meta.is_dir() && self.inner.config.scan_namespaces {
                self.collect_dir(&entry.path(), &mut files);
            }
        }

        files
    }

    fn collect_dir(&self, dir: &Path, files: &mut Vec<OwnedFile>) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            if !entry.file_name().to_str().is_some_and(|name| self.inner.layout.owns(name)) {
                continue;
            }
            match entry.metadata() {
                Ok(meta) if meta.is_file() => files.push(owned_file(entry.path(), &meta)),
                _ => {}
            }
        }
    }
}

fn owned_file(path: PathBuf, meta: &fs::Metadata) -> OwnedFile {
    OwnedFile { path, len: meta.len(), modified: meta.modified().unwrap_or(UNIX_EPOCH) }
}

fn remove_stale_temp(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed stale temp file"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove stale temp file"),
    }
}

fn entry_label(namespace: Option<&str>, key: &str) -> String {
    match normalize(namespace) {
        Some(ns) => format!("{ns}/{key}"),
        None => key.to_string(),
    }
}
