//! Size-bounded eviction.
//!
//! After every write the store compares its total size against the budget
//! reported by its [`SizeLimitSource`] and deletes owned files, oldest
//! modification time first, until it fits again. Files with equal
//! modification times are evicted in path order.
//!
//! The budget is a soft bound: concurrent writers may push the total over
//! it until the next pass.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use super::store::{CacheStore, OwnedFile};

const DISABLED: i64 = -1;

/// Supplies the size budget, in bytes, consulted before each eviction pass.
pub trait SizeLimitSource: Send + Sync {
    /// `None` disables eviction.
    fn size_limit(&self) -> Option<u64>;
}

/// A configured byte count; negative or `None` disables eviction.
impl SizeLimitSource for Option<i64> {
    fn size_limit(&self) -> Option<u64> {
        self.and_then(|limit| u64::try_from(limit).ok())
    }
}

impl SizeLimitSource for u64 {
    fn size_limit(&self) -> Option<u64> {
        Some(*self)
    }
}

/// A budget that can be changed while stores are using it.
///
/// Clones share the same value.
#[derive(Clone)]
pub struct SharedLimit(Arc<AtomicI64>);

impl SharedLimit {
    pub fn new(limit: Option<u64>) -> Self {
        let shared = Self(Arc::new(AtomicI64::new(DISABLED)));
        shared.set(limit);
        shared
    }

    /// Budget expressed in megabytes; negative disables eviction.
    pub fn from_megabytes(megabytes: i64) -> Self {
        let shared = Self(Arc::new(AtomicI64::new(DISABLED)));
        shared.set_megabytes(megabytes);
        shared
    }

    pub fn set(&self, limit: Option<u64>) {
        let raw = limit.map_or(DISABLED, |bytes| i64::try_from(bytes).unwrap_or(i64::MAX));
        self.0.store(raw, Ordering::Relaxed);
    }

    pub fn set_megabytes(&self, megabytes: i64) {
        let raw = if megabytes < 0 { DISABLED } else { megabytes.saturating_mul(1024 * 1024) };
        self.0.store(raw, Ordering::Relaxed);
    }
}

impl SizeLimitSource for SharedLimit {
    fn size_limit(&self) -> Option<u64> {
        u64::try_from(self.0.load(Ordering::Relaxed)).ok()
    }
}

impl fmt::Debug for SharedLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedLimit").field(&self.size_limit()).finish()
    }
}

/// Outcome of one eviction pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionReport {
    pub limit: u64,
    pub total_before: u64,
    pub total_after: u64,
    /// Paths removed, in eviction order.
    pub evicted: Vec<PathBuf>,
    /// Candidates that could not be deleted.
    pub failed: usize,
}

impl EvictionReport {
    pub fn within_limit(&self) -> bool {
        self.total_after <= self.limit
    }
}

impl CacheStore {
    /// Evict the oldest owned files until the cache fits its budget.
    ///
    /// Returns `None` when no budget is configured. Deletion failures are
    /// logged and skipped.
    pub fn enforce_limit(&self) -> Option<EvictionReport> {
        let limit = self.size_limit()?;

        let files = self.owned_files();
        let report = evict_until_within(files, limit);

        tracing::debug!(
            limit,
            total_before = report.total_before,
            total_after = report.total_after,
            evicted = report.evicted.len(),
            "cache eviction pass"
        );
        if !report.within_limit() {
            tracing::warn!(limit, total = report.total_after, "cache still over size limit after eviction");
        }

        Some(report)
    }
}

/// Delete `files` in eviction order until their remaining total fits `limit`.
///
/// A file that cannot be deleted is skipped and still counts toward the total.
pub(crate) fn evict_until_within(files: Vec<OwnedFile>, limit: u64) -> EvictionReport {
    let total: u64 = files.iter().map(|file| file.len).sum();
    let mut report = EvictionReport { limit, total_before: total, total_after: total, evicted: Vec::new(), failed: 0 };

    for file in eviction_order(files) {
        if report.total_after <= limit {
            break;
        }
        match fs::remove_file(&file.path) {
            Ok(()) => {
                report.total_after = report.total_after.saturating_sub(file.len);
                report.evicted.push(file.path);
            }
            Err(e) => {
                tracing::warn!(path = %file.path.display(), error = %e, "failed to evict cache entry");
                report.failed += 1;
            }
        }
    }
    report
}

/// Oldest modification time first, ties broken by path.
pub(crate) fn eviction_order(mut files: Vec<OwnedFile>) -> Vec<OwnedFile> {
    files.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
    files
}
