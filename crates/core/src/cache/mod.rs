//! Disk-backed cache for opaque payloads.
//!
//! This module provides a flat, prefix-owned file cache. It supports:
//!
//! - Content-addressed keys (MD5 or SHA-256, base64 encoded)
//! - Optional namespaces materialized as sub-directories
//! - Oldest-first eviction against a size budget
//! - Background writes through a single-worker queue

pub mod codec;
pub mod eviction;
pub mod hash;
pub mod layout;
pub mod queue;
pub mod store;

pub use crate::Error;

pub use codec::{Codec, Json, Raw, Text};
pub use eviction::{EvictionReport, SharedLimit, SizeLimitSource};
pub use hash::{KeyDigest, hash, hash_value};
pub use layout::Layout;
pub use queue::{WriteQueue, WriteRequest, WriteTicket};
pub use store::CacheStore;
