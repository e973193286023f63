//! Core types and shared functionality for filecache.
//!
//! This crate provides:
//! - A prefix-owned disk cache with size-bounded eviction
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;

pub use cache::{CacheStore, WriteQueue, WriteRequest};
pub use config::StoreConfig;
pub use error::Error;
