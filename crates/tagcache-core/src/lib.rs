//! Tagcache Core
//!
//! This crate provides the cache core for tagcache: option handling,
//! id and tag validation, the save/load/clean pipeline on top of a
//! storage backend, and the page frontend.

pub mod cache;
pub mod error;
pub mod frontend;
pub mod logger;
pub mod options;
pub mod validate;

pub use cache::{Core, DEFAULT_PRIORITY, Lifetime, MAX_PRIORITY};
pub use error::CacheError;
pub use frontend::{CachedPage, PageCache, PageCapture, PageRequest, PageRule, PageStart};
pub use logger::{CacheLogger, TracingLogger};
pub use options::CoreOptions;
pub use validate::{RESERVED_ID_PREFIX, is_identifier, validate_id_or_tag, validate_tags};
