//! Tagcache Storage Layer
//!
//! This crate defines the contract a cache backend fulfils, together with
//! the inverted tag index, an in-memory backend and a recording decorator
//! for tests.

pub mod backend;
pub mod error;
pub mod index;
pub mod memory;
pub mod recording;

pub use backend::{
    Backend, Capabilities, CleaningMode, Directives, Metadata, ParseCleaningModeError,
};
pub use error::StorageError;
pub use index::TagIndex;
pub use memory::{Clock, MemoryBackend};
pub use recording::{Call, Journal, RecordingBackend};
