//! Storage layer for the stockroom request cache.
//!
//! Implement [`Backend`] to plug a new store into a `RequestCache`. The
//! [`CacheBackend`] extension adds typed reads and writes on top of the raw
//! byte interface.

mod backend;
pub mod format;
mod memory;

pub use backend::{Backend, BackendResult, CacheBackend};
pub use format::{FormatError, JsonFormat};
pub use memory::InMemoryCache;
use thiserror::Error;

/// Failure talking to a store.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The store itself failed.
    #[error("store failure: {0}")]
    Store(Box<dyn std::error::Error + Send + Sync>),
    /// The store could not be reached.
    #[error("store unreachable: {0}")]
    Unreachable(Box<dyn std::error::Error + Send + Sync>),
    /// A value could not be encoded or decoded.
    #[error(transparent)]
    Format(#[from] FormatError),
}

/// Outcome of [`Backend::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStatus {
    /// This many entries were removed.
    Deleted(u32),
    /// Nothing was stored under the key.
    Missing,
}
