//! Error types for cache operations.

use stockroom_core::StrategyError;
use thiserror::Error;

/// Error returned by [`RequestCache`](crate::RequestCache) operations.
///
/// Every caller attached to the same in-flight request receives a clone of
/// the same error, so the type is `Clone` whenever the producer error is.
/// Wrap producer errors that are not `Clone` in an `Arc`.
#[derive(Debug, Clone, Error)]
pub enum CacheError<E> {
    /// The producer failed. The error is passed through unchanged.
    #[error("producer failed: {0}")]
    Producer(E),
    /// The producer panicked or its task was cancelled before settling.
    #[error("producer aborted: {0}")]
    Aborted(String),
    /// The strategy supplied with the call was invalid.
    #[error(transparent)]
    Strategy(#[from] StrategyError),
}

impl<E> CacheError<E> {
    /// Returns the producer error, if that is what this is.
    pub fn producer(&self) -> Option<&E> {
        match self {
            CacheError::Producer(e) => Some(e),
            _ => None,
        }
    }

    /// Consumes the error and returns the producer error, if that is what
    /// this is.
    pub fn into_producer(self) -> Option<E> {
        match self {
            CacheError::Producer(e) => Some(e),
            _ => None,
        }
    }
}
