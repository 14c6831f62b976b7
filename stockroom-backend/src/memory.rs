//! Unbounded in-process cache store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use stockroom_core::{BackendLabel, CacheKey, CacheState, CacheStatus, CacheValue, Raw};
use tracing::trace;

use crate::{Backend, BackendResult, DeleteStatus};

/// In-memory cache store for a single process.
///
/// Entries live until their expire time (`max-age + stale-while-revalidate`)
/// passes, at which point the next lookup drops them. There is no capacity
/// bound; use `stockroom-moka` when one is needed.
///
/// Cloning is cheap and clones share the same entries.
///
/// ```
/// use stockroom_backend::InMemoryCache;
///
/// let cache = InMemoryCache::new();
/// assert!(cache.is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryCache {
    store: Arc<DashMap<CacheKey, CacheValue<Raw>>>,
}

impl InMemoryCache {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up `key` and reports whether the entry is fresh or stale.
    ///
    /// Returns `None` for missing entries; expired entries are deleted and
    /// also reported as `None`.
    pub fn match_entry(&self, key: &CacheKey) -> Option<(CacheValue<Raw>, CacheStatus)> {
        self.match_entry_at(key, Utc::now())
    }

    /// [`match_entry`](Self::match_entry) evaluated as of `now`.
    pub fn match_entry_at(
        &self,
        key: &CacheKey,
        now: DateTime<Utc>,
    ) -> Option<(CacheValue<Raw>, CacheStatus)> {
        // Clone out so the shard guard is released before any removal.
        let value = self.store.get(key).map(|entry| entry.value().clone())?;
        match value.cache_state_at(now) {
            CacheState::Actual(value) => Some((value, CacheStatus::Hit)),
            CacheState::Stale(value) => Some((value, CacheStatus::Stale)),
            CacheState::Expired(expired) => {
                trace!(%key, "dropping expired entry");
                // Only remove the entry we inspected, not a fresh replacement.
                self.store.remove_if(key, |_, current| current == &expired);
                None
            }
        }
    }

    /// Returns all keys currently held, expired or not.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.store.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.store.clear();
    }
}

#[async_trait]
impl Backend for InMemoryCache {
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<CacheValue<Raw>>> {
        Ok(self.match_entry(key).map(|(value, _)| value))
    }

    async fn write(&self, key: &CacheKey, value: CacheValue<Raw>) -> BackendResult<()> {
        self.store.insert(key.clone(), value);
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
        Ok(match self.store.remove(key) {
            Some(_) => DeleteStatus::Deleted(1),
            None => DeleteStatus::Missing,
        })
    }

    fn label(&self) -> BackendLabel {
        BackendLabel::new_static("memory")
    }
}
