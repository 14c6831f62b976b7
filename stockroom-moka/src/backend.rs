//! Moka store implementation.

use async_trait::async_trait;
use moka::future::Cache;
use stockroom_backend::{Backend, BackendResult, DeleteStatus};
use stockroom_core::{BackendLabel, CacheKey, CacheValue, Raw};
use tracing::trace;

use crate::builder::{MokaBackendBuilder, Unbounded};
use crate::metrics;

/// Bounded in-memory cache store powered by Moka.
///
/// Entries are evicted when capacity is exceeded, and dropped once their
/// expire time (`max-age + stale-while-revalidate`) passes. Stale entries
/// stay readable until then so that a `RequestCache` can serve them while
/// it refreshes.
///
/// ```
/// use stockroom_moka::MokaBackend;
///
/// let backend = MokaBackend::builder().max_entries(10_000).build();
/// ```
///
/// Expiration is best-effort: an expired entry may remain readable until
/// Moka's housekeeping runs. A `RequestCache` checks the timestamps itself
/// and never serves such an entry.
#[derive(Clone)]
pub struct MokaBackend {
    pub(crate) cache: Cache<CacheKey, CacheValue<Raw>>,
    pub(crate) label: BackendLabel,
}

impl std::fmt::Debug for MokaBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaBackend")
            .field("label", &self.label)
            .field("cache", &self.cache)
            .finish()
    }
}

impl MokaBackend {
    /// Creates a new builder. Capacity must be set before building.
    pub fn builder() -> MokaBackendBuilder<Unbounded> {
        MokaBackendBuilder::new()
    }

    /// The underlying Moka cache.
    pub fn cache(&self) -> &Cache<CacheKey, CacheValue<Raw>> {
        &self.cache
    }

    fn publish_usage(&self) {
        metrics::record_usage(
            self.label.as_str(),
            self.cache.entry_count(),
            self.cache.weighted_size(),
        );
    }
}

#[async_trait]
impl Backend for MokaBackend {
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<CacheValue<Raw>>> {
        Ok(self.cache.get(key).await)
    }

    async fn write(&self, key: &CacheKey, value: CacheValue<Raw>) -> BackendResult<()> {
        trace!(%key, label = %self.label, "storing entry");
        self.cache.insert(key.clone(), value).await;
        self.publish_usage();
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
        let status = match self.cache.remove(key).await {
            Some(_) => DeleteStatus::Deleted(1),
            None => DeleteStatus::Missing,
        };
        self.publish_usage();
        Ok(status)
    }

    fn label(&self) -> BackendLabel {
        self.label.clone()
    }
}
