//! The request cache.

use std::future::Future;
use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use stockroom_backend::{Backend, BackendResult, CacheBackend, DeleteStatus, InMemoryCache};
use stockroom_core::{CacheKey, CacheState, CacheStatus, CacheStrategy, CacheValue, IntoStrategy};
use tracing::{debug, warn};

use crate::config::{ConfigError, RequestCacheConfig};
use crate::error::CacheError;
use crate::flight::{FlightGroup, FlightRole, Joined, SharedFlight, Waiter};
use crate::metrics;
use crate::offload::{OffloadConfig, OffloadKey, OffloadManager};

/// A value returned by [`RequestCache::with_cache`] together with where it
/// came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cached<T> {
    /// The value.
    pub value: T,
    /// `Hit` and `Stale` come from the store, `Miss` from the producer.
    pub status: CacheStatus,
}

impl<T> Cached<T> {
    /// Discards the status.
    pub fn into_inner(self) -> T {
        self.value
    }
}

struct Inner<B> {
    backend: B,
    flights: FlightGroup,
    offload: OffloadManager,
    default_strategy: CacheStrategy,
}

/// Sub-request cache with per-key single-flight.
///
/// Construct one per server (or per test) and share clones of it; clones see
/// the same entries and the same in-flight requests.
///
/// ```no_run
/// use stockroom::{CacheStrategy, RequestCache};
///
/// # async fn run() -> Result<(), stockroom::CacheError<String>> {
/// let cache = RequestCache::new();
/// let title: String = cache
///     .get_or_set("shop-title", CacheStrategy::LONG, || async {
///         Ok::<_, String>("Hydrogen Outfitters".to_string())
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct RequestCache<B = InMemoryCache> {
    inner: Arc<Inner<B>>,
}

impl<B> Clone for RequestCache<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> std::fmt::Debug for RequestCache<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCache")
            .field("backend", &self.inner.backend.label())
            .field("flights", &self.inner.flights)
            .field("default_strategy", &self.inner.default_strategy)
            .finish()
    }
}

impl RequestCache<InMemoryCache> {
    /// Creates a cache over a fresh [`InMemoryCache`].
    pub fn new() -> Self {
        Self::with_backend(InMemoryCache::new())
    }

    /// Starts building a cache.
    pub fn builder() -> RequestCacheBuilder<InMemoryCache> {
        RequestCacheBuilder::new()
    }
}

impl Default for RequestCache<InMemoryCache> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> RequestCache<B>
where
    B: Backend + 'static,
{
    /// Creates a cache over `backend` with default settings.
    pub fn with_backend(backend: B) -> Self {
        RequestCacheBuilder::new().backend(backend).build()
    }

    /// Creates a cache over `backend` configured from `config`.
    pub fn from_config(backend: B, config: &RequestCacheConfig) -> Result<Self, ConfigError> {
        Ok(RequestCacheBuilder::new()
            .backend(backend)
            .default_strategy(config.strategy()?)
            .offload(config.offload())
            .build())
    }

    /// Returns the cached value for `key`, or runs `producer` to make one.
    ///
    /// Only fresh entries are returned; stale and expired ones are refetched.
    /// Concurrent calls for the same key share a single producer run and all
    /// receive its result, including its error. A failed run caches nothing.
    ///
    /// With a `no-store` strategy the store is neither read nor written, but
    /// concurrent calls are still deduplicated.
    ///
    /// The producer runs in its own task: dropping the returned future does
    /// not cancel it, and its result is still stored.
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: impl Into<CacheKey>,
        strategy: impl IntoStrategy,
        producer: F,
    ) -> Result<T, CacheError<E>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let key = key.into();
        let strategy = strategy.into_strategy()?;

        if !strategy.is_no_store()
            && let Some(CacheState::Actual(value)) = self.lookup::<T>(&key).await
        {
            debug!(%key, "cache hit");
            self.record(CacheStatus::Hit);
            return Ok(value.into_inner());
        }

        debug!(%key, "cache miss");
        self.record(CacheStatus::Miss);
        self.fly(key, strategy, producer).await
    }

    /// [`get_or_set`](Self::get_or_set) with the cache's default strategy.
    pub async fn get_or_set_default<T, E, F, Fut>(
        &self,
        key: impl Into<CacheKey>,
        producer: F,
    ) -> Result<T, CacheError<E>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let strategy = self.inner.default_strategy.clone();
        self.get_or_set(key, strategy, producer).await
    }

    /// Stale-while-revalidate lookup.
    ///
    /// A fresh entry is returned as `Hit`. A stale entry still inside its
    /// revalidate window is returned as `Stale` right away while `producer`
    /// refreshes it in the background; refreshes are deduplicated per key
    /// and a failed refresh leaves the stale entry in place. Anything else
    /// goes through the single-flight path of
    /// [`get_or_set`](Self::get_or_set) and is returned as `Miss`.
    pub async fn with_cache<T, E, F, Fut>(
        &self,
        key: impl Into<CacheKey>,
        strategy: impl IntoStrategy,
        producer: F,
    ) -> Result<Cached<T>, CacheError<E>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let key = key.into();
        let strategy = strategy.into_strategy()?;

        if !strategy.is_no_store() {
            match self.lookup::<T>(&key).await {
                Some(CacheState::Actual(value)) => {
                    debug!(%key, "cache hit");
                    self.record(CacheStatus::Hit);
                    return Ok(Cached {
                        value: value.into_inner(),
                        status: CacheStatus::Hit,
                    });
                }
                Some(CacheState::Stale(value)) => {
                    debug!(%key, "serving stale entry, revalidating");
                    self.record(CacheStatus::Stale);
                    self.revalidate(key, strategy, producer);
                    return Ok(Cached {
                        value: value.into_inner(),
                        status: CacheStatus::Stale,
                    });
                }
                Some(CacheState::Expired(_)) | None => {}
            }
        }

        debug!(%key, "cache miss");
        self.record(CacheStatus::Miss);
        let value = self.fly(key, strategy, producer).await?;
        Ok(Cached {
            value,
            status: CacheStatus::Miss,
        })
    }

    /// Removes the entry for `key`. An in-flight request for the key is not
    /// affected and will store its result when it settles.
    pub async fn invalidate(&self, key: impl Into<CacheKey>) -> BackendResult<DeleteStatus> {
        let key = key.into();
        debug!(%key, "invalidating entry");
        self.inner.backend.remove(&key).await
    }

    /// Number of producer runs currently in progress.
    pub fn flights_in_progress(&self) -> usize {
        self.inner.flights.len()
    }

    /// Whether a producer run for `key` is in progress.
    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.inner.flights.contains(key)
    }

    /// The underlying store.
    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// The strategy used by [`get_or_set_default`](Self::get_or_set_default).
    pub fn default_strategy(&self) -> &CacheStrategy {
        &self.inner.default_strategy
    }

    /// The manager running background refreshes.
    pub fn offload(&self) -> &OffloadManager {
        &self.inner.offload
    }

    /// Reads `key`. Store failures and undecodable entries count as absent.
    async fn lookup<T>(&self, key: &CacheKey) -> Option<CacheState<CacheValue<T>>>
    where
        T: DeserializeOwned + Send,
    {
        match self.inner.backend.get::<T>(key).await {
            Ok(value) => value.map(CacheValue::cache_state),
            Err(error) => {
                warn!(%key, backend = %self.inner.backend.label(), %error, "cache read failed");
                None
            }
        }
    }

    /// Joins or starts the producer run for `key` as a foreground waiter.
    fn fly<T, E, F, Fut>(&self, key: CacheKey, strategy: CacheStrategy, producer: F) -> SharedFlight<T, E>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.attach(key, strategy, producer, Waiter::Foreground).flight
    }

    /// Joins or starts the producer run for `key`. The leader stores the
    /// value before the flight settles.
    fn attach<T, E, F, Fut>(
        &self,
        key: CacheKey,
        strategy: CacheStrategy,
        producer: F,
        waiter: Waiter,
    ) -> Joined<T, E>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let flight_key = key.clone();
        let joined = self.inner.flights.join_or_lead_as(&key, waiter, move || async move {
            let value = match producer().await {
                Ok(value) => value,
                Err(error) => {
                    debug!(key = %flight_key, "producer failed, nothing cached");
                    metrics::record_producer_error();
                    return Err(error);
                }
            };
            if !strategy.is_no_store()
                && let Err(error) = inner.backend.set(&flight_key, &value, &strategy).await
            {
                warn!(key = %flight_key, backend = %inner.backend.label(), %error, "cache write failed");
            }
            Ok(value)
        });
        if joined.role == FlightRole::Follower {
            debug!(%key, "joined in-flight request");
        }
        metrics::record_flight(joined.role);
        joined
    }

    /// Refreshes `key` in the background, at most once at a time per key.
    ///
    /// If the refresh task is dropped before the producer settles (a cancel
    /// timeout or [`OffloadManager::cancel_all`]) the producer is aborted,
    /// unless a foreground request has joined it meanwhile.
    fn revalidate<T, E, F, Fut>(&self, key: CacheKey, strategy: CacheStrategy, producer: F)
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let cache = self.clone();
        let offload_key = OffloadKey::Cache(key.clone());
        self.inner.offload.spawn_with_key(offload_key, async move {
            let joined = cache.attach(key.clone(), strategy, producer, Waiter::Background);
            let _cancel = CancelOnDrop {
                flights: cache.inner.flights.clone(),
                key: key.clone(),
                id: joined.id,
            };
            match joined.flight.await {
                Ok(_) => debug!(%key, "revalidated"),
                Err(CacheError::Aborted(reason)) => {
                    warn!(%key, %reason, "revalidation aborted, keeping stale entry")
                }
                Err(_) => warn!(%key, "revalidation failed, keeping stale entry"),
            }
        });
    }

    fn record(&self, status: CacheStatus) {
        metrics::record_status(status, self.inner.backend.label().as_str());
    }
}

/// Cancels a background flight when the refresh awaiting it goes away.
/// After the flight has settled this does nothing.
struct CancelOnDrop {
    flights: FlightGroup,
    key: CacheKey,
    id: u64,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.flights.cancel_background(&self.key, self.id) {
            debug!(key = %self.key, "background refresh dropped, producer aborted");
        }
    }
}

/// Builder for [`RequestCache`].
pub struct RequestCacheBuilder<B> {
    backend: B,
    default_strategy: CacheStrategy,
    offload: OffloadConfig,
}

impl RequestCacheBuilder<InMemoryCache> {
    /// Starts with an [`InMemoryCache`], the [`SHORT`](CacheStrategy::SHORT)
    /// default strategy and default offload settings.
    pub fn new() -> Self {
        Self {
            backend: InMemoryCache::new(),
            default_strategy: CacheStrategy::SHORT,
            offload: OffloadConfig::default(),
        }
    }
}

impl Default for RequestCacheBuilder<InMemoryCache> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> RequestCacheBuilder<B> {
    /// Sets the store.
    pub fn backend<NB: Backend>(self, backend: NB) -> RequestCacheBuilder<NB> {
        RequestCacheBuilder {
            backend,
            default_strategy: self.default_strategy,
            offload: self.offload,
        }
    }

    /// Sets the strategy used by
    /// [`get_or_set_default`](RequestCache::get_or_set_default).
    pub fn default_strategy(self, strategy: CacheStrategy) -> Self {
        Self {
            default_strategy: strategy,
            ..self
        }
    }

    /// Sets how background refreshes run.
    pub fn offload(self, config: OffloadConfig) -> Self {
        Self {
            offload: config,
            ..self
        }
    }

    /// Builds the cache.
    pub fn build(self) -> RequestCache<B>
    where
        B: Backend,
    {
        RequestCache {
            inner: Arc::new(Inner {
                backend: self.backend,
                flights: FlightGroup::new(),
                offload: OffloadManager::new(self.offload),
                default_strategy: self.default_strategy,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn builder_applies_default_strategy() {
        let cache = RequestCache::builder()
            .default_strategy(CacheStrategy::LONG)
            .build();
        assert_eq!(cache.default_strategy(), &CacheStrategy::LONG);

        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let calls = calls.clone();
            let value: u32 = cache
                .get_or_set_default("menu", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(3)
                })
                .await
                .unwrap();
            assert_eq!(value, 3);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn undecodable_entry_is_a_miss() {
        let cache = RequestCache::new();
        let _: String = cache
            .get_or_set("shape", CacheStrategy::LONG, || async {
                Ok::<_, String>("text".to_string())
            })
            .await
            .unwrap();

        let value: u64 = cache
            .get_or_set("shape", CacheStrategy::LONG, || async { Ok::<_, String>(9) })
            .await
            .unwrap();
        assert_eq!(value, 9);
    }
}
