//! Capacity-checked construction of [`MokaBackend`].

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use moka::Expiry;
use moka::future::{Cache, CacheBuilder};
use moka::policy::EvictionPolicy;
use stockroom_core::{BackendLabel, CacheKey, CacheValue, Raw};

use crate::backend::MokaBackend;

type Store = Cache<CacheKey, CacheValue<Raw>>;

/// Drops each entry when its value's expire time passes.
#[derive(Clone, Copy, Debug)]
struct StrategyExpiry;

impl StrategyExpiry {
    fn remaining(expire: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<Duration> {
        let millis = (expire? - now).num_milliseconds().max(0);
        Some(Duration::from_millis(millis as u64))
    }
}

impl Expiry<CacheKey, CacheValue<Raw>> for StrategyExpiry {
    fn expire_after_create(
        &self,
        _: &CacheKey,
        entry: &CacheValue<Raw>,
        _: Instant,
    ) -> Option<Duration> {
        Self::remaining(entry.expire(), Utc::now())
    }

    // Refreshing a key restarts its clock from the new value.
    fn expire_after_update(
        &self,
        _: &CacheKey,
        entry: &CacheValue<Raw>,
        _: Instant,
        _: Option<Duration>,
    ) -> Option<Duration> {
        Self::remaining(entry.expire(), Utc::now())
    }
}

/// How a store is bounded. Implemented by [`Entries`] and [`Bytes`].
pub trait Capacity {
    #[doc(hidden)]
    fn bound(&self) -> u64;

    #[doc(hidden)]
    fn default_policy() -> EvictionPolicy;

    #[doc(hidden)]
    fn weighted(
        builder: CacheBuilder<CacheKey, CacheValue<Raw>, Store>,
    ) -> CacheBuilder<CacheKey, CacheValue<Raw>, Store>;
}

/// No bound chosen yet; `build()` is unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbounded;

/// At most this many entries.
#[derive(Debug, Clone, Copy)]
pub struct Entries(pub(crate) u64);

/// Roughly this many bytes of keys and serialized values.
#[derive(Debug, Clone, Copy)]
pub struct Bytes(pub(crate) u64);

impl Capacity for Entries {
    fn bound(&self) -> u64 {
        self.0
    }

    fn default_policy() -> EvictionPolicy {
        EvictionPolicy::tiny_lfu()
    }

    fn weighted(
        builder: CacheBuilder<CacheKey, CacheValue<Raw>, Store>,
    ) -> CacheBuilder<CacheKey, CacheValue<Raw>, Store> {
        builder
    }
}

impl Capacity for Bytes {
    fn bound(&self) -> u64 {
        self.0
    }

    // TinyLFU admission may turn away large entries that LRU would make room for.
    fn default_policy() -> EvictionPolicy {
        EvictionPolicy::lru()
    }

    fn weighted(
        builder: CacheBuilder<CacheKey, CacheValue<Raw>, Store>,
    ) -> CacheBuilder<CacheKey, CacheValue<Raw>, Store> {
        builder.weigher(|key: &CacheKey, entry: &CacheValue<Raw>| {
            u32::try_from(key.memory_size() + entry.memory_size()).unwrap_or(u32::MAX)
        })
    }
}

/// Configures a [`MokaBackend`].
///
/// Pick a bound with [`max_entries`](Self::max_entries) or
/// [`max_bytes`](Self::max_bytes) first; only then does `build()` exist.
///
/// ```
/// use stockroom_moka::{EvictionPolicy, MokaBackend};
///
/// let backend = MokaBackend::builder()
///     .label("storefront")
///     .max_bytes(64 * 1024 * 1024)
///     .eviction_policy(EvictionPolicy::tiny_lfu())
///     .build();
/// ```
pub struct MokaBackendBuilder<C> {
    bound: C,
    label: BackendLabel,
    policy: Option<EvictionPolicy>,
}

impl MokaBackendBuilder<Unbounded> {
    /// An unbounded builder labelled `"moka"`.
    pub fn new() -> Self {
        MokaBackendBuilder {
            bound: Unbounded,
            label: BackendLabel::new_static("moka"),
            policy: None,
        }
    }

    /// Holds at most `count` entries.
    pub fn max_entries(self, count: u64) -> MokaBackendBuilder<Entries> {
        self.bounded(Entries(count))
    }

    /// Holds roughly `bytes` bytes, weighing each entry by its key and
    /// serialized value.
    pub fn max_bytes(self, bytes: u64) -> MokaBackendBuilder<Bytes> {
        self.bounded(Bytes(bytes))
    }

    fn bounded<C: Capacity>(self, bound: C) -> MokaBackendBuilder<C> {
        MokaBackendBuilder {
            bound,
            label: self.label,
            policy: self.policy,
        }
    }
}

impl Default for MokaBackendBuilder<Unbounded> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> MokaBackendBuilder<C> {
    /// Name used in logs and metric labels.
    pub fn label(mut self, label: impl Into<BackendLabel>) -> Self {
        self.label = label.into();
        self
    }

    /// Overrides the eviction policy. TinyLFU is used for entry bounds and
    /// LRU for byte bounds unless set.
    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

impl<C: Capacity> MokaBackendBuilder<C> {
    /// Creates the store.
    pub fn build(self) -> MokaBackend {
        let policy = self.policy.unwrap_or_else(C::default_policy);
        let builder = Cache::builder()
            .max_capacity(self.bound.bound())
            .name(self.label.as_str());
        let cache = C::weighted(builder)
            .eviction_policy(policy)
            .expire_after(StrategyExpiry)
            .build();

        MokaBackend {
            cache,
            label: self.label,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn remaining_lifetime_tracks_expire_time() {
        let now = Utc::now();
        let remaining = |offset| StrategyExpiry::remaining(Some(now + TimeDelta::seconds(offset)), now);

        assert_eq!(remaining(10), Some(Duration::from_secs(10)));
        assert_eq!(remaining(-1), Some(Duration::ZERO));
        assert_eq!(StrategyExpiry::remaining(None, now), None);
    }

    #[test]
    fn bound_and_label_are_kept() {
        let by_count = MokaBackend::builder().max_entries(5);
        assert_eq!(by_count.bound.bound(), 5);

        let by_size = MokaBackend::builder().label("pages").max_bytes(1024);
        assert_eq!(by_size.bound.bound(), 1024);
        assert_eq!(by_size.label.as_str(), "pages");
    }
}
