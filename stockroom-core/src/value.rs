//! Stored entries and their freshness.
//!
//! Every entry written through a strategy carries two instants. Until the
//! stale instant (`max-age` after the write) it is fresh. From then until
//! the expire instant (`stale-while-revalidate` later still) it may be
//! served while a refresh runs. After that it is dead.
//!
//! ```
//! use stockroom_core::{CacheState, CacheStrategy, CacheValue};
//!
//! let value = CacheValue::from_strategy("menu", &CacheStrategy::LONG);
//! assert!(matches!(value.cache_state(), CacheState::Actual(_)));
//! ```

use std::mem::size_of;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::Raw;
use crate::status::CacheState;
use crate::strategy::CacheStrategy;

/// Data plus the instants at which it turns stale and expires.
///
/// Values are immutable; a refresh writes a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheValue<T> {
    data: T,
    stale: Option<DateTime<Utc>>,
    expire: Option<DateTime<Utc>>,
    strategy: Option<CacheStrategy>,
}

impl<T> CacheValue<T> {
    /// Wraps `data` with explicit instants. `None` means never.
    pub fn new(data: T, expire: Option<DateTime<Utc>>, stale: Option<DateTime<Utc>>) -> Self {
        CacheValue {
            data,
            stale,
            expire,
            strategy: None,
        }
    }

    /// Wraps `data` written now under `strategy`.
    pub fn from_strategy(data: T, strategy: &CacheStrategy) -> Self {
        Self::from_strategy_at(data, strategy, Utc::now())
    }

    /// Wraps `data` written at `written` under `strategy`: stale at
    /// `written + max-age`, expired `stale-while-revalidate` after that.
    pub fn from_strategy_at(data: T, strategy: &CacheStrategy, written: DateTime<Utc>) -> Self {
        // Saturates instead of overflowing for absurd lifetimes.
        let after = |from: DateTime<Utc>, secs: u64| {
            i64::try_from(secs)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .and_then(|delta| from.checked_add_signed(delta))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        };
        let stale = after(written, strategy.max_age_secs());
        let expire = after(stale, strategy.stale_while_revalidate_secs());
        CacheValue {
            data,
            stale: Some(stale),
            expire: Some(expire),
            strategy: Some(strategy.clone()),
        }
    }

    /// The stored data.
    #[inline]
    pub fn data(&self) -> &T {
        &self.data
    }

    /// When the entry stops being servable.
    #[inline]
    pub fn expire(&self) -> Option<DateTime<Utc>> {
        self.expire
    }

    /// When the entry needs a refresh.
    #[inline]
    pub fn stale(&self) -> Option<DateTime<Utc>> {
        self.stale
    }

    /// Strategy the entry was written under, when built from one.
    #[inline]
    pub fn strategy(&self) -> Option<&CacheStrategy> {
        self.strategy.as_ref()
    }

    /// Drops the timestamps.
    pub fn into_inner(self) -> T {
        self.data
    }

    /// Converts the data, keeping the timestamps.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheValue<U> {
        CacheValue {
            data: f(self.data),
            stale: self.stale,
            expire: self.expire,
            strategy: self.strategy,
        }
    }

    /// Time left before expiry. `None` when there is no expire instant or
    /// it has passed.
    pub fn ttl(&self) -> Option<Duration> {
        let left = self.expire?.signed_duration_since(Utc::now());
        left.to_std().ok().filter(|d| !d.is_zero())
    }

    /// Classifies the entry against the current time.
    pub fn cache_state(self) -> CacheState<Self> {
        self.cache_state_at(Utc::now())
    }

    /// Classifies the entry against `now`. Both boundaries are inclusive:
    /// an entry is stale at its stale instant and expired at its expire
    /// instant.
    pub fn cache_state_at(self, now: DateTime<Utc>) -> CacheState<Self> {
        let reached = |at: Option<DateTime<Utc>>| at.is_some_and(|at| at <= now);
        if reached(self.expire) {
            CacheState::Expired(self)
        } else if reached(self.stale) {
            CacheState::Stale(self)
        } else {
            CacheState::Actual(self)
        }
    }
}

impl CacheValue<Raw> {
    /// Rough footprint in bytes: the struct and the serialized payload.
    pub fn memory_size(&self) -> usize {
        size_of::<Self>() + self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CacheOptions;

    fn strategy(max_age: i64, swr: i64) -> CacheStrategy {
        CacheStrategy::custom(CacheOptions {
            max_age: Some(max_age),
            stale_while_revalidate: Some(swr),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn state_follows_strategy_windows() {
        let start = Utc::now();
        let value = CacheValue::from_strategy_at(1u8, &strategy(10, 20), start);

        let at = |secs| start + chrono::Duration::seconds(secs);
        assert!(matches!(value.clone().cache_state_at(at(5)), CacheState::Actual(_)));
        assert!(matches!(value.clone().cache_state_at(at(10)), CacheState::Stale(_)));
        assert!(matches!(value.clone().cache_state_at(at(29)), CacheState::Stale(_)));
        assert!(matches!(value.cache_state_at(at(30)), CacheState::Expired(_)));
    }

    #[test]
    fn zero_max_age_is_stale_immediately() {
        let start = Utc::now();
        let value = CacheValue::from_strategy_at("x", &strategy(0, 5), start);
        assert!(matches!(value.cache_state_at(start), CacheState::Stale(_)));
    }

    #[test]
    fn no_timestamps_is_always_actual() {
        let value = CacheValue::new("x", None, None);
        assert!(value.ttl().is_none());
        assert!(matches!(value.cache_state(), CacheState::Actual(_)));
    }

    #[test]
    fn strategy_is_recorded() {
        let s = strategy(3, 0);
        let value = CacheValue::from_strategy("x", &s);
        assert_eq!(value.strategy(), Some(&s));
        assert_eq!(value.map(|d| d.len()).into_inner(), 1);
    }
}
