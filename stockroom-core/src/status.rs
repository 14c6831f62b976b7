//! Cache status and freshness state.

/// Whether a lookup was served fresh from cache, stale from cache, or not at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheStatus {
    /// Fresh cached data was returned.
    Hit,
    /// No usable cached data; the producer supplied the value.
    #[default]
    Miss,
    /// Cached data past its max-age but inside the revalidate window.
    Stale,
}

impl CacheStatus {
    /// Returns the status as a lowercase string slice, used for metric labels.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
            CacheStatus::Stale => "stale",
        }
    }

    /// Returns the status as sent in the `cache` response header.
    #[inline]
    pub const fn as_header_value(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Stale => "STALE",
        }
    }
}

/// Freshness of a cached entry at the moment it was inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState<Cached> {
    /// Data is stale but not expired (usable, should refresh in background).
    Stale(Cached),
    /// Data is fresh and valid.
    Actual(Cached),
    /// Data has expired (must refresh before use).
    Expired(Cached),
}

impl<Cached> CacheState<Cached> {
    /// Returns the status a caller would report for this state, or `None` when
    /// the entry is expired and must not be served.
    pub fn status(&self) -> Option<CacheStatus> {
        match self {
            CacheState::Actual(_) => Some(CacheStatus::Hit),
            CacheState::Stale(_) => Some(CacheStatus::Stale),
            CacheState::Expired(_) => None,
        }
    }

    /// Consumes the state and returns the wrapped entry.
    pub fn into_inner(self) -> Cached {
        match self {
            CacheState::Actual(c) | CacheState::Stale(c) | CacheState::Expired(c) => c,
        }
    }
}
