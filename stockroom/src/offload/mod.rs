//! Background execution for stale-while-revalidate.
//!
//! When [`RequestCache::with_cache`](crate::RequestCache::with_cache) finds a
//! stale entry it returns the stale value right away and hands the refresh to
//! an [`OffloadManager`]. Refreshes are keyed by cache key, so a burst of
//! stale hits for one key starts a single refresh.
//!
//! ```ignore
//! use stockroom::offload::{OffloadConfig, OffloadManager};
//! use std::time::Duration;
//!
//! let manager = OffloadManager::new(OffloadConfig::builder().timeout(Duration::from_secs(5)).build());
//! manager.spawn("warmup", async { /* ... */ });
//! ```

mod manager;
mod policy;

pub use manager::{OffloadHandle, OffloadKey, OffloadManager};
pub use policy::{OffloadConfig, OffloadConfigBuilder, TimeoutPolicy};
