//! # stockroom
//!
//! A sub-request cache for storefront servers.
//!
//! A storefront page is assembled from many small requests to a commerce
//! API. The same product or menu query is usually issued by several
//! components, and by several visitors at the same moment. [`RequestCache`]
//! keeps the results of those queries and makes sure that at most one
//! request per key is travelling upstream at any time: every caller that
//! arrives while it is in flight waits for it and gets the same answer.
//!
//! ## Caching strategies
//!
//! Each call names a [`CacheStrategy`], which sets how long the entry stays
//! fresh, how long it may be served stale, and what `Cache-Control` header
//! downstream caches should see:
//!
//! ```
//! use stockroom::{CacheOptions, CacheStrategy, generate_cache_control_header};
//!
//! assert_eq!(generate_cache_control_header(&CacheStrategy::NONE), "no-store");
//! assert_eq!(
//!     generate_cache_control_header(&CacheStrategy::SHORT),
//!     "public, max-age=1, stale-while-revalidate=9",
//! );
//!
//! let custom = CacheStrategy::custom(CacheOptions {
//!     max_age: Some(30),
//!     ..Default::default()
//! })
//! .unwrap();
//! assert_eq!(custom.to_string(), "max-age=30");
//! ```
//!
//! ## Fetching through the cache
//!
//! ```no_run
//! use stockroom::{CacheStatus, CacheStrategy, RequestCache};
//!
//! # async fn fetch_product(handle: &str) -> Result<String, String> { Ok(handle.to_string()) }
//! # async fn run() -> Result<(), stockroom::CacheError<String>> {
//! let cache = RequestCache::new();
//!
//! // Concurrent calls for the same key share a single upstream request.
//! let product: String = cache
//!     .get_or_set("product:shirt", CacheStrategy::SHORT, || fetch_product("shirt"))
//!     .await?;
//!
//! // Serve stale data while a fresh copy is fetched in the background.
//! let cached = cache
//!     .with_cache("product:shirt", CacheStrategy::SHORT, || fetch_product("shirt"))
//!     .await?;
//! if cached.status == CacheStatus::Stale {
//!     // a refresh is already running
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! - `metrics` - record hit, miss, stale, flight and background task
//!   metrics through the [`metrics`](https://docs.rs/metrics) crate.
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod cache;
pub mod config;
pub mod error;
pub mod flight;
pub mod metrics;
pub mod offload;

pub use cache::{Cached, RequestCache, RequestCacheBuilder};
pub use config::{ConfigError, OnTimeout, RequestCacheConfig, RevalidationConfig};
pub use error::CacheError;
pub use flight::{FlightGroup, FlightRole, Waiter};

pub use stockroom_backend::{Backend, BackendError, CacheBackend, DeleteStatus, InMemoryCache};
pub use stockroom_core::{
    CacheKey, CacheMode, CacheOptions, CacheStatus, CacheStrategy, IntoStrategy, KeyPart,
    StrategyError, generate_cache_control_header,
};

/// The prelude.
pub mod prelude {
    pub use crate::{
        CacheError, CacheKey, CacheOptions, CacheStatus, CacheStrategy, Cached, RequestCache,
        generate_cache_control_header,
    };
}
