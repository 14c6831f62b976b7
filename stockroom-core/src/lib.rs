#![warn(missing_docs)]
//! # stockroom-core
//!
//! Core types for the stockroom sub-request cache.
//!
//! A storefront renders each page from many small requests to a commerce
//! API. This crate defines the vocabulary shared by the cache orchestrator
//! (`stockroom`) and the cache stores (`stockroom-backend`, `stockroom-moka`):
//!
//! - **Keys** - [`CacheKey`] built from [`KeyPart`]s or from a query name and
//!   its variables
//! - **Values** - [`CacheValue`] carrying stale and expire timestamps
//! - **Strategies** - [`CacheStrategy`] presets (`NONE`, `SHORT`, `LONG`, and
//!   [`CacheStrategy::custom`]) and [`generate_cache_control_header`]
//! - **Status** - [`CacheStatus`] (`HIT`, `STALE`, `MISS`) and [`CacheState`]

pub mod key;
pub mod label;
pub mod status;
pub mod strategy;
pub mod value;

pub use key::{CacheKey, KeyPart};
pub use label::BackendLabel;
pub use status::{CacheState, CacheStatus};
pub use strategy::{
    CacheMode, CacheOptions, CacheStrategy, IntoStrategy, StrategyError,
    generate_cache_control_header,
};
pub use value::CacheValue;

#[doc(hidden)]
pub use smol_str::SmolStr;

/// Serialized form of a value as held by a store.
pub type Raw = bytes::Bytes;
