//! File-based configuration for [`RequestCache`](crate::RequestCache).
//!
//! ```yaml
//! default_strategy:
//!   mode: public
//!   maxAge: 60
//!   staleWhileRevalidate: 600
//! revalidation:
//!   timeout: 5s
//!   on_timeout: cancel
//!   deduplicate: true
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use stockroom_core::{CacheOptions, CacheStrategy, StrategyError};
use thiserror::Error;

use crate::offload::{OffloadConfig, TimeoutPolicy};

/// Error loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document could not be parsed.
    #[error("invalid configuration: {0}")]
    Parse(Box<dyn std::error::Error + Send + Sync>),
    /// The default strategy is invalid.
    #[error("invalid default strategy: {0}")]
    Strategy(#[from] StrategyError),
}

/// What to do with a background refresh that outlives its timeout.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OnTimeout {
    /// Cancel the refresh. The stale entry stays until it expires.
    #[default]
    Cancel,
    /// Let the refresh finish and log a warning.
    Warn,
}

/// Background refresh settings.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RevalidationConfig {
    /// Time limit for one refresh (e.g., "5s", "500ms").
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// Applied when `timeout` is exceeded.
    #[serde(default)]
    pub on_timeout: OnTimeout,
    /// Run at most one refresh per key at a time.
    #[serde(default = "enabled")]
    pub deduplicate: bool,
}

fn enabled() -> bool {
    true
}

impl Default for RevalidationConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            on_timeout: OnTimeout::default(),
            deduplicate: true,
        }
    }
}

impl From<&RevalidationConfig> for OffloadConfig {
    fn from(config: &RevalidationConfig) -> Self {
        let timeout_policy = match (config.timeout, config.on_timeout) {
            (None, _) => TimeoutPolicy::None,
            (Some(duration), OnTimeout::Cancel) => TimeoutPolicy::Cancel(duration),
            (Some(duration), OnTimeout::Warn) => TimeoutPolicy::Warn(duration),
        };
        OffloadConfig::builder()
            .timeout_policy(timeout_policy)
            .deduplicate(config.deduplicate)
            .build()
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RequestCacheConfig {
    /// Strategy used by calls that do not pass one explicitly.
    #[serde(default = "short_options")]
    pub default_strategy: CacheOptions,
    /// Background refresh settings.
    #[serde(default)]
    pub revalidation: RevalidationConfig,
}

fn short_options() -> CacheOptions {
    CacheStrategy::SHORT.to_options()
}

impl Default for RequestCacheConfig {
    fn default() -> Self {
        Self {
            default_strategy: short_options(),
            revalidation: RevalidationConfig::default(),
        }
    }
}

impl RequestCacheConfig {
    /// Parses a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_saphyr::from_str(yaml).map_err(|e| ConfigError::Parse(Box::new(e)))?;
        // Reject a bad default strategy at load time.
        config.strategy()?;
        Ok(config)
    }

    /// Validates the default strategy.
    pub fn strategy(&self) -> Result<CacheStrategy, StrategyError> {
        CacheStrategy::custom(self.default_strategy.clone())
    }

    /// Offload settings derived from [`revalidation`](Self::revalidation).
    pub fn offload(&self) -> OffloadConfig {
        OffloadConfig::from(&self.revalidation)
    }
}
