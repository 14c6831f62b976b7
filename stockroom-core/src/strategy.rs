//! Caching strategies and `Cache-Control` header generation.
//!
//! A [`CacheStrategy`] decides two things at once: how long the cache keeps
//! an entry fresh (and how long it may serve it stale), and what
//! `Cache-Control` text is sent to downstream caches.
//!
//! | Preset | Header |
//! |--------|--------|
//! | [`CacheStrategy::NONE`] | `no-store` |
//! | [`CacheStrategy::SHORT`] | `public, max-age=1, stale-while-revalidate=9` |
//! | [`CacheStrategy::LONG`] | `public, max-age=3600, stale-while-revalidate=82800` |
//! | [`CacheStrategy::custom`] | exactly the supplied directives |
//!
//! ```
//! use stockroom_core::{CacheOptions, CacheStrategy, generate_cache_control_header};
//!
//! assert_eq!(generate_cache_control_header(&CacheStrategy::NONE), "no-store");
//!
//! let strategy = CacheStrategy::short_with(CacheOptions {
//!     max_age: Some(5),
//!     ..Default::default()
//! })
//! .unwrap();
//! assert_eq!(strategy.to_string(), "public, max-age=5, stale-while-revalidate=9");
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_AGE: &str = "max-age";
const STALE_WHILE_REVALIDATE: &str = "stale-while-revalidate";
const S_MAXAGE: &str = "s-maxage";
const STALE_IF_ERROR: &str = "stale-if-error";

/// Error raised when a strategy is built from invalid options.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrategyError {
    /// A duration directive was negative.
    #[error("`{directive}` must not be negative, got {value}")]
    NegativeValue {
        /// Directive name, e.g. `max-age`.
        directive: &'static str,
        /// The rejected value.
        value: i64,
    },
    /// A duration directive was not a whole number of seconds.
    #[error("`{directive}` must be a whole number of seconds, got `{value}`")]
    NotNumeric {
        /// Directive name, e.g. `max-age`.
        directive: &'static str,
        /// The rejected value as written.
        value: String,
    },
    /// The mode is not allowed here.
    #[error("'mode' must be either 'public' or 'private', got `{0}`")]
    InvalidMode(String),
    /// An option name that no strategy understands.
    #[error("unknown cache option `{0}`")]
    UnknownDirective(String),
}

/// Visibility directive of a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    /// `public` - shared caches may store the response.
    Public,
    /// `private` - only the end client may store the response.
    Private,
    /// `no-store` - nothing may store the response.
    NoStore,
}

impl CacheMode {
    /// Returns the directive text.
    pub const fn as_str(&self) -> &'static str {
        match self {
            CacheMode::Public => "public",
            CacheMode::Private => "private",
            CacheMode::NoStore => "no-store",
        }
    }
}

impl FromStr for CacheMode {
    type Err = StrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(CacheMode::Public),
            "private" => Ok(CacheMode::Private),
            "no-store" => Ok(CacheMode::NoStore),
            other => Err(StrategyError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unvalidated strategy options, as written by a caller or a config file.
///
/// Durations are in seconds and signed so that negative input can be
/// reported rather than silently wrapped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CacheOptions {
    /// Visibility directive.
    #[serde(default)]
    pub mode: Option<CacheMode>,
    /// Seconds the entry stays fresh.
    #[serde(default)]
    pub max_age: Option<i64>,
    /// Seconds a stale entry may be served while it is refreshed.
    #[serde(default)]
    pub stale_while_revalidate: Option<i64>,
    /// Freshness lifetime for shared caches.
    #[serde(default)]
    pub s_max_age: Option<i64>,
    /// Seconds a stale entry may be served when refreshing fails.
    #[serde(default)]
    pub stale_if_error: Option<i64>,
}

impl CacheOptions {
    /// Reads options from an untyped JSON object such as
    /// `{"mode": "public", "maxAge": 60}`.
    ///
    /// Unlike plain deserialization this reports which option was wrong.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, StrategyError> {
        let Some(object) = value.as_object() else {
            return Err(StrategyError::UnknownDirective(value.to_string()));
        };

        let mut options = CacheOptions::default();
        for (name, value) in object {
            match name.as_str() {
                "mode" => {
                    let mode = value
                        .as_str()
                        .ok_or_else(|| StrategyError::InvalidMode(value.to_string()))?;
                    options.mode = Some(mode.parse()?);
                }
                "maxAge" => options.max_age = Some(json_seconds(MAX_AGE, value)?),
                "staleWhileRevalidate" => {
                    options.stale_while_revalidate =
                        Some(json_seconds(STALE_WHILE_REVALIDATE, value)?)
                }
                "sMaxAge" => options.s_max_age = Some(json_seconds(S_MAXAGE, value)?),
                "staleIfError" => {
                    options.stale_if_error = Some(json_seconds(STALE_IF_ERROR, value)?)
                }
                other => return Err(StrategyError::UnknownDirective(other.to_string())),
            }
        }
        Ok(options)
    }
}

fn json_seconds(directive: &'static str, value: &serde_json::Value) -> Result<i64, StrategyError> {
    value.as_i64().ok_or_else(|| StrategyError::NotNumeric {
        directive,
        value: value.to_string(),
    })
}

fn seconds(directive: &'static str, value: Option<i64>) -> Result<Option<u64>, StrategyError> {
    value
        .map(|v| u64::try_from(v).map_err(|_| StrategyError::NegativeValue { directive, value: v }))
        .transpose()
}

/// A validated caching strategy.
///
/// Build one from a preset constant, [`short_with`](Self::short_with) /
/// [`long_with`](Self::long_with) to tweak a preset, or
/// [`custom`](Self::custom) for full control. All durations are whole
/// seconds and never negative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CacheStrategy {
    mode: Option<CacheMode>,
    max_age: Option<u64>,
    stale_while_revalidate: Option<u64>,
    s_max_age: Option<u64>,
    stale_if_error: Option<u64>,
}

impl CacheStrategy {
    /// Never store. Emits `no-store`.
    pub const NONE: CacheStrategy = CacheStrategy {
        mode: Some(CacheMode::NoStore),
        max_age: None,
        stale_while_revalidate: None,
        s_max_age: None,
        stale_if_error: None,
    };

    /// Fresh for one second, served stale for nine more.
    pub const SHORT: CacheStrategy = CacheStrategy {
        mode: Some(CacheMode::Public),
        max_age: Some(1),
        stale_while_revalidate: Some(9),
        s_max_age: None,
        stale_if_error: None,
    };

    /// Fresh for one hour, served stale for 23 more.
    pub const LONG: CacheStrategy = CacheStrategy {
        mode: Some(CacheMode::Public),
        max_age: Some(3600),
        stale_while_revalidate: Some(82800),
        s_max_age: None,
        stale_if_error: None,
    };

    /// Builds a strategy from exactly the given options.
    pub fn custom(options: CacheOptions) -> Result<Self, StrategyError> {
        Self::default().merge(options)
    }

    /// [`SHORT`](Self::SHORT) with some options overridden.
    ///
    /// The mode may only be overridden with `public` or `private`.
    pub fn short_with(overrides: CacheOptions) -> Result<Self, StrategyError> {
        guard_expirable_mode(&overrides)?;
        Self::SHORT.merge(overrides)
    }

    /// [`LONG`](Self::LONG) with some options overridden.
    ///
    /// The mode may only be overridden with `public` or `private`.
    pub fn long_with(overrides: CacheOptions) -> Result<Self, StrategyError> {
        guard_expirable_mode(&overrides)?;
        Self::LONG.merge(overrides)
    }

    fn merge(self, options: CacheOptions) -> Result<Self, StrategyError> {
        Ok(CacheStrategy {
            mode: options.mode.or(self.mode),
            max_age: seconds(MAX_AGE, options.max_age)?.or(self.max_age),
            stale_while_revalidate: seconds(STALE_WHILE_REVALIDATE, options.stale_while_revalidate)?
                .or(self.stale_while_revalidate),
            s_max_age: seconds(S_MAXAGE, options.s_max_age)?.or(self.s_max_age),
            stale_if_error: seconds(STALE_IF_ERROR, options.stale_if_error)?
                .or(self.stale_if_error),
        })
    }

    /// Returns the visibility directive, if any.
    pub fn mode(&self) -> Option<CacheMode> {
        self.mode
    }

    /// Whether results under this strategy must never be stored.
    pub fn is_no_store(&self) -> bool {
        self.mode == Some(CacheMode::NoStore)
    }

    /// Freshness lifetime, if set.
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age.map(Duration::from_secs)
    }

    /// Stale-while-revalidate window, if set.
    pub fn stale_while_revalidate(&self) -> Option<Duration> {
        self.stale_while_revalidate.map(Duration::from_secs)
    }

    /// Shared-cache freshness lifetime, if set.
    pub fn s_max_age(&self) -> Option<Duration> {
        self.s_max_age.map(Duration::from_secs)
    }

    /// Stale-if-error window, if set.
    pub fn stale_if_error(&self) -> Option<Duration> {
        self.stale_if_error.map(Duration::from_secs)
    }

    /// Freshness lifetime in seconds, zero when unset.
    pub fn max_age_secs(&self) -> u64 {
        self.max_age.unwrap_or(0)
    }

    /// Stale-while-revalidate window in seconds, zero when unset.
    pub fn stale_while_revalidate_secs(&self) -> u64 {
        self.stale_while_revalidate.unwrap_or(0)
    }

    /// Returns the options this strategy was built from.
    pub fn to_options(&self) -> CacheOptions {
        let signed = |v: Option<u64>| v.map(|v| v as i64);
        CacheOptions {
            mode: self.mode,
            max_age: signed(self.max_age),
            stale_while_revalidate: signed(self.stale_while_revalidate),
            s_max_age: signed(self.s_max_age),
            stale_if_error: signed(self.stale_if_error),
        }
    }
}

fn guard_expirable_mode(overrides: &CacheOptions) -> Result<(), StrategyError> {
    match overrides.mode {
        Some(CacheMode::NoStore) => Err(StrategyError::InvalidMode(
            CacheMode::NoStore.as_str().to_string(),
        )),
        _ => Ok(()),
    }
}

/// Anything a cache call accepts as its strategy.
///
/// Validated strategies pass through; raw [`CacheOptions`] and header text
/// are validated when the call starts, before any producer runs.
pub trait IntoStrategy {
    /// Validates and converts into a [`CacheStrategy`].
    fn into_strategy(self) -> Result<CacheStrategy, StrategyError>;
}

impl IntoStrategy for CacheStrategy {
    fn into_strategy(self) -> Result<CacheStrategy, StrategyError> {
        Ok(self)
    }
}

impl IntoStrategy for &CacheStrategy {
    fn into_strategy(self) -> Result<CacheStrategy, StrategyError> {
        Ok(self.clone())
    }
}

impl IntoStrategy for CacheOptions {
    fn into_strategy(self) -> Result<CacheStrategy, StrategyError> {
        CacheStrategy::custom(self)
    }
}

impl IntoStrategy for &str {
    fn into_strategy(self) -> Result<CacheStrategy, StrategyError> {
        self.parse()
    }
}

/// Maps a strategy to a `Cache-Control` header value.
///
/// Directives are emitted in the order mode, `max-age`,
/// `stale-while-revalidate`, `s-maxage`, `stale-if-error`. A `no-store`
/// strategy yields exactly `no-store`.
pub fn generate_cache_control_header(strategy: &CacheStrategy) -> String {
    if strategy.is_no_store() {
        return CacheMode::NoStore.as_str().to_string();
    }

    let mut directives: Vec<String> = Vec::with_capacity(5);
    if let Some(mode) = strategy.mode {
        directives.push(mode.as_str().to_string());
    }
    let durations = [
        (MAX_AGE, strategy.max_age),
        (STALE_WHILE_REVALIDATE, strategy.stale_while_revalidate),
        (S_MAXAGE, strategy.s_max_age),
        (STALE_IF_ERROR, strategy.stale_if_error),
    ];
    for (name, value) in durations {
        if let Some(value) = value {
            directives.push(format!("{name}={value}"));
        }
    }
    directives.join(", ")
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&generate_cache_control_header(self))
    }
}

/// Parses a `Cache-Control` header value.
///
/// Directives other than the ones a strategy carries (for example
/// `must-revalidate`) are ignored.
impl FromStr for CacheStrategy {
    type Err = StrategyError;

    fn from_str(header: &str) -> Result<Self, Self::Err> {
        let mut options = CacheOptions::default();
        for directive in header.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            let directive = directive.to_ascii_lowercase();
            let (name, value) = match directive.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim().trim_matches('"'))),
                None => (directive.as_str(), None),
            };
            let parse = |field: &'static str| -> Result<Option<i64>, StrategyError> {
                let raw = value.unwrap_or_default();
                raw.parse::<i64>()
                    .map(Some)
                    .map_err(|_| StrategyError::NotNumeric {
                        directive: field,
                        value: raw.to_string(),
                    })
            };
            match name {
                "public" => options.mode = Some(CacheMode::Public),
                "private" => options.mode = Some(CacheMode::Private),
                "no-store" => options.mode = Some(CacheMode::NoStore),
                MAX_AGE => options.max_age = parse(MAX_AGE)?,
                STALE_WHILE_REVALIDATE => {
                    options.stale_while_revalidate = parse(STALE_WHILE_REVALIDATE)?
                }
                S_MAXAGE => options.s_max_age = parse(S_MAXAGE)?,
                STALE_IF_ERROR => options.stale_if_error = parse(STALE_IF_ERROR)?,
                _ => {}
            }
        }
        CacheStrategy::custom(options)
    }
}
