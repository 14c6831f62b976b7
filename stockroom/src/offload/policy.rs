//! Limits applied to background refreshes.

use std::time::Duration;

/// Time limit for one background refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Refreshes may run for as long as the producer takes.
    #[default]
    None,
    /// Refreshes are dropped once the duration passes. The stale entry is
    /// kept until it expires.
    Cancel(Duration),
    /// Refreshes run to completion; exceeding the duration is logged.
    Warn(Duration),
}

impl TimeoutPolicy {
    /// The configured limit, if any.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            TimeoutPolicy::None => None,
            TimeoutPolicy::Cancel(d) | TimeoutPolicy::Warn(d) => Some(*d),
        }
    }
}

/// Settings for an [`OffloadManager`](super::OffloadManager).
///
/// ```
/// use std::time::Duration;
/// use stockroom::offload::{OffloadConfig, TimeoutPolicy};
///
/// let config = OffloadConfig::builder()
///     .timeout(Duration::from_secs(2))
///     .build();
/// assert_eq!(config.timeout_policy, TimeoutPolicy::Cancel(Duration::from_secs(2)));
/// assert!(config.deduplicate);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffloadConfig {
    /// Time limit per task.
    pub timeout_policy: TimeoutPolicy,
    /// When set, a task keyed by a cache key is skipped while another task
    /// for that key is running.
    pub deduplicate: bool,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        OffloadConfigBuilder::new().build()
    }
}

impl OffloadConfig {
    /// Starts from the defaults: no time limit, deduplication on.
    pub fn builder() -> OffloadConfigBuilder {
        OffloadConfigBuilder::new()
    }
}

/// Builder returned by [`OffloadConfig::builder`].
#[derive(Debug, Clone)]
pub struct OffloadConfigBuilder {
    config: OffloadConfig,
}

impl Default for OffloadConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OffloadConfigBuilder {
    /// No time limit, deduplication on.
    pub fn new() -> Self {
        Self {
            config: OffloadConfig {
                timeout_policy: TimeoutPolicy::None,
                deduplicate: true,
            },
        }
    }

    /// Sets the time limit policy.
    pub fn timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.config.timeout_policy = policy;
        self
    }

    /// Cancels tasks that run longer than `duration`.
    pub fn timeout(self, duration: Duration) -> Self {
        self.timeout_policy(TimeoutPolicy::Cancel(duration))
    }

    /// Turns per-key deduplication on or off.
    pub fn deduplicate(mut self, enabled: bool) -> Self {
        self.config.deduplicate = enabled;
        self
    }

    /// Finishes the configuration.
    pub fn build(self) -> OffloadConfig {
        self.config
    }
}
