//! Counters and timings, recorded when the `metrics` feature is on.
//!
//! Without the feature every `record_*` function compiles to nothing.

use stockroom_core::CacheStatus;

use crate::flight::FlightRole;

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    /// Calls answered from a fresh entry.
    pub static ref CACHE_HIT_COUNTER: &'static str = {
        metrics::describe_counter!(
            "stockroom_cache_hit_total",
            "Cache calls answered with a fresh stored value."
        );
        "stockroom_cache_hit_total"
    };
    /// Calls that ran the producer or joined a run.
    pub static ref CACHE_MISS_COUNTER: &'static str = {
        metrics::describe_counter!(
            "stockroom_cache_miss_total",
            "Cache calls answered by running the producer or joining a run."
        );
        "stockroom_cache_miss_total"
    };
    /// Calls answered from a stale entry.
    pub static ref CACHE_STALE_COUNTER: &'static str = {
        metrics::describe_counter!(
            "stockroom_cache_stale_total",
            "Cache calls answered with a stale stored value."
        );
        "stockroom_cache_stale_total"
    };

    /// Callers per flight role, labelled `role`.
    pub static ref FLIGHTS_COUNTER: &'static str = {
        metrics::describe_counter!(
            "stockroom_flights_total",
            "Callers that led or joined an in-flight request."
        );
        "stockroom_flights_total"
    };
    /// Producer runs that failed or aborted.
    pub static ref PRODUCER_ERRORS_COUNTER: &'static str = {
        metrics::describe_counter!(
            "stockroom_producer_errors_total",
            "Producer runs that returned an error or aborted."
        );
        "stockroom_producer_errors_total"
    };

    /// Background refreshes started.
    pub static ref OFFLOAD_TASKS_SPAWNED: &'static str = {
        metrics::describe_counter!(
            "stockroom_offload_tasks_spawned_total",
            "Background tasks started."
        );
        "stockroom_offload_tasks_spawned_total"
    };
    /// Background refreshes that ran to the end.
    pub static ref OFFLOAD_TASKS_COMPLETED: &'static str = {
        metrics::describe_counter!(
            "stockroom_offload_tasks_completed_total",
            "Background tasks that ran to the end."
        );
        "stockroom_offload_tasks_completed_total"
    };
    /// Background refreshes cut off by the cancel policy.
    pub static ref OFFLOAD_TASKS_TIMEOUT: &'static str = {
        metrics::describe_counter!(
            "stockroom_offload_tasks_timeout_total",
            "Background tasks cancelled by their time limit."
        );
        "stockroom_offload_tasks_timeout_total"
    };
    /// Refreshes not started because one was running for the key.
    pub static ref OFFLOAD_TASKS_DEDUPLICATED: &'static str = {
        metrics::describe_counter!(
            "stockroom_offload_tasks_deduplicated_total",
            "Background tasks skipped because one was already running for the key."
        );
        "stockroom_offload_tasks_deduplicated_total"
    };
    /// Background refreshes running now.
    pub static ref OFFLOAD_TASKS_ACTIVE: &'static str = {
        metrics::describe_gauge!(
            "stockroom_offload_tasks_active",
            "Background tasks running now."
        );
        "stockroom_offload_tasks_active"
    };
    /// How long background refreshes took.
    pub static ref OFFLOAD_TASK_DURATION: &'static str = {
        metrics::describe_histogram!(
            "stockroom_offload_task_duration_seconds",
            metrics::Unit::Seconds,
            "Wall time of background tasks."
        );
        "stockroom_offload_task_duration_seconds"
    };
}

/// Counts a resolved cache call under its status and store label.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_status(status: CacheStatus, backend: &str) {
    let counter = match status {
        CacheStatus::Hit => *CACHE_HIT_COUNTER,
        CacheStatus::Miss => *CACHE_MISS_COUNTER,
        CacheStatus::Stale => *CACHE_STALE_COUNTER,
    };
    metrics::counter!(counter, "backend" => backend.to_string()).increment(1);
}

#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_status(_status: CacheStatus, _backend: &str) {}

/// Record how a caller attached to a flight.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_flight(role: FlightRole) {
    metrics::counter!(*FLIGHTS_COUNTER, "role" => role.as_str()).increment(1);
}

#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_flight(_role: FlightRole) {}

/// Record a producer run that failed or aborted.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_producer_error() {
    metrics::counter!(*PRODUCER_ERRORS_COUNTER).increment(1);
}

#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_producer_error() {}
