//! Store usage gauges, recorded with the `metrics` feature.
//!
//! | name | meaning |
//! |------|---------|
//! | `stockroom_moka_entries` | entries held |
//! | `stockroom_moka_size_bytes` | weighted size; equals the entry count for entry-bounded stores |
//!
//! Both are labelled with `backend`.

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    /// Entries held.
    pub static ref ENTRY_COUNT_GAUGE: &'static str = {
        metrics::describe_gauge!(
            "stockroom_moka_entries",
            "Entries held by a Moka-backed store."
        );
        "stockroom_moka_entries"
    };

    /// Weighted size.
    pub static ref WEIGHTED_SIZE_GAUGE: &'static str = {
        metrics::describe_gauge!(
            "stockroom_moka_size_bytes",
            metrics::Unit::Bytes,
            "Weighted size of a Moka-backed store."
        );
        "stockroom_moka_size_bytes"
    };
}

/// Publishes the store's current usage.
#[cfg(feature = "metrics")]
pub fn record_usage(backend: &str, entries: u64, weighted_size: u64) {
    let backend = backend.to_string();
    metrics::gauge!(*ENTRY_COUNT_GAUGE, "backend" => backend.clone()).set(entries as f64);
    metrics::gauge!(*WEIGHTED_SIZE_GAUGE, "backend" => backend).set(weighted_size as f64);
}

#[cfg(not(feature = "metrics"))]
pub fn record_usage(_backend: &str, _entries: u64, _weighted_size: u64) {}
