//! Prometheus metrics for the conversion pool.

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts};

/// Probe attempts by result.
pub static PROBES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mediamill_probes_total", "Total media probes"),
        &["result"], // "success", "error"
    )
    .unwrap()
});

/// Encodes by terminal result.
pub static ENCODES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mediamill_encodes_total", "Total encode jobs"),
        &["result"], // "success", "failed", "cancelled"
    )
    .unwrap()
});

/// Wall-clock duration of successful encodes.
pub static ENCODE_DURATION: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "mediamill_encode_duration_seconds",
            "Duration of successful encode jobs",
        )
        .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
    )
    .unwrap()
});

/// Files that reached the completed collection without error.
pub static FILES_COMPLETED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "mediamill_files_completed_total",
        "Total files converted successfully",
    )
    .unwrap()
});

/// Slots currently running an external encode.
pub static SLOTS_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("mediamill_slots_running", "Worker slots currently running").unwrap()
});

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(PROBES_TOTAL.clone()),
        Box::new(ENCODES_TOTAL.clone()),
        Box::new(ENCODE_DURATION.clone()),
        Box::new(FILES_COMPLETED.clone()),
        Box::new(SLOTS_RUNNING.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_cleanly() {
        let registry = prometheus::Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }
    }
}
