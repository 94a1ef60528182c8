// Prometheus metrics for the probe runner
//
// Exposes metrics on /metrics HTTP endpoint:
// - Probe outcomes by status (counter)
// - Engine errors by kind (counter)
// - Probe latency (histogram)
// - Credential rotations observed (counter)
// - Live sandboxes (gauge)

use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::sync::{Arc, Once};

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref PROBES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("probes_total", "Completed probes by outcome status"),
        &["status"]
    ).expect("Failed to create probes total metric");

    pub static ref PROBE_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("probe_errors_total", "Requests that ended without an outcome"),
        &["kind"]
    ).expect("Failed to create probe errors metric");

    pub static ref PROBE_DURATION_SECONDS: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new("probe_duration_seconds", "Verifier probe latency in seconds")
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0]),
    ).expect("Failed to create probe duration metric");

    pub static ref CREDENTIAL_ROTATIONS_TOTAL: IntCounter = IntCounter::new(
        "credential_rotations_total",
        "Probes during which the verifier rewrote the credential file"
    ).expect("Failed to create credential rotations metric");

    pub static ref ACTIVE_SANDBOXES: IntGauge = IntGauge::new(
        "active_sandboxes",
        "Number of sandbox directories currently on disk"
    ).expect("Failed to create active sandboxes metric");
}

static INIT: Once = Once::new();

/// Register all metrics with the registry. Safe to call more than once.
pub fn init() {
    INIT.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(PROBES_TOTAL.clone()),
            Box::new(PROBE_ERRORS_TOTAL.clone()),
            Box::new(PROBE_DURATION_SECONDS.clone()),
            Box::new(CREDENTIAL_ROTATIONS_TOTAL.clone()),
            Box::new(ACTIVE_SANDBOXES.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                tracing::warn!("Failed to register metric: {}", e);
            }
        }
    });
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
    }

    #[test]
    fn test_gather_contains_probe_metrics() {
        init();
        PROBES_TOTAL.with_label_values(&["ok"]).inc();
        CREDENTIAL_ROTATIONS_TOTAL.inc();

        let text = gather_metrics().unwrap();
        assert!(text.contains("probes_total"));
        assert!(text.contains("credential_rotations_total"));
    }
}
