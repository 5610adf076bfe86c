//! Prometheus metrics for credential resolution and ingestion.
//!
//! Exposed on the `/metrics` endpoint. Each `Metrics` owns its registry, so
//! independent resolvers (e.g. in tests) never collide on registration.

use prometheus::{
    histogram_opts, opts, Encoder, Histogram, IntCounter, IntCounterVec, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    // Resolution
    resolutions_total: IntCounterVec,
    backend_lookup_seconds: Histogram,

    // Ingestion
    lines_total: IntCounter,
    points_written_total: IntCounter,
    batches_dropped_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let resolutions_total = IntCounterVec::new(
            opts!(
                "logsnarf_credential_resolutions_total",
                "Credential resolutions by outcome"
            ),
            &["outcome"],
        )?;

        let backend_lookup_seconds = Histogram::with_opts(histogram_opts!(
            "logsnarf_credential_backend_lookup_seconds",
            "Latency of credential store lookups in seconds",
            vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
        ))?;

        let lines_total = IntCounter::with_opts(opts!(
            "logsnarf_ingested_lines_total",
            "Syslog lines received on ingress"
        ))?;

        let points_written_total = IntCounter::with_opts(opts!(
            "logsnarf_points_written_total",
            "Metric points written to destinations"
        ))?;

        let batches_dropped_total = IntCounterVec::new(
            opts!(
                "logsnarf_batches_dropped_total",
                "Ingress batches dropped by reason"
            ),
            &["reason"],
        )?;

        registry.register(Box::new(resolutions_total.clone()))?;
        registry.register(Box::new(backend_lookup_seconds.clone()))?;
        registry.register(Box::new(lines_total.clone()))?;
        registry.register(Box::new(points_written_total.clone()))?;
        registry.register(Box::new(batches_dropped_total.clone()))?;

        Ok(Self {
            registry,
            resolutions_total,
            backend_lookup_seconds,
            lines_total,
            points_written_total,
            batches_dropped_total,
        })
    }

    pub fn record_resolution(&self, outcome: &str) {
        self.resolutions_total.with_label_values(&[outcome]).inc();
    }

    pub fn observe_backend_lookup(&self, seconds: f64) {
        self.backend_lookup_seconds.observe(seconds);
    }

    pub fn record_lines(&self, n: u64) {
        self.lines_total.inc_by(n);
    }

    pub fn record_points_written(&self, n: u64) {
        self.points_written_total.inc_by(n);
    }

    pub fn record_dropped_batch(&self, reason: &str) {
        self.batches_dropped_total.with_label_values(&[reason]).inc();
    }

    /// Encode all registered metrics as Prometheus text format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_independent_registries() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_resolution("hit");
        assert!(a.encode().contains("logsnarf_credential_resolutions_total{outcome=\"hit\"} 1"));
        assert!(!b.encode().contains("outcome=\"hit\""));
    }

    #[test]
    fn test_encode_ingestion_counters() {
        let m = Metrics::new().unwrap();
        m.record_lines(3);
        m.record_points_written(2);
        m.record_dropped_batch("unknown_token");
        let out = m.encode();
        assert!(out.contains("logsnarf_ingested_lines_total 3"));
        assert!(out.contains("logsnarf_points_written_total 2"));
        assert!(out.contains("reason=\"unknown_token\""));
    }
}
