//! Prometheus metrics for relayed calls and scheduled task fires.
//!
//! Exposed on `/metrics`. Each `GatewayMetrics` owns its registry so several
//! gateways (e.g. in tests) can live in one process.

use std::time::Duration;

use prometheus::{
    histogram_opts, opts, Encoder, HistogramVec, IntCounterVec, Registry, TextEncoder,
};

pub struct GatewayMetrics {
    registry: Registry,
    relay_requests_total: IntCounterVec,
    relay_duration_seconds: HistogramVec,
    scheduled_tasks_total: IntCounterVec,
}

impl GatewayMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let relay_requests_total = IntCounterVec::new(
            opts!("autogate_relay_requests_total", "Total relayed upstream calls"),
            &["route", "status"],
        )?;
        let relay_duration_seconds = HistogramVec::new(
            histogram_opts!(
                "autogate_relay_duration_seconds",
                "Upstream call latency in seconds",
                vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
            ),
            &["route"],
        )?;
        let scheduled_tasks_total = IntCounterVec::new(
            opts!("autogate_scheduled_tasks_total", "Scheduled task lifecycle events"),
            &["event"],
        )?;

        registry.register(Box::new(relay_requests_total.clone()))?;
        registry.register(Box::new(relay_duration_seconds.clone()))?;
        registry.register(Box::new(scheduled_tasks_total.clone()))?;

        Ok(Self {
            registry,
            relay_requests_total,
            relay_duration_seconds,
            scheduled_tasks_total,
        })
    }

    /// `status` is the upstream status code, or a relay error label.
    pub fn record_relay(&self, route: &str, status: &str, elapsed: Duration) {
        self.relay_requests_total
            .with_label_values(&[route, status])
            .inc();
        self.relay_duration_seconds
            .with_label_values(&[route])
            .observe(elapsed.as_secs_f64());
    }

    /// `event` is one of `scheduled`, `fired`, `failed`.
    pub fn record_task(&self, event: &str) {
        self.scheduled_tasks_total.with_label_values(&[event]).inc();
    }

    /// Encode all metrics as Prometheus text format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_relay_shows_up_in_output() {
        let metrics = GatewayMetrics::new().unwrap();
        metrics.record_relay("/api/twitter/post", "201", Duration::from_millis(120));
        metrics.record_task("fired");

        let output = metrics.encode();
        assert!(output.contains("autogate_relay_requests_total"));
        assert!(output.contains(r#"route="/api/twitter/post""#));
        assert!(output.contains(r#"event="fired""#));
    }

    #[test]
    fn test_independent_registries_do_not_collide() {
        let a = GatewayMetrics::new().unwrap();
        let b = GatewayMetrics::new().unwrap();
        a.record_task("scheduled");
        assert!(!b.encode().contains(r#"event="scheduled""#));
    }
}
