use std::time::Duration;

use prometheus::{
    opts, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};

use crate::{errors::GenerationError, relay::RelaySummary};

#[derive(Clone)]
pub struct AppMetrics {
    registry: Registry,
    request_total: IntCounterVec,
    request_duration_seconds: HistogramVec,
    inflight_requests: IntGauge,
    relayed_chunks_total: IntCounter,
    relayed_bytes_total: IntCounter,
    generation_failures_total: IntCounterVec,
    parser_events_total: IntCounterVec,
}

pub struct InflightGuard<'a> {
    metrics: &'a AppMetrics,
}

impl AppMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let request_total = IntCounterVec::new(
            opts!(
                "promptpad_http_requests_total",
                "Total HTTP requests processed by the gateway"
            ),
            &["path", "method", "status"],
        )
        .expect("valid request_total metric");

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "promptpad_http_request_duration_seconds",
                "HTTP request latency in seconds",
            ),
            &["path", "method"],
        )
        .expect("valid request_duration_seconds metric");

        let inflight_requests = IntGauge::new(
            "promptpad_inflight_requests",
            "Current in-flight requests at the gateway",
        )
        .expect("valid inflight_requests metric");

        let relayed_chunks_total = IntCounter::new(
            "promptpad_relayed_chunks_total",
            "Chunks forwarded from the prompt engine",
        )
        .expect("valid relayed_chunks_total metric");

        let relayed_bytes_total = IntCounter::new(
            "promptpad_relayed_bytes_total",
            "Bytes forwarded from the prompt engine",
        )
        .expect("valid relayed_bytes_total metric");

        let generation_failures_total = IntCounterVec::new(
            opts!(
                "promptpad_generation_failures_total",
                "Failed generations by error kind and code"
            ),
            &["kind", "code"],
        )
        .expect("valid generation_failures_total metric");

        let parser_events_total = IntCounterVec::new(
            opts!(
                "promptpad_parser_events_total",
                "Events delivered to live observers by kind"
            ),
            &["kind"],
        )
        .expect("valid parser_events_total metric");

        registry
            .register(Box::new(request_total.clone()))
            .expect("register request_total");
        registry
            .register(Box::new(request_duration_seconds.clone()))
            .expect("register request_duration_seconds");
        registry
            .register(Box::new(inflight_requests.clone()))
            .expect("register inflight_requests");
        registry
            .register(Box::new(relayed_chunks_total.clone()))
            .expect("register relayed_chunks_total");
        registry
            .register(Box::new(relayed_bytes_total.clone()))
            .expect("register relayed_bytes_total");
        registry
            .register(Box::new(generation_failures_total.clone()))
            .expect("register generation_failures_total");
        registry
            .register(Box::new(parser_events_total.clone()))
            .expect("register parser_events_total");

        Self {
            registry,
            request_total,
            request_duration_seconds,
            inflight_requests,
            relayed_chunks_total,
            relayed_bytes_total,
            generation_failures_total,
            parser_events_total,
        }
    }

    pub fn inflight_guard(&self) -> InflightGuard<'_> {
        self.inflight_requests.inc();
        InflightGuard { metrics: self }
    }

    pub fn observe_request(&self, path: &str, method: &str, status: u16, duration: Duration) {
        let status_label = status.to_string();
        self.request_total
            .with_label_values(&[path, method, &status_label])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[path, method])
            .observe(duration.as_secs_f64());
    }

    pub fn observe_relay(&self, summary: &RelaySummary) {
        self.relayed_chunks_total.inc_by(summary.chunks as u64);
        self.relayed_bytes_total.inc_by(summary.bytes as u64);
    }

    pub fn observe_failure(&self, error: &GenerationError) {
        self.generation_failures_total
            .with_label_values(&[error.kind(), error.code()])
            .inc();
    }

    pub fn observe_event(&self, kind: &str) {
        self.parser_events_total.with_label_values(&[kind]).inc();
    }

    pub fn render(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|error| error.to_string())?;
        String::from_utf8(buffer).map_err(|error| error.to_string())
    }
}

impl Default for AppMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.metrics.inflight_requests.dec();
    }
}
