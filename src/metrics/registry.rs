use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Histogram bucket boundaries for latency metrics (seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Histogram bucket boundaries for response body size (bytes).
const SIZE_BUCKETS: &[f64] = &[
    100.0, 500.0, 1000.0, 5000.0, 10000.0, 50000.0, 100000.0, 500000.0, 1000000.0,
];

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`, `gauge!`,
/// `histogram!`) can be used anywhere in the codebase. The `PrometheusHandle`
/// is retained solely for rendering the `/metrics` endpoint.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric descriptions.
    ///
    /// Must be called **once** at startup before any `counter!` / `gauge!` /
    /// `histogram!` calls.
    pub fn install() -> Self {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .expect("valid matcher")
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Full("proxy_response_size_bytes".to_string()),
                SIZE_BUCKETS,
            )
            .expect("valid matcher")
            .install_recorder()
            .expect("failed to install metrics recorder");

        // --- Describe all metrics (adds HELP / TYPE lines) ---

        // request path
        describe_counter!(
            "proxy_requests_total",
            Unit::Count,
            "Total requests handled, labeled by outcome"
        );
        describe_histogram!(
            "proxy_request_duration_seconds",
            Unit::Seconds,
            "Total request duration from client perspective"
        );
        describe_gauge!(
            "proxy_requests_in_flight",
            Unit::Count,
            "Number of requests currently being bridged"
        );
        describe_histogram!(
            "proxy_response_size_bytes",
            Unit::Bytes,
            "Response body size in bytes"
        );

        // connection pool
        describe_gauge!(
            "proxy_pool_bridges_idle",
            Unit::Count,
            "Idle pooled bridges held across all origins"
        );
        describe_counter!(
            "proxy_pool_reuse_total",
            Unit::Count,
            "Total requests served from a pooled connection"
        );
        describe_counter!(
            "proxy_pool_stale_retries_total",
            Unit::Count,
            "Total requests retried on a fresh connection after a stale pooled bridge"
        );

        // connections
        describe_gauge!(
            "proxy_connections_active",
            Unit::Count,
            "Number of active downstream connections"
        );
        describe_counter!(
            "proxy_connections_total",
            Unit::Count,
            "Total connections accepted"
        );

        // upstream / framing
        describe_counter!(
            "proxy_upstream_connect_failures_total",
            Unit::Count,
            "Total upstream connect attempts that failed"
        );
        describe_counter!(
            "proxy_websocket_upgrades_total",
            Unit::Count,
            "Total WebSocket upgrades bridged"
        );
        describe_counter!(
            "proxy_body_rewrites_total",
            Unit::Count,
            "Total response bodies rewritten (hostname substitution or regex)"
        );

        Self { handle }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
