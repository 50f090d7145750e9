//! Prometheus metrics for the relay.
//!
//! Recording functions are no-ops until a recorder is installed, so handlers
//! call them unconditionally.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Initialize metrics descriptions.
pub fn init_metrics() {
    describe_counter!(
        "relay_requests_total",
        "Chat requests received, by endpoint"
    );
    describe_counter!(
        "relay_rejected_requests_total",
        "Chat requests rejected as invalid, by endpoint"
    );

    // Upstream metrics
    describe_counter!(
        "relay_upstream_errors_total",
        "Failed upstream completion calls"
    );
    describe_histogram!(
        "relay_upstream_ttfb_seconds",
        "Time from request to first upstream fragment"
    );

    // Streaming metrics
    describe_gauge!("relay_active_streams", "Currently open SSE streams");
    describe_counter!("relay_fragments_sent_total", "Content frames sent");
    describe_counter!("relay_bytes_sent_total", "SSE bytes sent to clients");
    describe_counter!(
        "relay_stream_errors_total",
        "Streams that ended with an error frame, by reason"
    );
    describe_histogram!(
        "relay_stream_duration_seconds",
        "Total SSE stream duration per request"
    );
}

/// Start the Prometheus metrics HTTP server.
pub fn start_metrics_server(addr: SocketAddr) -> anyhow::Result<()> {
    // 1ms to ~16s
    let ttfb_buckets: [f64; 15] = [
        0.001, 0.002, 0.004, 0.008, 0.016, 0.032, 0.064, 0.128, 0.256, 0.512, 1.024, 2.048, 4.096,
        8.192, 16.384,
    ];

    // 10ms to ~163s
    let duration_buckets: [f64; 15] = [
        0.01, 0.02, 0.04, 0.08, 0.16, 0.32, 0.64, 1.28, 2.56, 5.12, 10.24, 20.48, 40.96, 81.92,
        163.84,
    ];

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("relay_upstream_ttfb_seconds".to_string()),
            &ttfb_buckets,
        )?
        .set_buckets_for_metric(
            Matcher::Full("relay_stream_duration_seconds".to_string()),
            &duration_buckets,
        )?
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to start metrics server: {}", e))?;

    tracing::info!(%addr, "Metrics server started");
    Ok(())
}

/// Record an incoming chat request.
pub fn record_request(endpoint: &'static str) {
    counter!("relay_requests_total", "endpoint" => endpoint).increment(1);
}

/// Record a request rejected before reaching the upstream.
pub fn record_rejected(endpoint: &'static str) {
    counter!("relay_rejected_requests_total", "endpoint" => endpoint).increment(1);
}

/// Record a failed upstream call.
pub fn record_upstream_error(backend: &'static str) {
    counter!("relay_upstream_errors_total", "backend" => backend).increment(1);
}

/// Record time to first fragment from the upstream.
pub fn record_upstream_ttfb(backend: &'static str, duration: Duration) {
    histogram!("relay_upstream_ttfb_seconds", "backend" => backend).record(duration.as_secs_f64());
}

/// Update the open stream gauge.
pub fn set_active_streams(count: u64) {
    gauge!("relay_active_streams").set(count as f64);
}

/// Record one content frame written to a client.
pub fn record_fragment_sent(bytes: usize) {
    counter!("relay_fragments_sent_total").increment(1);
    record_bytes_sent(bytes);
}

/// Record bytes sent to a client.
pub fn record_bytes_sent(bytes: usize) {
    counter!("relay_bytes_sent_total").increment(bytes as u64);
}

/// Record a stream that ended with an error frame.
pub fn record_stream_error(reason: &'static str) {
    counter!("relay_stream_errors_total", "reason" => reason).increment(1);
}

/// Record total stream duration.
pub fn record_stream_duration(duration: Duration) {
    histogram!("relay_stream_duration_seconds").record(duration.as_secs_f64());
}

/// Timer for measuring durations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
