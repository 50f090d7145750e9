//! Shared HTTP client builder for upstream backends.

use reqwest::Client;
use std::time::Duration;

use crate::error::UpstreamError;

/// Build the HTTP client used for upstream completion calls.
///
/// No overall request timeout is set here: streaming responses are
/// long-lived and are bounded by the relay's idle and total timeouts.
/// One-shot completions set their own per-request timeout.
pub fn build_http_client(
    connect_timeout: Duration,
    pool_max_idle_per_host: usize,
) -> Result<Client, UpstreamError> {
    let client = Client::builder()
        .connect_timeout(connect_timeout)
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .map_err(|e| UpstreamError::Connection(e.to_string()))?;

    tracing::debug!(
        connect_timeout_secs = connect_timeout.as_secs(),
        pool_max_idle_per_host,
        "Upstream HTTP client configured"
    );

    Ok(client)
}
