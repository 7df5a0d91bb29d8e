//! Shared outbound HTTP plumbing for adapters.
//!
//! Every adapter owns one pooled client built here; per-request client
//! construction exhausts file descriptors under campaign fan-out. Also
//! maps HTTP-level failures into the send error taxonomy so adapters only
//! handle their vendor-specific response bodies.

use std::time::Duration;

use reqwest::{Response, StatusCode};

use crate::adapter::SendError;

/// Tuning for an adapter's HTTP client.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Per-request deadline.
    pub timeout: Duration,
    /// Connection establishment deadline.
    pub connect_timeout: Duration,
    /// Idle keepalive before a pooled connection is dropped.
    pub pool_idle_timeout: Duration,
    /// Maximum idle connections kept per host.
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(5),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 16,
        }
    }
}

/// Builds a pooled client from the config.
pub fn build_client(config: &HttpConfig) -> Result<reqwest::Client, SendError> {
    reqwest::Client::builder()
        .timeout(config.timeout)
        .connect_timeout(config.connect_timeout)
        .pool_idle_timeout(config.pool_idle_timeout)
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .build()
        .map_err(|e| SendError::TransportError(format!("client construction failed: {e}")))
}

/// Maps a transport-level reqwest failure.
pub fn transport_error(err: &reqwest::Error) -> SendError {
    if err.is_timeout() {
        SendError::TransportError("request deadline exceeded".to_string())
    } else if err.is_connect() {
        SendError::TransportError(format!("connection failed: {err}"))
    } else {
        SendError::TransportError(err.to_string())
    }
}

/// Maps a non-2xx provider response into the taxonomy.
///
/// Adapters call this after checking `status().is_success()`; 2xx bodies
/// are vendor-specific and parsed by the adapter itself.
pub async fn status_error(response: Response) -> SendError {
    let status = response.status();
    let retry_after = retry_after_hint(&response);
    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(256).collect();

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SendError::Unauthenticated(excerpt),
        StatusCode::TOO_MANY_REQUESTS => SendError::RateLimited { retry_after },
        s if s.is_server_error() => {
            SendError::ProviderUnavailable(format!("HTTP {}: {excerpt}", s.as_u16()))
        },
        s => SendError::PermanentReject(format!("HTTP {}: {excerpt}", s.as_u16())),
    }
}

/// Parses a Retry-After header, seconds form only.
fn retry_after_hint(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
