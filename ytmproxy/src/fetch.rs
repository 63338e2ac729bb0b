//! Upstream fetch with bounded retry.
//!
//! The retry policy is an explicit loop over a fixed attempt budget with a
//! small classification table, not nested error handlers: permanent
//! upstream answers short-circuit, everything else (transport errors,
//! timeouts, other non-success statuses) is retried with exponential
//! backoff until the budget runs out.

use crate::{ProxyConfig, ProxyError};
use axum::http::StatusCode;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Why a single attempt failed.
#[derive(Debug)]
enum AttemptFailure {
    /// The bounded wait for the upstream connection elapsed.
    TimedOut,
    /// Transport-level error or retryable upstream status.
    Transient(String),
}

/// Statuses that mark the URL as permanently dead: retrying the same URL
/// cannot succeed, the caller needs a fresh resolution instead.
fn is_permanent(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::FORBIDDEN | StatusCode::NOT_FOUND | StatusCode::GONE
    )
}

/// Delay before retry `retry` (1-based): `base * 2^(retry-1)`.
fn backoff_delay(base: Duration, retry: u32) -> Duration {
    base * 2u32.saturating_pow(retry - 1)
}

/// Opens a streaming connection to `url`, retrying transient failures.
///
/// Returns the upstream response once headers are in; the body has not been
/// consumed yet. The per-attempt bound covers connection establishment and
/// response headers only, never the body relay.
pub(crate) async fn fetch_with_retry(
    client: &reqwest::Client,
    url: &str,
    video_id: &str,
    config: &ProxyConfig,
) -> Result<reqwest::Response, ProxyError> {
    let mut last_failure = AttemptFailure::Transient("no attempt made".to_string());

    for attempt in 1..=config.max_retries {
        if attempt > 1 {
            let delay = backoff_delay(config.base_retry_delay, attempt - 1);
            debug!(video_id, attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
            sleep(delay).await;
        }

        match timeout(config.upstream_fetch_timeout, client.get(url).send()).await {
            Err(_) => {
                warn!(video_id, attempt, "Upstream connection attempt timed out");
                last_failure = AttemptFailure::TimedOut;
            }
            Ok(Err(e)) if e.is_timeout() => {
                warn!(video_id, attempt, error = %e, "Upstream request timed out");
                last_failure = AttemptFailure::TimedOut;
            }
            Ok(Err(e)) => {
                warn!(video_id, attempt, error = %e, "Upstream request failed");
                last_failure = AttemptFailure::Transient(e.to_string());
            }
            Ok(Ok(response)) => {
                let status = response.status();

                if status.is_success() {
                    debug!(video_id, attempt, "Upstream connection established");
                    return Ok(response);
                }

                if is_permanent(status) {
                    warn!(video_id, attempt, status = status.as_u16(), "Upstream answered permanent failure");
                    return Err(ProxyError::UpstreamPermanent(status.as_u16()));
                }

                warn!(video_id, attempt, status = status.as_u16(), "Upstream answered retryable status");
                last_failure = AttemptFailure::Transient(format!("HTTP {status}"));
            }
        }
    }

    match last_failure {
        AttemptFailure::TimedOut => Err(ProxyError::UpstreamTimeout(config.max_retries)),
        AttemptFailure::Transient(_) => Err(ProxyError::UpstreamExhausted(config.max_retries)),
    }
}
