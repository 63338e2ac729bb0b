//! Error taxonomy of the proxy and its mapping to HTTP responses.
//!
//! Response bodies stay deliberately terse: upstream URLs and internal
//! details belong in the logs, not on the wire.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

/// Terminal failures of a proxy request.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The path parameter is not an 11-character video ID.
    #[error("invalid video ID format: {0}")]
    InvalidId(String),

    /// The ID is well formed but unknown to the track store.
    #[error("track not found: {0}")]
    NotFound(String),

    /// Admission control is saturated.
    #[error("too many concurrent streams")]
    Capacity,

    /// The track has no stream URL and on-demand resolution failed.
    #[error("failed to resolve stream URL for {0}")]
    Resolution(String),

    /// Upstream answered with permanent-failure semantics (403/404/410).
    #[error("upstream rejected the stream with HTTP {0}")]
    UpstreamPermanent(u16),

    /// All upstream attempts failed on transient errors.
    #[error("upstream unavailable after {0} attempts")]
    UpstreamExhausted(u32),

    /// All upstream attempts failed, the last one by timeout.
    #[error("upstream timed out after {0} attempts")]
    UpstreamTimeout(u32),

    /// Anything unexpected. Never echoed to the client in detail.
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl From<ytmstore::StoreError> for ProxyError {
    fn from(err: ytmstore::StoreError) -> Self {
        match err {
            ytmstore::StoreError::NotFound(id) => ProxyError::NotFound(id),
            other => ProxyError::Internal(other.into()),
        }
    }
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::InvalidId(_) => StatusCode::BAD_REQUEST,
            ProxyError::NotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::Capacity => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Resolution(_)
            | ProxyError::UpstreamPermanent(_)
            | ProxyError::UpstreamExhausted(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match &self {
            ProxyError::Internal(err) => {
                // Full detail only in the logs
                error!(error = ?err, "Unexpected error handling proxy request");
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        (status, body).into_response()
    }
}
