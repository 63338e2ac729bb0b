//! # ytmproxy - ICY streaming proxy
//!
//! HTTP front end between MPD and YouTube Music. For each request on
//! `/proxy/{video_id}` the proxy looks the track up in [`ytmstore`],
//! refreshes the direct stream URL through [`ytmresolver`] when it has aged
//! out, then relays the upstream bytes to the client with ICY display
//! headers injected. A bounded admission semaphore protects the host from
//! request bursts, and upstream fetches are retried with exponential
//! backoff before a gateway error is reported.
//!
//! The proxy never resolves URLs on its own executor threads: the resolver
//! is blocking by contract and is always dispatched through
//! `spawn_blocking`, so slow yt-dlp runs cannot stall unrelated streams.

mod error;
mod fetch;
mod handlers;

pub use error::ProxyError;
pub use handlers::router;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use ytmresolver::StreamResolver;
use ytmstore::TrackStore;

/// Tuning knobs of the proxy. Values are plain; sourcing them from a
/// config file is the daemon's concern.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Age after which a stored stream URL is refreshed before use.
    pub expiry_threshold: Duration,
    /// Maximum number of streams relayed at the same time.
    pub max_concurrent_streams: usize,
    /// Total upstream connection attempts per request.
    pub max_retries: u32,
    /// Backoff base: the delay before retry `k` is `base * 2^(k-1)`.
    pub base_retry_delay: Duration,
    /// Bound on a single upstream connection attempt (until headers).
    pub upstream_fetch_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            expiry_threshold: Duration::from_secs(5 * 3600),
            max_concurrent_streams: 10,
            max_retries: 3,
            base_retry_delay: Duration::from_secs(1),
            upstream_fetch_timeout: Duration::from_secs(30),
        }
    }
}

/// Shared state handed to the axum handlers.
#[derive(Clone)]
pub struct ProxyState {
    store: Arc<TrackStore>,
    resolver: Arc<dyn StreamResolver>,
    config: ProxyConfig,
    client: reqwest::Client,
    /// Admission control: one permit per in-flight stream.
    streams: Arc<Semaphore>,
}

impl ProxyState {
    pub fn new(
        store: Arc<TrackStore>,
        resolver: Arc<dyn StreamResolver>,
        config: ProxyConfig,
    ) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(config.upstream_fetch_timeout)
            .build()
            .expect("reqwest client construction cannot fail with these options");

        let streams = Arc::new(Semaphore::new(config.max_concurrent_streams));

        Self {
            store,
            resolver,
            config,
            client,
            streams,
        }
    }
}
