//! End-to-end tests for the proxy router: real HTTP on ephemeral ports,
//! a scripted upstream, and a programmable resolver.

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use ytmproxy::{router, ProxyConfig, ProxyState};
use ytmresolver::{ResolverError, StreamResolver};
use ytmstore::TrackStore;

const AUDIO_BODY: &[u8] = b"FAKE-OPUS-AUDIO-BYTES-0123456789";

/// Resolver whose outcome and call count are controlled by the test.
struct MockResolver {
    url: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl MockResolver {
    fn returning(url: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            url: Mutex::new(url),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl StreamResolver for MockResolver {
    fn resolve(&self, _video_id: &str) -> ytmresolver::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.url.lock().unwrap().clone() {
            Some(url) => Ok(url),
            None => Err(ResolverError::Extraction("mock resolver failure".into())),
        }
    }
}

async fn spawn_server(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Upstream standing in for YouTube's CDN.
///
/// Routes: `/ok` serves a fixed audio body, `/gone` answers 410, `/err`
/// answers 500, `/hang` stalls before responding, `/slow` sends one chunk
/// then keeps the stream open. `/gone` and `/err` count their hits.
async fn spawn_upstream(hits: Arc<AtomicUsize>) -> SocketAddr {
    let gone_hits = hits.clone();
    let err_hits = hits;

    let app = Router::new()
        .route(
            "/ok",
            get(|| async {
                (
                    [(header::CONTENT_TYPE, "audio/webm")],
                    Bytes::from_static(AUDIO_BODY),
                )
            }),
        )
        .route(
            "/gone",
            get(move || {
                let hits = gone_hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    StatusCode::GONE
                }
            }),
        )
        .route(
            "/err",
            get(move || {
                let hits = err_hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            }),
        )
        .route(
            "/hang",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                StatusCode::OK
            }),
        )
        .route(
            "/slow",
            get(|| async {
                let stream = async_stream::stream! {
                    yield Ok::<_, std::io::Error>(Bytes::from_static(b"chunk1"));
                    tokio::time::sleep(Duration::from_secs(30)).await;
                };
                (
                    [(header::CONTENT_TYPE, "audio/webm")],
                    Body::from_stream(stream),
                )
                    .into_response()
            }),
        );

    spawn_server(app).await
}

struct TestProxy {
    addr: SocketAddr,
    store: Arc<TrackStore>,
    resolver: Arc<MockResolver>,
    _temp_dir: TempDir,
}

impl TestProxy {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

async fn spawn_proxy(config: ProxyConfig, resolver: Arc<MockResolver>) -> TestProxy {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(TrackStore::open(&temp_dir.path().join("tracks.db")).unwrap());

    let state = ProxyState::new(store.clone(), resolver.clone(), config);
    let addr = spawn_server(router(state)).await;

    TestProxy {
        addr,
        store,
        resolver,
        _temp_dir: temp_dir,
    }
}

/// Config tuned for tests: tight delays, generous expiry.
fn test_config() -> ProxyConfig {
    ProxyConfig {
        expiry_threshold: Duration::from_secs(3600),
        max_concurrent_streams: 10,
        max_retries: 3,
        base_retry_delay: Duration::from_millis(10),
        upstream_fetch_timeout: Duration::from_millis(500),
    }
}

#[tokio::test]
async fn test_invalid_id_returns_400() {
    let resolver = MockResolver::returning(None);
    let proxy = spawn_proxy(test_config(), resolver).await;

    for bad_id in ["short", "twelve-chars", "bad%20chars"] {
        let response = reqwest::get(proxy.url(&format!("/proxy/{bad_id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), 400, "id: {bad_id}");
    }

    // Validation failures must never reach the resolver
    assert_eq!(proxy.resolver.calls(), 0);
}

#[tokio::test]
async fn test_unknown_id_returns_404() {
    let resolver = MockResolver::returning(None);
    let proxy = spawn_proxy(test_config(), resolver).await;

    let response = reqwest::get(proxy.url("/proxy/dQw4w9WgXcQ")).await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_fresh_record_streams_with_icy_headers() {
    let upstream = spawn_upstream(Arc::new(AtomicUsize::new(0))).await;
    let resolver = MockResolver::returning(None);
    let proxy = spawn_proxy(test_config(), resolver).await;

    proxy
        .store
        .upsert(
            "dQw4w9WgXcQ",
            Some(&format!("http://{upstream}/ok")),
            "Never Gonna Give You Up",
            Some("Rick Astley"),
        )
        .unwrap();

    let response = reqwest::get(proxy.url("/proxy/dQw4w9WgXcQ")).await.unwrap();

    assert_eq!(response.status(), 200);
    let headers = response.headers();
    assert_eq!(
        headers.get("icy-name").unwrap(),
        "Rick Astley - Never Gonna Give You Up"
    );
    assert_eq!(headers.get("icy-metaint").unwrap(), "16000");
    assert_eq!(headers.get("cache-control").unwrap(), "no-cache");
    assert_eq!(headers.get("content-type").unwrap(), "audio/webm");

    let body = response.bytes().await.unwrap();
    assert_eq!(&body[..], AUDIO_BODY);

    // A fresh URL must not trigger any resolution
    assert_eq!(proxy.resolver.calls(), 0);
}

#[tokio::test]
async fn test_missing_artist_falls_back_to_unknown() {
    let upstream = spawn_upstream(Arc::new(AtomicUsize::new(0))).await;
    let resolver = MockResolver::returning(None);
    let proxy = spawn_proxy(test_config(), resolver).await;

    proxy
        .store
        .upsert(
            "abc123def45",
            Some(&format!("http://{upstream}/ok")),
            "Some Title",
            None,
        )
        .unwrap();

    let response = reqwest::get(proxy.url("/proxy/abc123def45")).await.unwrap();
    assert_eq!(
        response.headers().get("icy-name").unwrap(),
        "Unknown Artist - Some Title"
    );
}

#[tokio::test]
async fn test_stale_url_is_refreshed_before_use() {
    let upstream = spawn_upstream(Arc::new(AtomicUsize::new(0))).await;
    let fresh_url = format!("http://{upstream}/ok");
    let resolver = MockResolver::returning(Some(fresh_url.clone()));

    let mut config = test_config();
    config.expiry_threshold = Duration::ZERO; // everything is stale
    let proxy = spawn_proxy(config, resolver).await;

    // The stored URL is dead; only the refreshed one can stream
    proxy
        .store
        .upsert(
            "dQw4w9WgXcQ",
            Some(&format!("http://{upstream}/gone")),
            "Never Gonna Give You Up",
            Some("Rick Astley"),
        )
        .unwrap();
    let before = proxy.store.get("dQw4w9WgXcQ").unwrap();

    let response = reqwest::get(proxy.url("/proxy/dQw4w9WgXcQ")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(&response.bytes().await.unwrap()[..], AUDIO_BODY);

    // Exactly one resolution, and the store reflects it
    assert_eq!(proxy.resolver.calls(), 1);
    let after = proxy.store.get("dQw4w9WgXcQ").unwrap();
    assert_eq!(after.stream_url.as_deref(), Some(fresh_url.as_str()));
    assert!(after.updated_at >= before.updated_at);
}

#[tokio::test]
async fn test_refresh_failure_falls_back_to_stale_url() {
    let upstream = spawn_upstream(Arc::new(AtomicUsize::new(0))).await;
    let resolver = MockResolver::returning(None); // refresh always fails

    let mut config = test_config();
    config.expiry_threshold = Duration::ZERO;
    let proxy = spawn_proxy(config, resolver).await;

    let old_url = format!("http://{upstream}/ok");
    proxy
        .store
        .upsert("dQw4w9WgXcQ", Some(&old_url), "Title", None)
        .unwrap();
    let before = proxy.store.get("dQw4w9WgXcQ").unwrap();

    // Refresh failure is non-fatal: the stale URL still works here
    let response = reqwest::get(proxy.url("/proxy/dQw4w9WgXcQ")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(&response.bytes().await.unwrap()[..], AUDIO_BODY);

    assert_eq!(proxy.resolver.calls(), 1);
    let after = proxy.store.get("dQw4w9WgXcQ").unwrap();
    assert_eq!(after.stream_url.as_deref(), Some(old_url.as_str()));
    assert_eq!(after.updated_at, before.updated_at);
}

#[tokio::test]
async fn test_unresolved_url_is_resolved_on_demand() {
    let upstream = spawn_upstream(Arc::new(AtomicUsize::new(0))).await;
    let fresh_url = format!("http://{upstream}/ok");
    let resolver = MockResolver::returning(Some(fresh_url.clone()));
    let proxy = spawn_proxy(test_config(), resolver).await;

    // Sync registered the track without resolving it
    proxy
        .store
        .upsert("abc123def45", None, "Lazy Track", None)
        .unwrap();

    let response = reqwest::get(proxy.url("/proxy/abc123def45")).await.unwrap();
    assert_eq!(response.status(), 200);

    assert_eq!(proxy.resolver.calls(), 1);
    let after = proxy.store.get("abc123def45").unwrap();
    assert_eq!(after.stream_url.as_deref(), Some(fresh_url.as_str()));
}

#[tokio::test]
async fn test_on_demand_resolution_failure_is_502() {
    let resolver = MockResolver::returning(None);
    let proxy = spawn_proxy(test_config(), resolver).await;

    proxy
        .store
        .upsert("abc123def45", None, "Lazy Track", None)
        .unwrap();

    // No URL and no way to get one: nothing to fall back to
    let response = reqwest::get(proxy.url("/proxy/abc123def45")).await.unwrap();
    assert_eq!(response.status(), 502);
}

#[tokio::test]
async fn test_permanent_upstream_failure_short_circuits() {
    let hits = Arc::new(AtomicUsize::new(0));
    let upstream = spawn_upstream(hits.clone()).await;
    let resolver = MockResolver::returning(None);
    let proxy = spawn_proxy(test_config(), resolver).await;

    proxy
        .store
        .upsert(
            "dQw4w9WgXcQ",
            Some(&format!("http://{upstream}/gone")),
            "Title",
            None,
        )
        .unwrap();

    let response = reqwest::get(proxy.url("/proxy/dQw4w9WgXcQ")).await.unwrap();
    assert_eq!(response.status(), 502);

    // 410 marks the URL dead; retrying it would be pointless
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_transient_upstream_failure_retries_then_502() {
    let hits = Arc::new(AtomicUsize::new(0));
    let upstream = spawn_upstream(hits.clone()).await;
    let resolver = MockResolver::returning(None);
    let proxy = spawn_proxy(test_config(), resolver).await;

    proxy
        .store
        .upsert(
            "dQw4w9WgXcQ",
            Some(&format!("http://{upstream}/err")),
            "Title",
            None,
        )
        .unwrap();

    let started = std::time::Instant::now();
    let response = reqwest::get(proxy.url("/proxy/dQw4w9WgXcQ")).await.unwrap();
    assert_eq!(response.status(), 502);

    // Full attempt budget spent, with backoff (10ms + 20ms) in between
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[tokio::test]
async fn test_upstream_timeout_returns_504() {
    let upstream = spawn_upstream(Arc::new(AtomicUsize::new(0))).await;
    let resolver = MockResolver::returning(None);

    let mut config = test_config();
    config.max_retries = 2;
    config.upstream_fetch_timeout = Duration::from_millis(100);
    let proxy = spawn_proxy(config, resolver).await;

    proxy
        .store
        .upsert(
            "dQw4w9WgXcQ",
            Some(&format!("http://{upstream}/hang")),
            "Title",
            None,
        )
        .unwrap();

    let response = reqwest::get(proxy.url("/proxy/dQw4w9WgXcQ")).await.unwrap();
    assert_eq!(response.status(), 504);
}

#[tokio::test]
async fn test_capacity_limit_rejects_then_recovers() {
    let upstream = spawn_upstream(Arc::new(AtomicUsize::new(0))).await;
    let resolver = MockResolver::returning(None);

    let mut config = test_config();
    config.max_concurrent_streams = 1;
    let proxy = spawn_proxy(config, resolver).await;

    proxy
        .store
        .upsert(
            "dQw4w9WgXcQ",
            Some(&format!("http://{upstream}/slow")),
            "Title",
            None,
        )
        .unwrap();

    // First stream occupies the only slot (headers received, body open)
    let mut first = reqwest::get(proxy.url("/proxy/dQw4w9WgXcQ")).await.unwrap();
    assert_eq!(first.status(), 200);
    assert!(first.chunk().await.unwrap().is_some());

    // Second concurrent stream is rejected without waiting
    let second = reqwest::get(proxy.url("/proxy/dQw4w9WgXcQ")).await.unwrap();
    assert_eq!(second.status(), 503);

    // Health must not be capacity-limited
    let health = reqwest::get(proxy.url("/health")).await.unwrap();
    assert_eq!(health.status(), 200);

    // Client disconnect releases the slot even though the upstream body
    // never finished
    drop(first);

    let mut recovered = 0;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let retry = reqwest::get(proxy.url("/proxy/dQw4w9WgXcQ")).await.unwrap();
        recovered = retry.status().as_u16();
        if recovered == 200 {
            break;
        }
    }
    assert_eq!(recovered, 200, "slot never came back after disconnect");
}

#[tokio::test]
async fn test_health_payload() {
    let resolver = MockResolver::returning(None);
    let proxy = spawn_proxy(test_config(), resolver).await;

    let response = reqwest::get(proxy.url("/health")).await.unwrap();
    assert_eq!(response.status(), 200);

    let payload: serde_json::Value = response.json().await.unwrap();
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["service"], "ytmproxy");
}
