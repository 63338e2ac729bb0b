//! Axum handlers for the proxy surface.
//!
//! Routes:
//! - `GET /proxy/{video_id}` - validate, look up, refresh when stale, then
//!   relay the upstream stream with ICY headers.
//! - `GET /health` - stateless liveness probe, never admission-limited.

use crate::fetch::fetch_with_retry;
use crate::{ProxyError, ProxyState};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use futures_util::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};
use ytmstore::TrackRecord;

/// Fixed ICY metadata interval advertised to clients.
const ICY_METAINT: u32 = 16000;

/// Builds the proxy router.
pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/proxy/{video_id}", get(proxy_stream))
        .route("/health", get(health))
        .with_state(state)
}

/// Liveness probe. Consults nothing and competes with no stream slot.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "ytmproxy",
    }))
}

/// YouTube video IDs are exactly 11 characters of `[A-Za-z0-9_-]`.
fn is_valid_video_id(id: &str) -> bool {
    id.len() == 11
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

async fn proxy_stream(
    State(state): State<ProxyState>,
    Path(video_id): Path<String>,
) -> Result<Response, ProxyError> {
    // 1. Validate before anything else; bad IDs never reach the store.
    if !is_valid_video_id(&video_id) {
        warn!(video_id = %video_id, "Invalid video ID format");
        return Err(ProxyError::InvalidId(video_id));
    }

    // 2. Lookup
    let track = state.store.get(&video_id)?;

    // 3/4. Staleness check and refresh
    let stream_url = resolve_stream_url(&state, &track).await?;

    // 5. Admission control: the permit lives as long as the relay does.
    let permit = state
        .streams
        .clone()
        .try_acquire_owned()
        .map_err(|_| {
            warn!(video_id = %track.video_id, "Connection limit reached, rejecting stream");
            ProxyError::Capacity
        })?;
    debug!(
        video_id = %track.video_id,
        available = state.streams.available_permits(),
        "Stream admitted"
    );

    // 6. Upstream fetch with retry
    let upstream = fetch_with_retry(&state.client, &stream_url, &track.video_id, &state.config).await?;

    // 7. Header injection and relay
    let icy_name = format!(
        "{} - {}",
        track.artist.as_deref().unwrap_or("Unknown Artist"),
        track.title
    );
    info!(video_id = %track.video_id, track = %icy_name, "Relaying stream");

    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("audio/mpeg"));

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static("icy-name"),
        HeaderValue::from_bytes(icy_name.as_bytes())
            .unwrap_or_else(|_| HeaderValue::from_static("Unknown Artist - Unknown")),
    );
    headers.insert(
        HeaderName::from_static("icy-metaint"),
        HeaderValue::from(ICY_METAINT),
    );

    let video_id = track.video_id;
    let mut upstream_body = upstream.bytes_stream();

    // Once the 200 and headers are out, relay failures can only abort the
    // stream; the status code is already on the wire. Dropping the stream
    // (EOF, error, client disconnect) releases the admission permit.
    let body_stream = async_stream::stream! {
        let _permit = permit;
        while let Some(chunk) = upstream_body.next().await {
            match chunk {
                Ok(bytes) => yield Ok::<_, std::io::Error>(bytes),
                Err(e) => {
                    warn!(video_id = %video_id, error = %e, "Upstream relay aborted");
                    break;
                }
            }
        }
        debug!(video_id = %video_id, "Stream finished, releasing slot");
    };

    Ok((StatusCode::OK, headers, Body::from_stream(body_stream)).into_response())
}

/// Decides which URL the relay will use, refreshing it when needed.
///
/// - URL present and fresh: use it, no resolver call.
/// - URL present but older than the expiry threshold: one resolver call;
///   on failure fall back to the old URL (it frequently still works for a
///   while, and availability wins over freshness here).
/// - URL absent: resolve on demand; failure is fatal since there is
///   nothing to fall back to.
async fn resolve_stream_url(state: &ProxyState, track: &TrackRecord) -> Result<String, ProxyError> {
    let video_id = &track.video_id;

    match &track.stream_url {
        None => {
            info!(video_id = %video_id, "Stream URL not resolved yet, resolving on-demand");
            match refresh_stream_url(state, video_id).await {
                Ok(url) => Ok(url),
                Err(e) => {
                    warn!(video_id = %video_id, error = %e, "On-demand resolution failed");
                    Err(ProxyError::Resolution(video_id.clone()))
                }
            }
        }
        Some(url) => {
            let age = (Utc::now() - track.updated_at)
                .to_std()
                .unwrap_or(Duration::ZERO);

            if age < state.config.expiry_threshold {
                return Ok(url.clone());
            }

            info!(
                video_id = %video_id,
                age_secs = age.as_secs(),
                "Stream URL expired, attempting refresh"
            );
            match refresh_stream_url(state, video_id).await {
                Ok(new_url) => Ok(new_url),
                Err(e) => {
                    // Deliberate: a stale URL often outlives its nominal
                    // expiry, so the request proceeds instead of failing.
                    warn!(
                        video_id = %video_id,
                        error = %e,
                        "URL refresh failed, continuing with possibly expired URL"
                    );
                    Ok(url.clone())
                }
            }
        }
    }
}

/// Runs the blocking resolver off the request path and writes the fresh URL
/// back to the store. Returns the stored URL.
async fn refresh_stream_url(state: &ProxyState, video_id: &str) -> anyhow::Result<String> {
    let resolver = state.resolver.clone();
    let id = video_id.to_string();

    let url = tokio::task::spawn_blocking(move || resolver.resolve(&id)).await??;

    let record = state.store.update_stream_url(video_id, &url)?;
    info!(video_id = %video_id, "Stream URL refreshed");

    record
        .stream_url
        .ok_or_else(|| anyhow::anyhow!("store returned record without URL after update"))
}
