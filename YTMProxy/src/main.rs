use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;
use ytmconfig::get_config;
use ytmproxy::{router, ProxyConfig, ProxyState};
use ytmresolver::YtDlpResolver;
use ytmstore::TrackStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = get_config();

    // RUST_LOG wins over the configured minimum level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.get_log_min_level().to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let db_path = config.get_db_path()?;
    let store = Arc::new(TrackStore::open(Path::new(&db_path))?);
    info!(path = %db_path, tracks = store.count()?, "track store opened");

    let resolver = Arc::new(YtDlpResolver::new(config.get_ytdlp_binary()));

    let proxy_config = ProxyConfig {
        expiry_threshold: Duration::from_secs(config.get_expiry_hours() * 3600),
        max_concurrent_streams: config.get_max_concurrent_streams() as usize,
        max_retries: config.get_max_retries() as u32,
        base_retry_delay: Duration::from_secs(config.get_base_retry_delay_secs()),
        upstream_fetch_timeout: Duration::from_secs(config.get_upstream_timeout_secs()),
    };

    let state = ProxyState::new(store, resolver, proxy_config);
    let app = router(state);

    let bind = format!("{}:{}", config.get_bind_address(), config.get_http_port());
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(address = %bind, "ytmproxy listening");
    info!("Press Ctrl+C to stop...");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("ytmproxy stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install Ctrl+C handler: {}", e);
    }
}
