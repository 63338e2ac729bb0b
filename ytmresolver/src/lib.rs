//! # ytmresolver - Stream URL resolution
//!
//! Turns a YouTube video ID into a direct, playable audio URL. The only
//! shipped implementation shells out to `yt-dlp`, which is slow (network
//! plus an external process), so the trait is deliberately blocking: callers
//! on an async runtime must dispatch through `spawn_blocking` and never call
//! [`StreamResolver::resolve`] inline on a request path.

mod ytdlp;

pub use ytdlp::YtDlpResolver;

/// Errors produced while resolving a video ID.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    /// The video exists but cannot be played (private, removed, region
    /// locked). Retrying will not help.
    #[error("video not available: {0}")]
    Unavailable(String),

    /// The extraction tool ran but produced no usable URL.
    #[error("URL extraction failed: {0}")]
    Extraction(String),

    /// The resolver binary could not be spawned at all.
    #[error("failed to run resolver: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Result type for resolver operations.
pub type Result<T> = std::result::Result<T, ResolverError>;

/// Resolves a video ID to a fresh direct stream URL.
///
/// Implementations may block the calling thread and may cache internally;
/// both are opaque to callers.
pub trait StreamResolver: Send + Sync {
    fn resolve(&self, video_id: &str) -> Result<String>;
}
