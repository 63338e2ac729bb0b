//! yt-dlp based resolver.
//!
//! Runs the `yt-dlp` binary in URL-print mode and classifies its stderr.
//! Direct HTTPS formats are preferred over HLS/DASH so the proxy can relay
//! the stream with plain HTTP range-less GETs: opus-in-webm first, then any
//! HTTPS audio, then whatever is best.

use crate::{ResolverError, Result, StreamResolver};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Format selector handed to yt-dlp.
const FORMAT: &str =
    "bestaudio[protocol^=https][ext=webm]/bestaudio[protocol^=https]/bestaudio/best";

/// Pause before the single internal retry on a transport-looking failure.
const RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Resolver shelling out to yt-dlp.
pub struct YtDlpResolver {
    binary: String,
}

impl YtDlpResolver {
    /// Creates a resolver using the given yt-dlp executable (name or path).
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, video_id: &str) -> Result<String> {
        let video_url = format!("https://youtube.com/watch?v={video_id}");

        let output = Command::new(&self.binary)
            .arg("-f")
            .arg(FORMAT)
            .arg("--no-warnings")
            .arg("--no-check-certificates")
            .arg("--skip-download")
            .arg("--print")
            .arg("urls")
            .arg(&video_url)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(video_id, &stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
            Some(url) => {
                debug!(video_id, "Extracted stream URL");
                Ok(url.to_string())
            }
            None => Err(ResolverError::Extraction(format!(
                "yt-dlp printed no URL for {video_id}"
            ))),
        }
    }
}

impl StreamResolver for YtDlpResolver {
    fn resolve(&self, video_id: &str) -> Result<String> {
        match self.run(video_id) {
            Err(ResolverError::Extraction(msg)) if looks_transient(&msg) => {
                // Transport hiccups are worth one more attempt before the
                // caller falls back to its stale URL.
                debug!(video_id, "Transient resolver failure, retrying once");
                std::thread::sleep(RETRY_PAUSE);
                self.run(video_id).map_err(|e| {
                    warn!(video_id, error = %e, "Resolver retry failed");
                    e
                })
            }
            other => other,
        }
    }
}

/// Maps yt-dlp stderr to a resolver error.
///
/// Permanently unplayable videos are reported at info level only; they are
/// an expected state of the library, not a fault of ours.
fn classify_failure(video_id: &str, stderr: &str) -> ResolverError {
    let lower = stderr.to_lowercase();

    let reason = if lower.contains("private video") || lower.contains("this video is private") {
        Some("private")
    } else if lower.contains("video unavailable") || lower.contains("not available") {
        Some("unavailable")
    } else if lower.contains("region") || lower.contains("blocked") {
        Some("region locked")
    } else if lower.contains("removed") || lower.contains("deleted") {
        Some("removed")
    } else {
        None
    };

    match reason {
        Some(reason) => {
            info!(video_id, reason, "Video cannot be played");
            ResolverError::Unavailable(format!("{video_id}: {reason}"))
        }
        None => {
            let first_line = stderr.lines().next().unwrap_or("unknown error");
            ResolverError::Extraction(format!("{video_id}: {first_line}"))
        }
    }
}

fn looks_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("network") || lower.contains("timeout") || lower.contains("timed out")
}
