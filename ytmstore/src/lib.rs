//! # ytmstore - Persistent track metadata store
//!
//! SQLite-backed mapping from YouTube video IDs to their last known direct
//! stream URL and display metadata. The store is the single source of truth
//! consumed by the ICY proxy: the sync side inserts tracks, the proxy reads
//! them and writes back refreshed URLs as they expire.
//!
//! All operations go through one `Mutex<Connection>` so a reader can never
//! observe a half-applied write. Reads may be momentarily stale under
//! concurrent writers, which is acceptable here; corruption is not.

mod store;

pub use store::{StoreError, TrackRecord, TrackStore};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
