//! Content-verified download cache for runpack.
//!
//! Artifacts are keyed by URI and only become visible after their bytes have
//! been hashed and matched against the checksum the repository index
//! published. Downloads stream into temporary files next to the cache and are
//! published with an atomic rename, so concurrent builds (threads or
//! processes) either see a complete verified artifact or nothing.

pub mod cache;
pub mod cancel;
pub mod digest;
pub mod layout;
pub mod lock;

pub use cache::{ArtifactMetadata, CachedArtifact, CorruptArtifact, DownloadCache, VerifyReport};
pub use cancel::Cancellation;
pub use digest::{hash_file, Digester};
pub use layout::{cache_key, CacheLayout};
pub use lock::KeyLock;

use runpack_remote::TransportError;
use std::path::Path;
use thiserror::Error;

/// Fsync a directory so that a preceding rename into it is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache metadata error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("download of {uri} failed: {reason}")]
    DownloadFailed { uri: String, reason: String },
    #[error("checksum mismatch for {uri}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        uri: String,
        expected: String,
        actual: String,
    },
    #[error("cancelled while fetching {0}")]
    Cancelled(String),
    #[error("remote downloads are disabled and {0} is not cached")]
    Offline(String),
    #[error("cache lock acquisition failed: {0}")]
    LockFailed(String),
}
