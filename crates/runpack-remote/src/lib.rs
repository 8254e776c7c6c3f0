//! Artifact transport and repository index access for runpack.
//!
//! This crate provides the outbound side of a build: a `Transport` trait with
//! HTTP (`ureq`) and local-file implementations, a bounded `RetryPolicy`, and
//! the repository index client that maps a dependency name and stack to its
//! published versions.

pub mod file;
pub mod http;
pub mod index;
pub mod retry;

pub use file::FileTransport;
pub use http::HttpTransport;
pub use index::{
    expand_repository_root, host_architecture, IndexEntry, IndexSource, RepositoryIndex,
    RepositoryIndexSource, StaticIndexSource, INDEX_FILE,
};
pub use retry::RetryPolicy;

use std::io::Read;
use std::time::Duration;
use thiserror::Error;

/// Value of the `User-Agent` header on outbound requests.
pub const USER_AGENT: &str = concat!("runpack/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error reading {uri}: {source}")]
    Io {
        uri: String,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP {code} for {uri}")]
    Status { uri: String, code: u16 },
    #[error("network failure for {uri}: {reason}")]
    Network { uri: String, reason: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unsupported URI scheme: {0}")]
    UnsupportedScheme(String),
}

impl TransportError {
    /// Whether a fresh attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Status { .. } | Self::Network { .. })
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("repository index for '{name}' unavailable at {uri}: {reason}")]
    IndexUnavailable {
        name: String,
        uri: String,
        reason: String,
    },
}

/// Source of artifact bytes keyed by URI.
pub trait Transport: Send + Sync {
    /// Open a byte stream for `uri`. The stream may fail mid-read; callers
    /// treat such failures like connection errors.
    fn open(&self, uri: &str) -> Result<Box<dyn Read>, TransportError>;
}

/// Dispatches on URI scheme: `http(s)://` goes over the network, `file://`
/// and bare paths are read from disk.
pub struct DefaultTransport {
    http: HttpTransport,
    file: FileTransport,
}

impl DefaultTransport {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            http: HttpTransport::new(timeout),
            file: FileTransport,
        }
    }
}

impl Default for DefaultTransport {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Transport for DefaultTransport {
    fn open(&self, uri: &str) -> Result<Box<dyn Read>, TransportError> {
        match scheme(uri) {
            Some("http" | "https") => self.http.open(uri),
            Some("file") | None => self.file.open(uri),
            Some(other) => Err(TransportError::UnsupportedScheme(other.to_owned())),
        }
    }
}

fn scheme(uri: &str) -> Option<&str> {
    let (scheme, _) = uri.split_once("://")?;
    Some(scheme)
}

/// Strip credentials from a URI before it is logged.
pub fn sanitize_uri(uri: &str) -> String {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_owned();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{scheme}://{}", &rest[at + 1..]),
        None => uri.to_owned(),
    }
}
