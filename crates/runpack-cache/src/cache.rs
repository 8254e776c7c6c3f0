use crate::cancel::Cancellation;
use crate::digest::{hash_file, Digester};
use crate::layout::{cache_key, CacheLayout};
use crate::lock::KeyLock;
use crate::{fsync_dir, CacheError};
use chrono::{DateTime, Utc};
use runpack_remote::{sanitize_uri, RetryPolicy, Transport, TransportError};
use runpack_schema::{Checksum, ChecksumAlgorithm};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const CHUNK: usize = 64 * 1024;

/// Checksum mismatches tolerated before a download is declared corrupt.
const MISMATCH_ATTEMPTS: u32 = 2;

/// Sidecar record stored next to each published artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub uri: String,
    pub algorithm: ChecksumAlgorithm,
    pub checksum: String,
    pub size: u64,
    pub fetched_at: DateTime<Utc>,
}

impl ArtifactMetadata {
    fn checksum(&self) -> Checksum {
        Checksum {
            algorithm: self.algorithm,
            value: self.checksum.clone(),
        }
    }
}

/// A verified artifact visible in one of the cache roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifact {
    pub path: PathBuf,
    pub metadata: ArtifactMetadata,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptArtifact {
    pub uri: String,
    pub path: PathBuf,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Default)]
pub struct VerifyReport {
    pub checked: usize,
    pub passed: usize,
    pub corrupt: Vec<CorruptArtifact>,
}

struct Staged {
    file: NamedTempFile,
    digest: String,
    size: u64,
}

/// Download cache keyed by URI.
///
/// The writable root is consulted first, then read-only roots, then the
/// network. A key is fetched by at most one thread of this process at a time
/// and by at most one process at a time via a lock file under `locks/`.
pub struct DownloadCache {
    layout: CacheLayout,
    read_only: Vec<CacheLayout>,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    cancel: Cancellation,
    remote_downloads: bool,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DownloadCache {
    pub fn new(root: impl Into<PathBuf>, transport: Arc<dyn Transport>) -> Self {
        Self {
            layout: CacheLayout::new(root),
            read_only: Vec::new(),
            transport,
            retry: RetryPolicy::default(),
            cancel: Cancellation::new(),
            remote_downloads: true,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_read_only_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.read_only.push(CacheLayout::new(root));
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// With remote downloads disabled only published artifacts are served;
    /// a miss fails with [`CacheError::Offline`].
    #[must_use]
    pub fn with_remote_downloads(mut self, enabled: bool) -> Self {
        self.remote_downloads = enabled;
        self
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancel
    }

    /// Return a local path holding the verified bytes of `uri`, downloading
    /// them on a miss.
    pub fn fetch(&self, uri: &str, expected: &Checksum) -> Result<PathBuf, CacheError> {
        let key = cache_key(uri);
        let shown = sanitize_uri(uri);

        if let Some(hit) = self.lookup(&key, uri, expected)? {
            debug!("cache hit for {shown}");
            return Ok(hit);
        }
        if !self.remote_downloads {
            return Err(CacheError::Offline(shown));
        }

        self.cancel.check(&shown)?;
        self.layout.initialize()?;

        self.with_slot(&key, || {
            let _lock = KeyLock::acquire(&self.layout.lock_path(&key))?;

            // Another thread or process may have published while we waited.
            if let Some(hit) = self.lookup(&key, uri, expected)? {
                debug!("{shown} was published while waiting for its lock");
                return Ok(hit);
            }

            info!("downloading {shown}");
            let staged = self.download_verified(uri, &shown, expected)?;
            let path = self.publish(&key, uri, expected, staged)?;
            info!("cached {shown}");
            Ok(path)
        })
    }

    /// Look up a published artifact for `uri` without touching the network.
    pub fn cached(&self, uri: &str) -> Result<Option<CachedArtifact>, CacheError> {
        let key = cache_key(uri);
        let roots = std::iter::once((&self.layout, false))
            .chain(self.read_only.iter().map(|l| (l, true)));
        for (layout, read_only) in roots {
            if let Some(metadata) = read_published(layout, &key)? {
                return Ok(Some(CachedArtifact {
                    path: layout.artifact_path(&key),
                    metadata,
                    read_only,
                }));
            }
        }
        Ok(None)
    }

    /// Remove the artifact for `uri` from the writable root. Returns whether
    /// anything was removed. Read-only roots are never modified.
    pub fn evict(&self, uri: &str) -> Result<bool, CacheError> {
        let key = cache_key(uri);
        let artifact = self.layout.artifact_path(&key);
        let metadata = self.layout.metadata_path(&key);
        if !artifact.exists() && !metadata.exists() {
            return Ok(false);
        }

        self.with_slot(&key, || {
            let _lock = KeyLock::acquire(&self.layout.lock_path(&key))?;

            // Artifact first: once it is gone the entry is invisible.
            let mut removed = false;
            if artifact.exists() {
                fs::remove_file(&artifact)?;
                removed = true;
            }
            if metadata.exists() {
                fs::remove_file(&metadata)?;
                removed = true;
            }
            fsync_dir(&self.layout.artifacts_dir())?;
            info!("evicted {}", sanitize_uri(uri));
            Ok(removed)
        })
    }

    /// All published artifacts across every root, writable root first,
    /// each root sorted by key.
    pub fn list(&self) -> Result<Vec<CachedArtifact>, CacheError> {
        let mut out = Vec::new();
        let roots = std::iter::once((&self.layout, false))
            .chain(self.read_only.iter().map(|l| (l, true)));
        for (layout, read_only) in roots {
            for key in layout.keys()? {
                if let Some(metadata) = read_published(layout, &key)? {
                    out.push(CachedArtifact {
                        path: layout.artifact_path(&key),
                        metadata,
                        read_only,
                    });
                }
            }
        }
        Ok(out)
    }

    /// Re-hash every published artifact and report those whose bytes no
    /// longer match their sidecar.
    pub fn verify_all(&self) -> Result<VerifyReport, CacheError> {
        let mut report = VerifyReport::default();
        for artifact in self.list()? {
            report.checked += 1;
            let actual = hash_file(&artifact.path, artifact.metadata.algorithm)?;
            if actual == artifact.metadata.checksum {
                report.passed += 1;
            } else {
                warn!(
                    "cached artifact {} is corrupt",
                    sanitize_uri(&artifact.metadata.uri)
                );
                report.corrupt.push(CorruptArtifact {
                    uri: artifact.metadata.uri,
                    path: artifact.path,
                    expected: artifact.metadata.checksum,
                    actual,
                });
            }
        }
        Ok(report)
    }

    /// Run `op` holding the in-process slot for `key`. The slot is dropped
    /// from the table once its last holder leaves.
    fn with_slot<T>(
        &self,
        key: &str,
        op: impl FnOnce() -> Result<T, CacheError>,
    ) -> Result<T, CacheError> {
        let slot = {
            let mut map = self.slots();
            Arc::clone(map.entry(key.to_owned()).or_default())
        };
        let result = {
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            op()
        };

        // Clones are taken and released only under the table lock, so a
        // count of one means no other holder remains.
        let mut map = self.slots();
        drop(slot);
        if map.get(key).is_some_and(|s| Arc::strong_count(s) == 1) {
            map.remove(key);
        }
        result
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(
        &self,
        key: &str,
        uri: &str,
        expected: &Checksum,
    ) -> Result<Option<PathBuf>, CacheError> {
        let roots = std::iter::once(&self.layout).chain(self.read_only.iter());
        for layout in roots {
            let Some(metadata) = read_published(layout, key)? else {
                continue;
            };
            let recorded = metadata.checksum();
            if &recorded != expected {
                return Err(CacheError::ChecksumMismatch {
                    uri: sanitize_uri(uri),
                    expected: expected.to_string(),
                    actual: recorded.to_string(),
                });
            }
            return Ok(Some(layout.artifact_path(key)));
        }
        Ok(None)
    }

    fn download_verified(
        &self,
        uri: &str,
        shown: &str,
        expected: &Checksum,
    ) -> Result<Staged, CacheError> {
        let mut attempt = 1;
        loop {
            let staged = self.download(uri, shown, expected.algorithm)?;
            if staged.digest == expected.value {
                return Ok(staged);
            }
            let actual = format!("{}:{}", expected.algorithm, staged.digest);
            drop(staged);
            if attempt >= MISMATCH_ATTEMPTS {
                return Err(CacheError::ChecksumMismatch {
                    uri: shown.to_owned(),
                    expected: expected.to_string(),
                    actual,
                });
            }
            warn!("checksum mismatch for {shown} (got {actual}), downloading again");
            attempt += 1;
        }
    }

    fn download(
        &self,
        uri: &str,
        shown: &str,
        algorithm: ChecksumAlgorithm,
    ) -> Result<Staged, CacheError> {
        self.retry
            .run(
                &format!("download {shown}"),
                |_| self.transfer(uri, shown, algorithm),
                |e| matches!(e, CacheError::Transport(t) if t.is_retryable()),
            )
            .map_err(|e| match e {
                CacheError::Transport(t) => CacheError::DownloadFailed {
                    uri: shown.to_owned(),
                    reason: t.to_string(),
                },
                other => other,
            })
    }

    fn transfer(
        &self,
        uri: &str,
        shown: &str,
        algorithm: ChecksumAlgorithm,
    ) -> Result<Staged, CacheError> {
        self.cancel.check(shown)?;
        let mut reader = self.transport.open(uri)?;
        let mut file = NamedTempFile::new_in(self.layout.tmp_dir())?;
        let mut digester = Digester::new(algorithm);
        let mut buf = vec![0u8; CHUNK];
        let mut size = 0u64;

        loop {
            self.cancel.check(shown)?;
            let n = reader.read(&mut buf).map_err(|e| TransportError::Network {
                uri: shown.to_owned(),
                reason: format!("read failed after {size} bytes: {e}"),
            })?;
            if n == 0 {
                break;
            }
            digester.update(&buf[..n]);
            file.write_all(&buf[..n])?;
            size += n as u64;
        }

        file.as_file().sync_all()?;
        Ok(Staged {
            file,
            digest: digester.finalize_hex(),
            size,
        })
    }

    fn publish(
        &self,
        key: &str,
        uri: &str,
        checksum: &Checksum,
        staged: Staged,
    ) -> Result<PathBuf, CacheError> {
        let dir = self.layout.artifacts_dir();
        let metadata = ArtifactMetadata {
            uri: uri.to_owned(),
            algorithm: checksum.algorithm,
            checksum: checksum.value.clone(),
            size: staged.size,
            fetched_at: Utc::now(),
        };

        // Sidecar first, artifact last: the artifact's presence marks the
        // entry as published.
        let content = serde_json::to_string_pretty(&metadata)?;
        let mut tmp = NamedTempFile::new_in(self.layout.tmp_dir())?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.layout.metadata_path(key))
            .map_err(|e| CacheError::Io(e.error))?;

        let dest = self.layout.artifact_path(key);
        staged
            .file
            .persist(&dest)
            .map_err(|e| CacheError::Io(e.error))?;
        fsync_dir(&dir)?;
        Ok(dest)
    }
}

/// Sidecar of a published entry, or `None` if the artifact is not visible.
fn read_published(layout: &CacheLayout, key: &str) -> Result<Option<ArtifactMetadata>, CacheError> {
    let artifact = layout.artifact_path(key);
    if !artifact.exists() {
        return Ok(None);
    }
    read_metadata(&layout.metadata_path(key))
}

fn read_metadata(path: &Path) -> Result<Option<ArtifactMetadata>, CacheError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runpack_remote::FileTransport;

    fn sha256_of(data: &[u8]) -> Checksum {
        let mut d = Digester::new(ChecksumAlgorithm::Sha256);
        d.update(data);
        Checksum::sha256(&d.finalize_hex()).unwrap()
    }

    fn source_file(dir: &Path, name: &str, data: &[u8]) -> String {
        let path = dir.join(name);
        fs::write(&path, data).unwrap();
        format!("file://{}", path.display())
    }

    #[test]
    fn miss_then_hit() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let uri = source_file(src.path(), "a.bin", b"artifact bytes");
        let cache = DownloadCache::new(root.path(), Arc::new(FileTransport));

        let path = cache.fetch(&uri, &sha256_of(b"artifact bytes")).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"artifact bytes");

        fs::remove_file(src.path().join("a.bin")).unwrap();
        let again = cache.fetch(&uri, &sha256_of(b"artifact bytes")).unwrap();
        assert_eq!(path, again);
    }

    #[test]
    fn sidecar_records_metadata() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let uri = source_file(src.path(), "a.bin", b"12345");
        let cache = DownloadCache::new(root.path(), Arc::new(FileTransport));
        cache.fetch(&uri, &sha256_of(b"12345")).unwrap();

        let entry = cache.cached(&uri).unwrap().unwrap();
        assert_eq!(entry.metadata.uri, uri);
        assert_eq!(entry.metadata.size, 5);
        assert_eq!(entry.metadata.algorithm, ChecksumAlgorithm::Sha256);
        assert!(!entry.read_only);
    }

    #[test]
    fn disagreeing_checksum_fails_without_network() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let uri = source_file(src.path(), "a.bin", b"payload");
        let cache = DownloadCache::new(root.path(), Arc::new(FileTransport));
        cache.fetch(&uri, &sha256_of(b"payload")).unwrap();

        fs::remove_file(src.path().join("a.bin")).unwrap();
        let err = cache.fetch(&uri, &sha256_of(b"other")).unwrap_err();
        assert!(matches!(err, CacheError::ChecksumMismatch { .. }));
    }

    #[test]
    fn missing_source_is_download_failure() {
        let root = tempfile::tempdir().unwrap();
        let cache = DownloadCache::new(root.path(), Arc::new(FileTransport));
        let err = cache
            .fetch("file:///nonexistent/runpack/a.bin", &sha256_of(b"x"))
            .unwrap_err();
        assert!(matches!(err, CacheError::DownloadFailed { ref uri, .. } if uri.contains("a.bin")));
    }

    #[test]
    fn evict_removes_entry() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let uri = source_file(src.path(), "a.bin", b"data");
        let cache = DownloadCache::new(root.path(), Arc::new(FileTransport));
        let path = cache.fetch(&uri, &sha256_of(b"data")).unwrap();

        assert!(cache.evict(&uri).unwrap());
        assert!(!path.exists());
        assert!(cache.cached(&uri).unwrap().is_none());
        assert!(!cache.evict(&uri).unwrap());
    }

    #[test]
    fn read_only_root_is_consulted() {
        let src = tempfile::tempdir().unwrap();
        let stash = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let uri = source_file(src.path(), "a.bin", b"stashed");

        DownloadCache::new(stash.path(), Arc::new(FileTransport))
            .fetch(&uri, &sha256_of(b"stashed"))
            .unwrap();
        fs::remove_file(src.path().join("a.bin")).unwrap();

        let cache =
            DownloadCache::new(root.path(), Arc::new(FileTransport)).with_read_only_root(stash.path());
        let path = cache.fetch(&uri, &sha256_of(b"stashed")).unwrap();
        assert!(path.starts_with(stash.path()));
        assert!(cache.cached(&uri).unwrap().unwrap().read_only);
        assert!(!cache.evict(&uri).unwrap());
    }

    #[test]
    fn list_and_verify_report_corruption() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let a = source_file(src.path(), "a.bin", b"aaa");
        let b = source_file(src.path(), "b.bin", b"bbb");
        let cache = DownloadCache::new(root.path(), Arc::new(FileTransport));
        cache.fetch(&a, &sha256_of(b"aaa")).unwrap();
        let b_path = cache.fetch(&b, &sha256_of(b"bbb")).unwrap();

        assert_eq!(cache.list().unwrap().len(), 2);
        assert!(cache.verify_all().unwrap().corrupt.is_empty());

        fs::write(&b_path, b"tampered").unwrap();
        let report = cache.verify_all().unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.passed, 1);
        assert_eq!(report.corrupt.len(), 1);
        assert_eq!(report.corrupt[0].uri, b);
    }

    #[test]
    fn cancelled_fetch_publishes_nothing() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let uri = source_file(src.path(), "a.bin", b"data");
        let cancel = Cancellation::new();
        cancel.cancel();
        let cache =
            DownloadCache::new(root.path(), Arc::new(FileTransport)).with_cancellation(cancel);

        let err = cache.fetch(&uri, &sha256_of(b"data")).unwrap_err();
        assert!(matches!(err, CacheError::Cancelled(_)));
        assert!(cache.cached(&uri).unwrap().is_none());
    }

    struct CountingTransport {
        opens: std::sync::atomic::AtomicUsize,
    }

    impl Transport for CountingTransport {
        fn open(&self, uri: &str) -> Result<Box<dyn Read>, TransportError> {
            self.opens
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            FileTransport.open(uri)
        }
    }

    #[test]
    fn offline_miss_never_opens_transport() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let uri = source_file(src.path(), "a.bin", b"remote");
        let transport = Arc::new(CountingTransport {
            opens: std::sync::atomic::AtomicUsize::new(0),
        });
        let cache = DownloadCache::new(root.path(), transport.clone()).with_remote_downloads(false);

        let err = cache.fetch(&uri, &sha256_of(b"remote")).unwrap_err();
        assert!(matches!(err, CacheError::Offline(ref shown) if shown.contains("a.bin")));
        assert_eq!(transport.opens.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(cache.cached(&uri).unwrap().is_none());
    }

    #[test]
    fn offline_serves_published_artifacts() {
        let src = tempfile::tempdir().unwrap();
        let stash = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let local = source_file(src.path(), "a.bin", b"local");
        let stashed = source_file(src.path(), "b.bin", b"stashed");

        DownloadCache::new(root.path(), Arc::new(FileTransport))
            .fetch(&local, &sha256_of(b"local"))
            .unwrap();
        DownloadCache::new(stash.path(), Arc::new(FileTransport))
            .fetch(&stashed, &sha256_of(b"stashed"))
            .unwrap();

        let cache = DownloadCache::new(root.path(), Arc::new(FileTransport))
            .with_read_only_root(stash.path())
            .with_remote_downloads(false);
        let a = cache.fetch(&local, &sha256_of(b"local")).unwrap();
        assert!(a.starts_with(root.path()));
        let b = cache.fetch(&stashed, &sha256_of(b"stashed")).unwrap();
        assert!(b.starts_with(stash.path()));
    }

    #[test]
    fn slots_are_released_after_use() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let cache = DownloadCache::new(root.path(), Arc::new(FileTransport));
        for i in 0..5 {
            let body = format!("artifact {i}");
            let uri = source_file(src.path(), &format!("{i}.bin"), body.as_bytes());
            cache.fetch(&uri, &sha256_of(body.as_bytes())).unwrap();
            assert!(cache.evict(&uri).unwrap());
        }
        let failed = cache.fetch("file:///nonexistent/runpack/x.bin", &sha256_of(b"x"));
        assert!(failed.is_err());
        assert!(cache.slots().is_empty());
    }

    #[test]
    fn blake3_checksums_are_supported() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let uri = source_file(src.path(), "a.bin", b"b3");
        let cache = DownloadCache::new(root.path(), Arc::new(FileTransport));
        let expected = Checksum::blake3(blake3::hash(b"b3").to_hex().as_str()).unwrap();
        let path = cache.fetch(&uri, &expected).unwrap();
        assert_eq!(fs::read(path).unwrap(), b"b3");
    }
}
