use std::fs;
use std::path::{Path, PathBuf};

const ARTIFACT_SUFFIX: &str = "cached";
const METADATA_SUFFIX: &str = "json";
const LOCK_SUFFIX: &str = "lock";

/// Stable cache key for a URI: the blake3 hash of its bytes, hex encoded.
pub fn cache_key(uri: &str) -> String {
    blake3::hash(uri.as_bytes()).to_hex().to_string()
}

/// Directory layout of one cache root.
///
/// ```text
/// <root>/artifacts/<key>.cached   published artifact bytes
/// <root>/artifacts/<key>.json     sidecar metadata
/// <root>/locks/<key>.lock         per-key cross-process lock
/// <root>/tmp/                     in-flight downloads
/// ```
///
/// Read-only roots only need the `artifacts` directory.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    #[inline]
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    /// Staging area for downloads. Lives on the same filesystem as
    /// `artifacts` so publishing is a rename.
    #[inline]
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    #[inline]
    pub fn artifact_path(&self, key: &str) -> PathBuf {
        self.artifacts_dir()
            .join(format!("{key}.{ARTIFACT_SUFFIX}"))
    }

    #[inline]
    pub fn metadata_path(&self, key: &str) -> PathBuf {
        self.artifacts_dir()
            .join(format!("{key}.{METADATA_SUFFIX}"))
    }

    #[inline]
    pub fn lock_path(&self, key: &str) -> PathBuf {
        self.locks_dir().join(format!("{key}.{LOCK_SUFFIX}"))
    }

    pub fn initialize(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(self.artifacts_dir())?;
        fs::create_dir_all(self.locks_dir())?;
        fs::create_dir_all(self.tmp_dir())?;
        Ok(())
    }

    /// Keys that have a sidecar in this root, sorted.
    pub fn keys(&self) -> Result<Vec<String>, std::io::Error> {
        let dir = self.artifacts_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(key) = name.strip_suffix(&format!(".{METADATA_SUFFIX}")) {
                if !key.starts_with('.') {
                    keys.push(key.to_owned());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
