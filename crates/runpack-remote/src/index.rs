//! Repository index client.
//!
//! A repository publishes `index.yml` at its root: a mapping from version to
//! download location and checksum. Entry order is preserved so that callers
//! can break ties deterministically.
//!
//! ```yaml
//! "17.0.9":  { uri: "https://repo.example.com/jdk-17.0.9.tar", sha256: "<hex>" }
//! "17.0.10": { uri: "https://repo.example.com/jdk-17.0.10.tar", checksum: "<hex>", algorithm: blake3 }
//! ```

use crate::{RemoteError, RetryPolicy, Transport, TransportError};
use runpack_schema::{Checksum, ChecksumAlgorithm, Stack, Version};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// File name of the index below a repository root.
pub const INDEX_FILE: &str = "index.yml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub version: Version,
    pub uri: String,
    pub checksum: Checksum,
}

/// Parsed index for one dependency on one stack, in publication order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryIndex {
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEntry {
    uri: String,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    blake3: Option<String>,
    #[serde(default)]
    checksum: Option<String>,
    #[serde(default)]
    algorithm: Option<ChecksumAlgorithm>,
}

impl RawEntry {
    fn checksum(&self) -> Result<Checksum, String> {
        let parsed = match (&self.sha256, &self.blake3, &self.checksum) {
            (Some(v), None, None) => Checksum::sha256(v),
            (None, Some(v), None) => Checksum::blake3(v),
            (None, None, Some(v)) => {
                Checksum::new(self.algorithm.unwrap_or(ChecksumAlgorithm::Sha256), v)
            }
            (None, None, None) => return Err("entry has no checksum".to_owned()),
            _ => return Err("entry declares more than one checksum".to_owned()),
        };
        parsed.map_err(|e| e.to_string())
    }
}

impl RepositoryIndex {
    pub fn new(entries: Vec<IndexEntry>) -> Self {
        Self { entries }
    }

    /// Parse index YAML (JSON is accepted as a subset). Entries with an
    /// illegal version, unknown fields, or a missing checksum are discarded
    /// with a warning, as are later duplicates of a version key; only an
    /// unreadable document is an error.
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_yaml::Error> {
        let OrderedPairs(pairs) = serde_yaml::from_slice(bytes)?;
        let mut seen = HashSet::with_capacity(pairs.len());
        let mut entries = Vec::with_capacity(pairs.len());

        for (key, value) in pairs {
            let raw_version = match key {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) if n.is_u64() => n.to_string(),
                serde_yaml::Value::Number(n) => {
                    warn!("discarding unquoted version key {n}: quote versions in the index");
                    continue;
                }
                other => {
                    warn!("discarding index entry with non-scalar key {other:?}");
                    continue;
                }
            };

            if !seen.insert(raw_version.clone()) {
                warn!("discarding duplicate index entry {raw_version}, keeping the first");
                continue;
            }

            let version = match Version::parse(&raw_version) {
                Ok(v) => v,
                Err(e) => {
                    warn!("discarding illegal version {raw_version}: {e}");
                    continue;
                }
            };

            let raw: RawEntry = match serde_yaml::from_value(value) {
                Ok(r) => r,
                Err(e) => {
                    warn!("discarding index entry {raw_version}: {e}");
                    continue;
                }
            };

            match raw.checksum() {
                Ok(checksum) => entries.push(IndexEntry {
                    version,
                    uri: raw.uri,
                    checksum,
                }),
                Err(reason) => warn!("discarding index entry {raw_version}: {reason}"),
            }
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Top-level index mapping read pair by pair in document order. Unlike
/// `serde_yaml::Mapping` this tolerates repeated keys.
struct OrderedPairs(Vec<(serde_yaml::Value, serde_yaml::Value)>);

impl<'de> Deserialize<'de> for OrderedPairs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PairsVisitor;

        impl<'de> Visitor<'de> for PairsVisitor {
            type Value = OrderedPairs;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping from version to index entry")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<OrderedPairs, A::Error> {
                let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(pair) = map.next_entry()? {
                    pairs.push(pair);
                }
                Ok(OrderedPairs(pairs))
            }
        }

        deserializer.deserialize_map(PairsVisitor)
    }
}

/// Provider of repository indexes keyed by dependency name and stack.
pub trait IndexSource: Send + Sync {
    fn load(&self, name: &str, stack: &Stack) -> Result<RepositoryIndex, RemoteError>;
}

/// Expand `{stack}`, `{platform}` and `{architecture}` in a repository root
/// template and drop any trailing slash.
pub fn expand_repository_root(template: &str, stack: &str, architecture: &str) -> String {
    template
        .replace("{stack}", stack)
        .replace("{platform}", stack)
        .replace("{architecture}", architecture)
        .trim_end_matches('/')
        .to_owned()
}

/// Architecture name used in repository paths (`x86_64`, `aarch64`, ...).
pub fn host_architecture() -> &'static str {
    std::env::consts::ARCH
}

/// Fetches `<root>/index.yml` through a [`Transport`] for each configured
/// dependency.
pub struct RepositoryIndexSource {
    roots: BTreeMap<String, String>,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    architecture: String,
}

impl RepositoryIndexSource {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryPolicy) -> Self {
        Self {
            roots: BTreeMap::new(),
            transport,
            retry,
            architecture: host_architecture().to_owned(),
        }
    }

    #[must_use]
    pub fn with_repository(mut self, name: &str, repository_root: &str) -> Self {
        self.roots
            .insert(name.to_owned(), repository_root.to_owned());
        self
    }

    #[must_use]
    pub fn with_architecture(mut self, architecture: &str) -> Self {
        architecture.clone_into(&mut self.architecture);
        self
    }

    pub fn index_uri(&self, name: &str, stack: &Stack) -> Option<String> {
        self.roots.get(name).map(|root| {
            format!(
                "{}/{INDEX_FILE}",
                expand_repository_root(root, stack, &self.architecture)
            )
        })
    }

    fn fetch(&self, uri: &str) -> Result<Vec<u8>, TransportError> {
        self.retry.run(
            &format!("index {uri}"),
            |_| {
                let mut body = Vec::new();
                self.transport
                    .open(uri)?
                    .read_to_end(&mut body)
                    .map_err(|e| TransportError::Network {
                        uri: uri.to_owned(),
                        reason: e.to_string(),
                    })?;
                Ok(body)
            },
            TransportError::is_retryable,
        )
    }
}

impl IndexSource for RepositoryIndexSource {
    fn load(&self, name: &str, stack: &Stack) -> Result<RepositoryIndex, RemoteError> {
        let Some(uri) = self.index_uri(name, stack) else {
            return Err(RemoteError::IndexUnavailable {
                name: name.to_owned(),
                uri: String::new(),
                reason: "no repository configured".to_owned(),
            });
        };

        debug!("loading repository index for {name} from {uri}");
        let unavailable = |reason: String| RemoteError::IndexUnavailable {
            name: name.to_owned(),
            uri: uri.clone(),
            reason,
        };

        let body = self.fetch(&uri).map_err(|e| unavailable(e.to_string()))?;
        let index = RepositoryIndex::parse(&body)
            .map_err(|e| unavailable(format!("malformed index: {e}")))?;
        debug!("index for {name} has {} usable entries", index.len());
        Ok(index)
    }
}

/// In-memory indexes, for pre-resolved mirrors and tests.
#[derive(Default)]
pub struct StaticIndexSource {
    indexes: BTreeMap<(String, String), RepositoryIndex>,
    loads: AtomicUsize,
}

impl StaticIndexSource {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_index(mut self, name: &str, stack: &str, index: RepositoryIndex) -> Self {
        self.indexes
            .insert((name.to_owned(), stack.to_owned()), index);
        self
    }

    /// Number of `load` calls served so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl IndexSource for StaticIndexSource {
    fn load(&self, name: &str, stack: &Stack) -> Result<RepositoryIndex, RemoteError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.indexes
            .get(&(name.to_owned(), stack.to_string()))
            .cloned()
            .ok_or_else(|| RemoteError::IndexUnavailable {
                name: name.to_owned(),
                uri: format!("static:{name}/{stack}"),
                reason: "no index registered".to_owned(),
            })
    }
}
