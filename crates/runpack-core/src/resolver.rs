use crate::CoreError;
use runpack_remote::{IndexEntry, IndexSource, RepositoryIndex};
use runpack_schema::{Checksum, Stack, Version, VersionConstraint};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// What a component asks for: a logical dependency, a constraint, a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyDescriptor {
    pub name: String,
    pub constraint: VersionConstraint,
    pub stack: Stack,
}

/// A concrete artifact chosen from a repository index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedDependency {
    pub name: String,
    pub version: Version,
    pub uri: String,
    pub checksum: Checksum,
}

/// Maps dependency descriptors to index entries.
///
/// Each `(name, stack)` index is loaded at most once per resolver.
pub struct Resolver {
    source: Arc<dyn IndexSource>,
    indexes: Mutex<HashMap<(String, Stack), Arc<RepositoryIndex>>>,
}

impl Resolver {
    pub fn new(source: Arc<dyn IndexSource>) -> Self {
        Self {
            source,
            indexes: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolve(&self, descriptor: &DependencyDescriptor) -> Result<ResolvedDependency, CoreError> {
        let index = self.index(&descriptor.name, &descriptor.stack)?;
        let entry = select(&descriptor.name, &index, &descriptor.constraint).ok_or_else(|| {
            CoreError::NoMatchingVersion {
                name: descriptor.name.clone(),
                constraint: descriptor.constraint.to_string(),
                stack: descriptor.stack.to_string(),
            }
        })?;

        info!(
            "resolved {} {} to {}",
            descriptor.name, descriptor.constraint, entry.version
        );
        Ok(ResolvedDependency {
            name: descriptor.name.clone(),
            version: entry.version.clone(),
            uri: entry.uri.clone(),
            checksum: entry.checksum.clone(),
        })
    }

    fn index(&self, name: &str, stack: &Stack) -> Result<Arc<RepositoryIndex>, CoreError> {
        let mut indexes = self.indexes.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (name.to_owned(), stack.clone());
        if let Some(index) = indexes.get(&key) {
            debug!("using memoised index for {name} on {stack}");
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(self.source.load(name, stack)?);
        indexes.insert(key, Arc::clone(&index));
        Ok(index)
    }
}

/// Highest entry satisfying `constraint`. Among identical versions the first
/// in index order wins.
pub fn select<'a>(
    name: &str,
    index: &'a RepositoryIndex,
    constraint: &VersionConstraint,
) -> Option<&'a IndexEntry> {
    let mut best: Option<&IndexEntry> = None;
    for entry in index
        .entries()
        .iter()
        .filter(|e| constraint.matches(&e.version))
    {
        match best {
            Some(current) if entry.version == current.version => {
                warn!(
                    "index for {name} lists {} and {} as the same version; using {}",
                    current.version, entry.version, current.uri
                );
            }
            Some(current) if entry.version < current.version => {}
            _ => best = Some(entry),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use runpack_remote::StaticIndexSource;

    const SHA: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn entry(version: &str, uri: &str) -> IndexEntry {
        IndexEntry {
            version: Version::parse(version).unwrap(),
            uri: uri.to_owned(),
            checksum: Checksum::sha256(SHA).unwrap(),
        }
    }

    fn index(versions: &[&str]) -> RepositoryIndex {
        RepositoryIndex::new(
            versions
                .iter()
                .map(|v| entry(v, &format!("https://repo/{v}.tar")))
                .collect(),
        )
    }

    fn pick<'a>(idx: &'a RepositoryIndex, constraint: &str) -> Option<&'a str> {
        select("dep", idx, &VersionConstraint::parse(constraint).unwrap()).map(|e| e.version.as_str())
    }

    #[test]
    fn wildcard_selects_highest_in_range() {
        let idx = index(&["7.0", "7.1", "8.0"]);
        assert_eq!(pick(&idx, "7.+"), Some("7.1"));
        assert_eq!(pick(&idx, "+"), Some("8.0"));
        assert_eq!(pick(&idx, "9.+"), None);
    }

    #[test]
    fn exact_constraint() {
        let idx = index(&["7.0", "7.1", "8.0"]);
        assert_eq!(pick(&idx, "7.1"), Some("7.1"));
        assert_eq!(pick(&idx, "7.2"), None);
    }

    #[test]
    fn numeric_not_lexical_ordering() {
        let idx = index(&["1.9.0", "1.10.0", "1.2.0"]);
        assert_eq!(pick(&idx, "1.+"), Some("1.10.0"));
    }

    #[test]
    fn release_outranks_qualified() {
        let idx = index(&["1.8.0_392", "1.8.0", "1.8.0_400"]);
        assert_eq!(pick(&idx, "1.8.+"), Some("1.8.0"));
        let idx = index(&["1.8.0_392", "1.8.0_400"]);
        assert_eq!(pick(&idx, "1.8.0_+"), Some("1.8.0_400"));
    }

    #[test]
    fn identical_versions_keep_first() {
        let idx = RepositoryIndex::new(vec![
            entry("2.0", "https://repo/first.tar"),
            entry("2.0.0", "https://repo/second.tar"),
        ]);
        let chosen = select("dep", &idx, &VersionConstraint::any()).unwrap();
        assert_eq!(chosen.uri, "https://repo/first.tar");
    }

    #[test]
    fn selection_is_deterministic() {
        let idx = index(&["3.1", "3.0", "2.9"]);
        let a = pick(&idx, "3.+");
        for _ in 0..10 {
            assert_eq!(pick(&idx, "3.+"), a);
        }
    }

    #[test]
    fn resolver_memoises_index_loads() {
        let source = Arc::new(StaticIndexSource::new().with_index("jdk", "jammy", index(&["17.0.1", "17.0.9"])));
        let resolver = Resolver::new(Arc::clone(&source) as Arc<dyn IndexSource>);
        let descriptor = DependencyDescriptor {
            name: "jdk".to_owned(),
            constraint: VersionConstraint::parse("17.+").unwrap(),
            stack: Stack::from("jammy"),
        };

        let first = resolver.resolve(&descriptor).unwrap();
        let second = resolver.resolve(&descriptor).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.version.as_str(), "17.0.9");
        assert_eq!(source.load_count(), 1);
    }

    #[test]
    fn no_match_names_dependency() {
        let source = StaticIndexSource::new().with_index("jdk", "jammy", index(&["17.0.1"]));
        let resolver = Resolver::new(Arc::new(source));
        let err = resolver
            .resolve(&DependencyDescriptor {
                name: "jdk".to_owned(),
                constraint: VersionConstraint::parse("21.+").unwrap(),
                stack: Stack::from("jammy"),
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::NoMatchingVersion { ref name, .. } if name == "jdk"));
        assert!(err.to_string().contains("21.+"));
    }

    #[test]
    fn unavailable_index_propagates() {
        let resolver = Resolver::new(Arc::new(StaticIndexSource::new()));
        let err = resolver
            .resolve(&DependencyDescriptor {
                name: "jdk".to_owned(),
                constraint: VersionConstraint::any(),
                stack: Stack::from("jammy"),
            })
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Remote(runpack_remote::RemoteError::IndexUnavailable { .. })
        ));
    }
}
