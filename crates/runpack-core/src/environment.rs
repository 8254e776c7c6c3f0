use std::collections::BTreeMap;

/// Snapshot of environment variables captured once per build.
///
/// Components read deploy-time overrides from here instead of the process
/// environment, so a build is reproducible from its inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildEnvironment {
    vars: BTreeMap<String, String>,
}

impl BuildEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the current process environment. Variables that are not
    /// valid UTF-8 are skipped.
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
        }
    }

    #[must_use]
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_owned(), value.to_owned());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for BuildEnvironment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_and_builder() {
        let env = BuildEnvironment::new().with_var("JAVA_OPTS", "-Xmx1g");
        assert_eq!(env.get("JAVA_OPTS"), Some("-Xmx1g"));
        assert_eq!(env.get("MISSING"), None);
        assert_eq!(env.len(), 1);
    }

    #[test]
    fn collects_from_pairs() {
        let env: BuildEnvironment = [("A", "1"), ("B", "2")].into_iter().collect();
        assert_eq!(env.get("B"), Some("2"));
    }

    #[test]
    fn capture_sees_path() {
        let env = BuildEnvironment::capture();
        assert_eq!(env.get("PATH").map(str::to_owned), std::env::var("PATH").ok());
    }
}
