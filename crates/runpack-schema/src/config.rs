use crate::types::{Category, ComponentId};
use crate::version::VersionConstraint;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level `runpack.toml` configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RunpackConfig {
    pub stack: String,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub categories: CategorySection,
    #[serde(default)]
    pub compile: CompileSection,
    #[serde(default)]
    pub components: Vec<ComponentConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub read_only_roots: Vec<PathBuf>,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// When false, only artifacts already in a cache root are used.
    #[serde(default = "default_remote_downloads")]
    pub remote_downloads: bool,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            root: None,
            read_only_roots: Vec::new(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            timeout_secs: None,
            remote_downloads: default_remote_downloads(),
        }
    }
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_remote_downloads() -> bool {
    true
}

/// Which categories are mutually exclusive and which must be filled.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CategorySection {
    #[serde(default = "default_exclusive")]
    pub exclusive: BTreeSet<Category>,
    #[serde(default = "default_required")]
    pub required: BTreeSet<Category>,
}

impl Default for CategorySection {
    fn default() -> Self {
        Self {
            exclusive: default_exclusive(),
            required: default_required(),
        }
    }
}

fn default_exclusive() -> BTreeSet<Category> {
    [Category::CONTAINER, Category::JRE]
        .into_iter()
        .map(Category::from)
        .collect()
}

fn default_required() -> BTreeSet<Category> {
    std::iter::once(Category::from(Category::CONTAINER)).collect()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CompileSection {
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub max_workers: Option<usize>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// Stages a versioned artifact; contributes nothing at release.
    Artifact,
    /// Detects by marker file and supplies the main start command.
    Command,
    /// Stages an artifact and launches it alongside the main process.
    Coprocess,
}

impl ComponentKind {
    pub fn default_category(self) -> &'static str {
        match self {
            Self::Artifact => Category::FRAMEWORK,
            Self::Command => Category::CONTAINER,
            Self::Coprocess => Category::AGENT,
        }
    }
}

/// One `[[components]]` entry.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ComponentConfig {
    pub id: ComponentId,
    pub kind: ComponentKind,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Path relative to the application directory whose presence enables detection.
    #[serde(default)]
    pub detect_file: Option<String>,
    /// Launch words; already quoted for the target shell.
    #[serde(default)]
    pub command: Vec<String>,
    /// Environment variable whose value is appended verbatim to the launch words.
    #[serde(default)]
    pub additional_args_env: Option<String>,
    #[serde(default)]
    pub dependency: Option<DependencyConfig>,
}

fn default_enabled() -> bool {
    true
}

impl ComponentConfig {
    pub fn category(&self) -> Category {
        self.category
            .clone()
            .unwrap_or_else(|| Category::from(self.kind.default_category()))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DependencyConfig {
    /// Logical dependency name; defaults to the component id.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: VersionConstraint,
    pub repository_root: String,
}

impl RunpackConfig {
    /// Structural checks that serde cannot express.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.stack.trim().is_empty() {
            return Err(SchemaError::Config("stack must not be empty".to_owned()));
        }

        let mut seen = BTreeSet::new();
        for component in &self.components {
            validate_component_id(&component.id)?;
            if !seen.insert(component.id.as_str()) {
                return Err(SchemaError::DuplicateComponent(component.id.to_string()));
            }

            match component.kind {
                ComponentKind::Artifact | ComponentKind::Coprocess
                    if component.dependency.is_none() =>
                {
                    return Err(SchemaError::Config(format!(
                        "component '{}' requires a [dependency] table",
                        component.id
                    )));
                }
                ComponentKind::Command | ComponentKind::Coprocess
                    if component.command.is_empty() =>
                {
                    return Err(SchemaError::Config(format!(
                        "component '{}' requires a non-empty command",
                        component.id
                    )));
                }
                _ => {}
            }

            if component.kind == ComponentKind::Command && component.detect_file.is_none() {
                return Err(SchemaError::Config(format!(
                    "component '{}' requires detect_file",
                    component.id
                )));
            }

            if let Some(dep) = &component.dependency {
                if dep.repository_root.trim().is_empty() {
                    return Err(SchemaError::Config(format!(
                        "component '{}': repository_root must not be empty",
                        component.id
                    )));
                }
            }
        }

        if let Some(0) = self.compile.max_workers {
            return Err(SchemaError::Config(
                "compile.max_workers must be at least 1".to_owned(),
            ));
        }

        Ok(())
    }
}

fn validate_component_id(id: &ComponentId) -> Result<(), SchemaError> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SchemaError::Config(format!(
            "invalid component id '{id}': use [A-Za-z0-9_-]"
        )))
    }
}

pub fn parse_config_str(input: &str) -> Result<RunpackConfig, SchemaError> {
    let config: RunpackConfig = toml::from_str(input)?;
    config.validate()?;
    Ok(config)
}

pub fn parse_config_file(path: impl AsRef<Path>) -> Result<RunpackConfig, SchemaError> {
    let content = fs::read_to_string(path)?;
    parse_config_str(&content)
}
