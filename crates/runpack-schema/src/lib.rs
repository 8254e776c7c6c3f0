//! Configuration, version, and manifest types for runpack.
//!
//! This crate defines the schema layer: tokenized versions and wildcard
//! constraints (`Version`, `VersionConstraint`), the `runpack.toml`
//! configuration record (`RunpackConfig`), artifact checksums, identifier newtypes, and the
//! release manifest handed to the platform (`ReleaseManifest`).

pub mod checksum;
pub mod config;
pub mod manifest;
pub mod types;
pub mod version;

pub use checksum::{Checksum, ChecksumAlgorithm};
pub use config::{
    parse_config_file, parse_config_str, CacheSection, CategorySection, CompileSection,
    ComponentConfig, ComponentKind, DependencyConfig, RunpackConfig,
};
pub use manifest::{ReleaseManifest, ReleasePayload, WEB_PROCESS_TYPE};
pub use types::{Category, ComponentId, Stack};
pub use version::{Version, VersionConstraint};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("duplicate component id '{0}'")]
    DuplicateComponent(String),
    #[error("invalid version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },
    #[error("manifest serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("manifest serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
