//! Component orchestration and dependency resolution for runpack.
//!
//! This crate ties together the schema, the repository index client and the
//! download cache into the `Engine`: it instantiates components from
//! configuration, runs the detect/compile/release protocol through the
//! `Registry`, resolves versioned artifacts with the `Resolver`, and merges
//! release fragments into a `ReleaseManifest` with the assembler.

pub mod assembler;
pub mod component;
pub mod components;
pub mod concurrency;
pub mod engine;
pub mod environment;
pub mod registry;
pub mod resolver;

pub use assembler::{assemble, shell_quote, CommandFragment, Contribution, ReleaseFragment};
pub use component::{Component, ComponentContext, StageContext};
pub use components::{instantiate, may_participate, STAGING_DIR};
pub use concurrency::install_signal_handler;
pub use engine::{BuildResult, Engine};
pub use environment::BuildEnvironment;
pub use registry::{CategoryRules, CompileOptions, Detection, Participant, Registry};
pub use resolver::{DependencyDescriptor, ResolvedDependency, Resolver};

use runpack_schema::{Category, ComponentId};
use std::fmt;
use thiserror::Error;

/// Protocol phase in which a component failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Resolve,
    Detect,
    Compile,
    Release,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Resolve => "resolve",
            Self::Detect => "detect",
            Self::Compile => "compile",
            Self::Release => "release",
        })
    }
}

fn join_ids(ids: &[ComponentId]) -> String {
    ids.iter()
        .map(ComponentId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Schema(#[from] runpack_schema::SchemaError),
    #[error("remote error: {0}")]
    Remote(#[from] runpack_remote::RemoteError),
    #[error("cache error: {0}")]
    Cache(#[from] runpack_cache::CacheError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("components {} conflict in exclusive category '{category}'", join_ids(.components))]
    Conflict {
        category: Category,
        components: Vec<ComponentId>,
    },
    #[error("no applicable component in required category '{0}'")]
    NoApplicableComponent(Category),
    #[error("no version of '{name}' matching {constraint} for stack '{stack}'")]
    NoMatchingVersion {
        name: String,
        constraint: String,
        stack: String,
    },
    #[error("no component contributed a start command")]
    NoStartCommand,
    #[error("components {} each contributed a start command", join_ids(.0))]
    MultipleMainCommands(Vec<ComponentId>),
    #[error("component '{id}' failed during {phase}: {source}")]
    Component {
        id: ComponentId,
        phase: Phase,
        #[source]
        source: Box<CoreError>,
    },
}

impl CoreError {
    pub(crate) fn in_component(self, id: &ComponentId, phase: Phase) -> Self {
        Self::Component {
            id: id.clone(),
            phase,
            source: Box::new(self),
        }
    }

    /// The underlying error with any component attribution peeled off.
    pub fn root(&self) -> &CoreError {
        match self {
            Self::Component { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the root cause is a user configuration problem.
    pub fn is_config(&self) -> bool {
        matches!(self.root(), Self::Schema(_))
    }

    /// Whether the root cause lies in artifact retrieval or verification.
    pub fn is_cache(&self) -> bool {
        matches!(self.root(), Self::Cache(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.root(),
            Self::Cache(runpack_cache::CacheError::Cancelled(_))
        )
    }
}
