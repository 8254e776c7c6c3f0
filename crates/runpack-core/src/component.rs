use crate::assembler::ReleaseFragment;
use crate::environment::BuildEnvironment;
use crate::CoreError;
use runpack_cache::DownloadCache;
use runpack_schema::{Category, ComponentId};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Facts shared by every component of one build, fixed at construction.
#[derive(Debug, Clone)]
pub struct ComponentContext {
    pub app_dir: PathBuf,
    pub env: Arc<BuildEnvironment>,
}

impl ComponentContext {
    pub fn new(app_dir: impl Into<PathBuf>, env: BuildEnvironment) -> Self {
        Self {
            app_dir: app_dir.into(),
            env: Arc::new(env),
        }
    }
}

/// What a component may touch while compiling.
pub struct StageContext<'a> {
    pub app_dir: &'a Path,
    pub cache: &'a DownloadCache,
}

/// A pluggable participant in the detect/compile/release protocol.
///
/// Instances are created once per build from configuration and discarded
/// afterwards. `compile` and `release` are only called when `detect`
/// returned a non-empty tag.
pub trait Component: Send + Sync {
    fn id(&self) -> &ComponentId;

    fn category(&self) -> &Category;

    /// A non-empty tag when this component applies to the application.
    fn detect(&self) -> Result<Option<String>, CoreError>;

    fn compile(&self, ctx: &StageContext<'_>) -> Result<(), CoreError>;

    fn release(&self) -> Result<Option<ReleaseFragment>, CoreError> {
        Ok(None)
    }
}
