use super::{marker_present, stage_dependency};
use crate::component::{Component, ComponentContext, StageContext};
use crate::resolver::ResolvedDependency;
use crate::CoreError;
use runpack_schema::{Category, ComponentConfig, ComponentId};

/// Stages a versioned artifact into the application. Contributes nothing to
/// the start command.
pub struct ArtifactComponent {
    id: ComponentId,
    category: Category,
    detect_file: Option<String>,
    dependency: Option<ResolvedDependency>,
    ctx: ComponentContext,
}

impl ArtifactComponent {
    pub fn new(
        config: &ComponentConfig,
        dependency: Option<ResolvedDependency>,
        ctx: ComponentContext,
    ) -> Self {
        Self {
            id: config.id.clone(),
            category: config.category(),
            detect_file: config.detect_file.clone(),
            dependency: dependency.filter(|_| config.enabled),
            ctx,
        }
    }
}

impl Component for ArtifactComponent {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn category(&self) -> &Category {
        &self.category
    }

    fn detect(&self) -> Result<Option<String>, CoreError> {
        let Some(dep) = &self.dependency else {
            return Ok(None);
        };
        if !marker_present(&self.ctx.app_dir, self.detect_file.as_deref()) {
            return Ok(None);
        }
        Ok(Some(format!("{}={}", self.id, dep.version)))
    }

    fn compile(&self, ctx: &StageContext<'_>) -> Result<(), CoreError> {
        if let Some(dep) = &self.dependency {
            stage_dependency(&self.id, dep, ctx)?;
        }
        Ok(())
    }
}
