use super::{expand_words, marker_present, stage_dependency};
use crate::assembler::{CommandFragment, ReleaseFragment};
use crate::component::{Component, ComponentContext, StageContext};
use crate::resolver::ResolvedDependency;
use crate::CoreError;
use runpack_schema::{Category, ComponentConfig, ComponentId};

/// Stages an agent and launches it in the background next to the main
/// process, e.g. `($PWD/.runpack/jaeger/bin/agent --reporter $JAEGER_ARGS &)`.
pub struct CoprocessComponent {
    id: ComponentId,
    category: Category,
    detect_file: Option<String>,
    command: Vec<String>,
    additional_args_env: Option<String>,
    dependency: Option<ResolvedDependency>,
    ctx: ComponentContext,
}

impl CoprocessComponent {
    pub fn new(
        config: &ComponentConfig,
        dependency: Option<ResolvedDependency>,
        ctx: ComponentContext,
    ) -> Self {
        Self {
            id: config.id.clone(),
            category: config.category(),
            detect_file: config.detect_file.clone(),
            command: config.command.clone(),
            additional_args_env: config.additional_args_env.clone(),
            dependency: dependency.filter(|_| config.enabled),
            ctx,
        }
    }

    fn additional_args(&self) -> Option<String> {
        let var = self.additional_args_env.as_deref()?;
        self.ctx.env.get(var).map(str::to_owned)
    }
}

impl Component for CoprocessComponent {
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

    fn release(&self) -> Result<Option<ReleaseFragment>, CoreError> {
        let words = expand_words(&self.command, &self.id, self.dependency.as_ref());
        Ok(Some(ReleaseFragment::Coprocess(
            CommandFragment::new(words).with_additional(self.additional_args()),
        )))
    }
}
