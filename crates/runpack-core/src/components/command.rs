use super::{expand_words, marker_present, stage_dependency};
use crate::assembler::{CommandFragment, ReleaseFragment};
use crate::component::{Component, ComponentContext, StageContext};
use crate::resolver::ResolvedDependency;
use crate::CoreError;
use runpack_schema::{Category, ComponentConfig, ComponentId};

/// Supplies the main start command when its marker file is present.
pub struct CommandComponent {
    id: ComponentId,
    category: Category,
    enabled: bool,
    detect_file: Option<String>,
    command: Vec<String>,
    additional_args_env: Option<String>,
    dependency: Option<ResolvedDependency>,
    ctx: ComponentContext,
}

impl CommandComponent {
    pub fn new(
        config: &ComponentConfig,
        dependency: Option<ResolvedDependency>,
        ctx: ComponentContext,
    ) -> Self {
        Self {
            id: config.id.clone(),
            category: config.category(),
            enabled: config.enabled,
            detect_file: config.detect_file.clone(),
            command: config.command.clone(),
            additional_args_env: config.additional_args_env.clone(),
            dependency,
            ctx,
        }
    }
}

impl Component for CommandComponent {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn category(&self) -> &Category {
        &self.category
    }

    fn detect(&self) -> Result<Option<String>, CoreError> {
        // Without a marker the component would claim every application.
        if !self.enabled || self.detect_file.is_none() {
            return Ok(None);
        }
        if marker_present(&self.ctx.app_dir, self.detect_file.as_deref()) {
            Ok(Some(self.id.to_string()))
        } else {
            Ok(None)
        }
    }

    fn compile(&self, ctx: &StageContext<'_>) -> Result<(), CoreError> {
        if let Some(dep) = &self.dependency {
            stage_dependency(&self.id, dep, ctx)?;
        }
        Ok(())
    }

    fn release(&self) -> Result<Option<ReleaseFragment>, CoreError> {
        let words = expand_words(&self.command, &self.id, self.dependency.as_ref());
        let additional = self
            .additional_args_env
            .as_deref()
            .and_then(|var| self.ctx.env.get(var))
            .map(str::to_owned);
        Ok(Some(ReleaseFragment::Main(
            CommandFragment::new(words).with_additional(additional),
        )))
    }
}
