use crate::assembler::assemble;
use crate::component::{ComponentContext, StageContext};
use crate::components::{instantiate, may_participate};
use crate::environment::BuildEnvironment;
use crate::registry::{CategoryRules, CompileOptions, Detection, Registry};
use crate::resolver::{DependencyDescriptor, ResolvedDependency, Resolver};
use crate::{CoreError, Phase};
use runpack_cache::{Cancellation, DownloadCache};
use runpack_remote::{DefaultTransport, IndexSource, RepositoryIndexSource, RetryPolicy, Transport};
use runpack_schema::{ComponentConfig, ReleaseManifest, RunpackConfig, SchemaError, Stack};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Drives one application through detect, compile and release.
///
/// Holds the configuration, the dependency resolver and the download cache;
/// each phase builds a fresh component registry from configuration.
pub struct Engine {
    config: RunpackConfig,
    ctx: ComponentContext,
    resolver: Resolver,
    cache: DownloadCache,
}

/// Result of a full build.
#[derive(Debug)]
pub struct BuildResult {
    pub detection: Detection,
    pub manifest: ReleaseManifest,
}

impl Engine {
    pub fn new(
        config: RunpackConfig,
        ctx: ComponentContext,
        index_source: Arc<dyn IndexSource>,
        cache: DownloadCache,
    ) -> Self {
        Self {
            config,
            ctx,
            resolver: Resolver::new(index_source),
            cache,
        }
    }

    /// Wire the network transport, repository index client and download
    /// cache described by `config`.
    pub fn from_config(
        config: RunpackConfig,
        app_dir: impl Into<PathBuf>,
        env: BuildEnvironment,
        cache_root: impl Into<PathBuf>,
        cancel: Cancellation,
    ) -> Result<Self, CoreError> {
        let settings = &config.cache;
        let transport: Arc<dyn Transport> = Arc::new(DefaultTransport::new(
            settings.timeout_secs.map(Duration::from_secs),
        ));
        let retry = RetryPolicy::new(
            settings.retry_attempts,
            Duration::from_millis(settings.retry_backoff_ms),
        );

        let mut roots: BTreeMap<String, &str> = BTreeMap::new();
        for component in &config.components {
            let Some(dep) = &component.dependency else { continue };
            let name = dependency_name(component);
            if let Some(existing) = roots.get(&name) {
                if *existing != dep.repository_root {
                    return Err(SchemaError::Config(format!(
                        "dependency '{name}' is declared with two repository roots: {existing} and {}",
                        dep.repository_root
                    ))
                    .into());
                }
                continue;
            }
            roots.insert(name, &dep.repository_root);
        }
        let source = roots
            .into_iter()
            .fold(RepositoryIndexSource::new(Arc::clone(&transport), retry), |s, (name, root)| {
                s.with_repository(&name, root)
            });

        let mut cache = DownloadCache::new(cache_root, transport)
            .with_retry(retry)
            .with_cancellation(cancel)
            .with_remote_downloads(settings.remote_downloads);
        for root in &settings.read_only_roots {
            cache = cache.with_read_only_root(root);
        }

        let ctx = ComponentContext::new(app_dir, env);
        Ok(Self::new(config, ctx, Arc::new(source), cache))
    }

    pub fn config(&self) -> &RunpackConfig {
        &self.config
    }

    pub fn cache(&self) -> &DownloadCache {
        &self.cache
    }

    pub fn app_dir(&self) -> &Path {
        &self.ctx.app_dir
    }

    fn stack(&self) -> Stack {
        Stack::from(self.config.stack.as_str())
    }

    fn descriptor(&self, component: &ComponentConfig) -> Option<DependencyDescriptor> {
        component
            .dependency
            .as_ref()
            .map(|dep| DependencyDescriptor {
                name: dependency_name(component),
                constraint: dep.version.clone(),
                stack: self.stack(),
            })
    }

    /// Resolve the dependency of an enabled component. Disabled components
    /// and components without a dependency resolve to `None`.
    pub fn resolve_component(
        &self,
        component: &ComponentConfig,
    ) -> Result<Option<ResolvedDependency>, CoreError> {
        if !component.enabled {
            return Ok(None);
        }
        let Some(descriptor) = self.descriptor(component) else {
            return Ok(None);
        };
        self.resolver
            .resolve(&descriptor)
            .map(Some)
            .map_err(|e| e.in_component(&component.id, Phase::Resolve))
    }

    /// Resolve every enabled component's dependency, in configuration order.
    pub fn resolve_all(&self) -> Result<Vec<(ComponentConfig, ResolvedDependency)>, CoreError> {
        let mut out = Vec::new();
        for component in &self.config.components {
            if let Some(dep) = self.resolve_component(component)? {
                out.push((component.clone(), dep));
            }
        }
        Ok(out)
    }

    /// Instantiate the configured components in registration order.
    ///
    /// Dependencies are resolved only for components whose marker is present,
    /// so a component that cannot apply never needs a reachable index.
    pub fn registry(&self) -> Result<Registry, CoreError> {
        let mut registry = Registry::new(CategoryRules::from(self.config.categories.clone()));
        for component in &self.config.components {
            let dependency = if may_participate(component, &self.ctx.app_dir) {
                self.resolve_component(component)?
            } else {
                debug!("{} cannot apply, skipping resolution", component.id);
                None
            };
            registry.register(instantiate(component, dependency, &self.ctx));
        }
        Ok(registry)
    }

    pub fn detect(&self) -> Result<Detection, CoreError> {
        info!("detecting components for {}", self.ctx.app_dir.display());
        self.registry()?.detect_all()
    }

    pub fn compile(&self) -> Result<Detection, CoreError> {
        let registry = self.registry()?;
        let detection = registry.detect_all()?;
        self.compile_with(&registry, &detection)?;
        Ok(detection)
    }

    pub fn release(&self) -> Result<ReleaseManifest, CoreError> {
        let registry = self.registry()?;
        let detection = registry.detect_all()?;
        Self::release_with(&registry, &detection)
    }

    /// Detect, compile and release in one pass over a single registry.
    pub fn build(&self) -> Result<BuildResult, CoreError> {
        info!("building {}", self.ctx.app_dir.display());
        let registry = self.registry()?;
        let detection = registry.detect_all()?;
        self.compile_with(&registry, &detection)?;
        let manifest = Self::release_with(&registry, &detection)?;
        info!("start command: {}", manifest.start_command());
        Ok(BuildResult {
            detection,
            manifest,
        })
    }

    fn compile_with(&self, registry: &Registry, detection: &Detection) -> Result<(), CoreError> {
        let ctx = StageContext {
            app_dir: &self.ctx.app_dir,
            cache: &self.cache,
        };
        let options = CompileOptions {
            parallel: self.config.compile.parallel,
            max_workers: self.config.compile.max_workers,
        };
        debug!("compile options: {options:?}");
        registry.compile_all(detection, &ctx, options)
    }

    fn release_with(registry: &Registry, detection: &Detection) -> Result<ReleaseManifest, CoreError> {
        let contributions = registry.release_all(detection)?;
        assemble(&contributions)
    }
}

fn dependency_name(component: &ComponentConfig) -> String {
    component
        .dependency
        .as_ref()
        .and_then(|d| d.name.clone())
        .unwrap_or_else(|| component.id.to_string())
}
