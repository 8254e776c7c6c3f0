//! Configuration-driven component kinds and the factory that builds them.

pub mod artifact;
pub mod command;
pub mod coprocess;

pub use artifact::ArtifactComponent;
pub use command::CommandComponent;
pub use coprocess::CoprocessComponent;

use crate::component::{Component, ComponentContext, StageContext};
use crate::resolver::ResolvedDependency;
use crate::CoreError;
use runpack_schema::{ComponentConfig, ComponentId, ComponentKind};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory under the application root where dependencies are staged.
pub const STAGING_DIR: &str = ".runpack";

/// Build the component for one configuration entry.
///
/// `dependency` is the already-resolved artifact, `None` when the component
/// is disabled or declares no dependency.
pub fn instantiate(
    config: &ComponentConfig,
    dependency: Option<ResolvedDependency>,
    ctx: &ComponentContext,
) -> Box<dyn Component> {
    match config.kind {
        ComponentKind::Artifact => Box::new(ArtifactComponent::new(config, dependency, ctx.clone())),
        ComponentKind::Command => Box::new(CommandComponent::new(config, dependency, ctx.clone())),
        ComponentKind::Coprocess => {
            Box::new(CoprocessComponent::new(config, dependency, ctx.clone()))
        }
    }
}

/// Whether a configured component can take part in a build of `app_dir`,
/// judged from configuration and marker files alone. Dependencies are only
/// resolved for components that pass this check.
pub fn may_participate(config: &ComponentConfig, app_dir: &Path) -> bool {
    if !config.enabled {
        return false;
    }
    if config.kind == ComponentKind::Command && config.detect_file.is_none() {
        return false;
    }
    marker_present(app_dir, config.detect_file.as_deref())
}

/// Relative staging directory of a component, as seen from the app root.
pub fn staging_path(id: &ComponentId) -> PathBuf {
    Path::new(STAGING_DIR).join(id.as_str())
}

/// Fetch `dependency` through the cache and place it under
/// `<app>/.runpack/<id>/`. Tarballs are unpacked; other artifacts are copied
/// under their file name. Any previous staging of the component is replaced.
pub(crate) fn stage_dependency(
    id: &ComponentId,
    dependency: &ResolvedDependency,
    ctx: &StageContext<'_>,
) -> Result<PathBuf, CoreError> {
    let cached = ctx.cache.fetch(&dependency.uri, &dependency.checksum)?;
    let target = ctx.app_dir.join(staging_path(id));
    if target.exists() {
        fs::remove_dir_all(&target)?;
    }
    fs::create_dir_all(&target)?;

    if is_tarball(&dependency.uri) {
        debug!("unpacking {} into {}", dependency.uri, target.display());
        let mut ar = tar::Archive::new(BufReader::new(File::open(&cached)?));
        ar.set_preserve_permissions(true);
        ar.set_preserve_mtime(false);
        ar.set_unpack_xattrs(false);
        ar.unpack(&target)?;
    } else {
        let dest = target.join(artifact_file_name(&dependency.uri));
        debug!("copying {} to {}", dependency.uri, dest.display());
        fs::copy(&cached, &dest)?;
    }
    Ok(target)
}

fn is_tarball(uri: &str) -> bool {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    path.ends_with(".tar")
}

fn artifact_file_name(uri: &str) -> &str {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() => name,
        _ => "artifact",
    }
}

/// Expand `{staged_dir}` and `{version}` placeholders in launch words.
pub(crate) fn expand_words(
    words: &[String],
    id: &ComponentId,
    dependency: Option<&ResolvedDependency>,
) -> Vec<String> {
    let staged = format!("$PWD/{}", staging_path(id).display());
    let version = dependency.map_or("", |d| d.version.as_str());
    words
        .iter()
        .map(|w| w.replace("{staged_dir}", &staged).replace("{version}", version))
        .collect()
}

/// Detection marker check shared by the component kinds.
pub(crate) fn marker_present(app_dir: &Path, marker: Option<&str>) -> bool {
    marker.is_none_or(|m| app_dir.join(m).exists())
}
