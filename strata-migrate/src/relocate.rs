//! Moving newly written scripts out of the temporary workspace.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{MigrateResult, MigrationError};
use crate::plugin::PluginSet;
use crate::workspace::VersionLocationMap;

/// Outcome of [`relocate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relocation {
    /// The file is not inside the workspace.
    Unchanged,
    /// The file now lives here.
    Moved(PathBuf),
    /// No persistent location accepts the file; it stays in the workspace
    /// and is lost when the session ends.
    Orphaned,
}

/// Persistent destination for a workspace-relative path.
fn destination(rel: &Path, locations: &VersionLocationMap, plugins: &PluginSet) -> Option<PathBuf> {
    let owner = plugins
        .iter()
        .filter_map(|plugin| {
            let location = locations.get(&plugin.name)?;
            let prefix = plugins.workspace_path(&plugin.name);
            let rest = rel.strip_prefix(&prefix).ok()?;
            Some((prefix.components().count(), location.join(rest)))
        })
        .max_by_key(|(depth, _)| *depth);
    if let Some((_, target)) = owner {
        return Some(target);
    }

    let mut components = rel.components();
    if let Some(first) = components.next() {
        let rest = components.as_path();
        if !rest.as_os_str().is_empty() {
            if let Some(location) = first.as_os_str().to_str().and_then(|n| locations.get(n)) {
                return Some(location.join(rest));
            }
        }
    }

    locations.main().map(|main| main.join(rel))
}

/// Move `path` from the workspace rooted at `workspace_root` to the
/// persistent location that owns it.
///
/// Paths outside the workspace are left alone, so relocating twice is a
/// no-op.
pub async fn relocate(
    path: &Path,
    workspace_root: &Path,
    locations: &VersionLocationMap,
    plugins: &PluginSet,
) -> MigrateResult<Relocation> {
    let Ok(rel) = path.strip_prefix(workspace_root) else {
        return Ok(Relocation::Unchanged);
    };

    let Some(target) = destination(rel, locations, plugins) else {
        debug!(path = %path.display(), "No version location accepts this script");
        return Ok(Relocation::Orphaned);
    };

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(MigrationError::Io)?;
    }
    if tokio::fs::rename(path, &target).await.is_err() {
        tokio::fs::copy(path, &target)
            .await
            .map_err(MigrationError::Io)?;
        tokio::fs::remove_file(path)
            .await
            .map_err(MigrationError::Io)?;
    }
    debug!(from = %path.display(), to = %target.display(), "Relocated script");
    Ok(Relocation::Moved(target))
}
