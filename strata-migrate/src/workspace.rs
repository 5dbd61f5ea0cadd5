//! Version location aggregation.
//!
//! Scripts come from three places: the project location, per-plugin
//! overrides and the directories plugins ship with. In temporary mode they
//! are merged into one throwaway directory laid out by plugin chain:
//!
//! ```text
//! <workspace>/
//!   1a2b3c4d5e6f_init.toml        project scripts
//!   outer/
//!     9f8e7d6c5b4a_outer.toml     outer plugin
//!     inner/
//!       0a1b2c3d4e5f_inner.toml   inner plugin, loaded by outer
//! ```
//!
//! Editable plugins that nobody claimed are read and written in place.
//! The workspace is deleted when the [`MergedWorkspace`] is dropped.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tempfile::TempDir;
use tracing::{debug, info};

use crate::config::{MigrateConfig, VersionLocations};
use crate::error::{MigrateResult, MigrationError};
use crate::plugin::PluginSet;

/// Plugin name to persistent script directory. `""` is the project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionLocationMap {
    locations: IndexMap<String, PathBuf>,
}

impl VersionLocationMap {
    /// Location for a plugin name, or `""` for the project.
    pub fn get(&self, name: &str) -> Option<&Path> {
        self.locations.get(name).map(PathBuf::as_path)
    }

    /// The project location.
    pub fn main(&self) -> Option<&Path> {
        self.get("")
    }

    /// Whether a location is recorded for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.locations.contains_key(name)
    }

    /// All locations.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.locations
            .iter()
            .map(|(name, path)| (name.as_str(), path.as_path()))
    }

    pub(crate) fn insert(&mut self, name: impl Into<String>, path: PathBuf) {
        self.locations.entry(name.into()).or_insert(path);
    }
}

/// The scripts visible to one session.
#[derive(Debug)]
pub struct MergedWorkspace {
    temp: Option<TempDir>,
    search_path: Vec<PathBuf>,
    locations: VersionLocationMap,
    plugin_dirs: IndexMap<String, PathBuf>,
}

impl MergedWorkspace {
    /// Root of the temporary workspace, if one was built.
    pub fn root(&self) -> Option<&Path> {
        self.temp.as_ref().map(TempDir::path)
    }

    /// Directories to scan for scripts.
    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// Persistent locations.
    pub fn locations(&self) -> &VersionLocationMap {
        &self.locations
    }

    /// Directory new project-level scripts are written to.
    pub fn default_dir(&self) -> Option<PathBuf> {
        self.root()
            .map(Path::to_path_buf)
            .or_else(|| self.locations.main().map(Path::to_path_buf))
    }

    /// Directory new scripts for a plugin are written to.
    pub fn plugin_dir(&self, name: &str) -> Option<PathBuf> {
        self.plugin_dirs.get(name).cloned()
    }

    /// Delete the temporary directory now instead of on drop.
    pub fn close(mut self) -> MigrateResult<()> {
        if let Some(temp) = self.temp.take() {
            temp.close().map_err(MigrationError::Io)?;
        }
        Ok(())
    }
}

/// Builds a [`MergedWorkspace`] from configuration and loaded plugins.
pub struct Aggregator<'a> {
    config: &'a MigrateConfig,
    plugins: &'a PluginSet,
}

impl<'a> Aggregator<'a> {
    /// Create an aggregator.
    pub fn new(config: &'a MigrateConfig, plugins: &'a PluginSet) -> Self {
        Self { config, plugins }
    }

    /// Whether a plugin's scripts are owned by a configured location.
    fn is_claimed(&self, name: &str) -> bool {
        match &self.config.version_locations {
            Some(VersionLocations::Centralized(_)) => true,
            Some(VersionLocations::PerPlugin(map)) => self
                .plugins
                .chain(name)
                .iter()
                .any(|owner| map.contains_key(*owner)),
            None => false,
        }
    }

    /// Record the persistent locations.
    fn location_map(&self) -> VersionLocationMap {
        let mut locations = VersionLocationMap::default();
        if let Some(main) = self.config.main_location() {
            locations.insert("", main);
        }
        for (name, path) in self.config.plugin_overrides() {
            locations.insert(name, path.to_path_buf());
        }
        for plugin in self.plugins.iter() {
            if let Some(dir) = &plugin.migrations {
                if plugin.editable && !self.is_claimed(&plugin.name) {
                    locations.insert(plugin.name.clone(), dir.clone());
                }
            }
        }
        locations
    }

    /// Build the workspace.
    pub async fn build(&self) -> MigrateResult<MergedWorkspace> {
        let locations = self.location_map();
        if self.config.temporary_workspace {
            self.build_temporary(locations).await
        } else {
            self.build_direct(locations).await
        }
    }

    async fn build_temporary(
        &self,
        locations: VersionLocationMap,
    ) -> MigrateResult<MergedWorkspace> {
        let temp = tempfile::Builder::new()
            .prefix("strata-")
            .tempdir()
            .map_err(MigrationError::Io)?;
        let root = temp.path().to_path_buf();
        let mut live = Vec::new();
        let mut plugin_dirs = IndexMap::new();

        for plugin in self.plugins.iter() {
            let rel = self.plugins.workspace_path(&plugin.name);
            let Some(src) = &plugin.migrations else {
                plugin_dirs.insert(plugin.name.clone(), root.join(&rel));
                continue;
            };
            if !src.is_dir() {
                debug!(plugin = %plugin.name, path = %src.display(), "Plugin scripts missing, skipped");
                plugin_dirs.insert(plugin.name.clone(), root.join(&rel));
                continue;
            }
            if plugin.editable && !self.is_claimed(&plugin.name) {
                debug!(plugin = %plugin.name, path = %src.display(), "Using editable plugin scripts in place");
                live.push(src.clone());
                plugin_dirs.insert(plugin.name.clone(), src.clone());
            } else {
                copy_dir(src, &root.join(&rel)).await?;
                plugin_dirs.insert(plugin.name.clone(), root.join(&rel));
            }
        }

        if let Some(main) = locations.main() {
            if main.is_dir() {
                copy_dir(main, &root).await?;
            }
        }
        for (name, path) in self.config.plugin_overrides() {
            if path.is_dir() {
                copy_dir(path, &root.join(self.plugins.workspace_path(name))).await?;
            }
        }

        let mut search_path = vec![root.clone()];
        search_path.extend(subdirectories(&root).await?);
        for dir in live {
            search_path.push(dir.clone());
            search_path.extend(subdirectories(&dir).await?);
        }
        dedup(&mut search_path);

        info!(
            path = %root.display(),
            dirs = search_path.len(),
            "Built temporary migration workspace"
        );

        Ok(MergedWorkspace {
            temp: Some(temp),
            search_path,
            locations,
            plugin_dirs,
        })
    }

    async fn build_direct(&self, locations: VersionLocationMap) -> MigrateResult<MergedWorkspace> {
        let mut roots: Vec<PathBuf> = locations.iter().map(|(_, p)| p.to_path_buf()).collect();
        let mut plugin_dirs = IndexMap::new();

        for plugin in self.plugins.iter() {
            let own = self
                .plugins
                .chain(&plugin.name)
                .iter()
                .rev()
                .find_map(|owner| locations.get(owner).map(|p| (*owner, p.to_path_buf())));
            let dir = match own {
                Some((owner, base)) if owner == plugin.name => Some(base),
                Some((owner, base)) => {
                    let chain = self.plugins.chain(&plugin.name);
                    let skip = chain.iter().position(|n| *n == owner).map_or(0, |i| i + 1);
                    Some(chain[skip..].iter().fold(base, |acc, n| acc.join(n)))
                }
                None => locations
                    .main()
                    .map(|main| main.join(self.plugins.workspace_path(&plugin.name))),
            };
            if let Some(dir) = dir {
                plugin_dirs.insert(plugin.name.clone(), dir);
            }
            if let Some(src) = &plugin.migrations {
                roots.push(src.clone());
            }
        }

        let mut search_path = Vec::new();
        for dir in roots {
            if !dir.is_dir() {
                continue;
            }
            let nested = subdirectories(&dir).await?;
            search_path.push(dir);
            search_path.extend(nested);
        }
        dedup(&mut search_path);

        Ok(MergedWorkspace {
            temp: None,
            search_path,
            locations,
            plugin_dirs,
        })
    }
}

/// Copy a directory tree, overwriting existing files.
pub(crate) async fn copy_dir(src: &Path, dst: &Path) -> MigrateResult<()> {
    let mut stack = vec![(src.to_path_buf(), dst.to_path_buf())];
    while let Some((from, to)) = stack.pop() {
        tokio::fs::create_dir_all(&to).await.map_err(MigrationError::Io)?;
        let mut entries = tokio::fs::read_dir(&from).await.map_err(MigrationError::Io)?;
        while let Some(entry) = entries.next_entry().await.map_err(MigrationError::Io)? {
            let path = entry.path();
            let target = to.join(entry.file_name());
            if entry.file_type().await.map_err(MigrationError::Io)?.is_dir() {
                stack.push((path, target));
            } else {
                tokio::fs::copy(&path, &target)
                    .await
                    .map_err(MigrationError::Io)?;
            }
        }
    }
    Ok(())
}

/// Every directory below `root`, sorted.
async fn subdirectories(root: &Path) -> MigrateResult<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(MigrationError::Io)?;
        while let Some(entry) = entries.next_entry().await.map_err(MigrationError::Io)? {
            if entry.file_type().await.map_err(MigrationError::Io)?.is_dir() {
                let path = entry.path();
                found.push(path.clone());
                stack.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

fn dedup(paths: &mut Vec<PathBuf>) {
    let mut seen = std::collections::HashSet::new();
    paths.retain(|p| seen.insert(p.clone()));
}
