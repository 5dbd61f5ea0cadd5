//! Migration engine configuration.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{MigrateResult, MigrationError};

/// Default name of the version table.
pub const DEFAULT_VERSION_TABLE: &str = "strata_version";

/// Name of the environment file inside a script location.
pub const ENV_FILE_NAME: &str = "env.toml";

/// Where persistent revision scripts live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VersionLocations {
    /// One directory. Project scripts at its root, plugin scripts in
    /// `<dir>/<plugin chain>`.
    Centralized(PathBuf),
    /// Plugin name to directory. The `""` key is the project location.
    PerPlugin(IndexMap<String, PathBuf>),
}

/// Autogenerate and rendering options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextOptions {
    /// Detect column type changes.
    pub compare_type: bool,
    /// Detect server default changes.
    pub compare_server_default: bool,
    /// Rebuild tables for ALTERs the database can't do in place.
    pub render_as_batch: bool,
    /// Prepare every bind before committing any.
    pub two_phase: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            compare_type: true,
            compare_server_default: false,
            render_as_batch: true,
            two_phase: false,
        }
    }
}

/// Configuration for a migration session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrateConfig {
    /// Directory holding `env.toml` and, by default, `versions/`.
    pub script_location: Option<PathBuf>,
    /// Persistent script locations.
    pub version_locations: Option<VersionLocations>,
    /// Name of the version table.
    pub version_table: String,
    /// Merge scripts into a temporary workspace. When off, scripts are read
    /// in place.
    pub temporary_workspace: bool,
    /// Create the declared schema directly on an empty database.
    pub fast_upgrade: bool,
    /// Run the startup check when the application boots.
    pub startup_check: bool,
    /// Autogenerate and rendering options.
    pub context: ContextOptions,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            script_location: None,
            version_locations: None,
            version_table: DEFAULT_VERSION_TABLE.to_string(),
            temporary_workspace: true,
            fast_upgrade: false,
            startup_check: true,
            context: ContextOptions::default(),
        }
    }
}

impl MigrateConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the script location.
    pub fn script_location(mut self, dir: impl Into<PathBuf>) -> Self {
        self.script_location = Some(dir.into());
        self
    }

    /// Set the version locations.
    pub fn version_locations(mut self, locations: VersionLocations) -> Self {
        self.version_locations = Some(locations);
        self
    }

    /// Set the version table name.
    pub fn version_table(mut self, name: impl Into<String>) -> Self {
        self.version_table = name.into();
        self
    }

    /// Choose between a temporary merged workspace and in-place reading.
    pub fn temporary_workspace(mut self, enabled: bool) -> Self {
        self.temporary_workspace = enabled;
        self
    }

    /// Allow the empty-database fast path.
    pub fn fast_upgrade(mut self, enabled: bool) -> Self {
        self.fast_upgrade = enabled;
        self
    }

    /// Set context options.
    pub fn context(mut self, context: ContextOptions) -> Self {
        self.context = context;
        self
    }

    /// The project-level script location.
    pub fn main_location(&self) -> Option<PathBuf> {
        match &self.version_locations {
            Some(VersionLocations::Centralized(path)) => Some(path.clone()),
            Some(VersionLocations::PerPlugin(map)) => map
                .get("")
                .cloned()
                .or_else(|| self.script_location.as_ref().map(|s| s.join("versions"))),
            None => self.script_location.as_ref().map(|s| s.join("versions")),
        }
    }

    /// Per-plugin overrides, excluding the project location.
    pub fn plugin_overrides(&self) -> Vec<(&str, &Path)> {
        match &self.version_locations {
            Some(VersionLocations::PerPlugin(map)) => map
                .iter()
                .filter(|(name, _)| !name.is_empty())
                .map(|(name, path)| (name.as_str(), path.as_path()))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> MigrateResult<()> {
        if self.version_table.trim().is_empty() {
            return Err(MigrationError::config("version_table must not be empty"));
        }
        Ok(())
    }
}

/// Which binds a migration environment touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvMode {
    /// Only the default bind.
    Single,
    /// Every bind.
    #[default]
    Multidb,
}

/// Contents of `env.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvSettings {
    /// Which binds are migrated.
    pub mode: EnvMode,
    /// Overrides [`ContextOptions::two_phase`].
    pub two_phase: Option<bool>,
}

impl EnvSettings {
    /// Read `env.toml` from a script location. A missing file means defaults.
    pub async fn load(script_location: Option<&Path>) -> MigrateResult<Self> {
        let Some(dir) = script_location else {
            return Ok(Self::default());
        };
        let path = dir.join(ENV_FILE_NAME);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(MigrationError::Io)?;
        toml::from_str(&content)
            .map_err(|e| MigrationError::config(format!("{}: {}", path.display(), e)))
    }
}
