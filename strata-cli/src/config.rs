//! CLI configuration handling.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use strata_migrate::{MigrateConfig, PluginInfo, VersionLocations};
use strata_schema::{ModelFile, Registry};

use crate::error::{CliError, CliResult};

/// Default config file name (lives in project root)
pub const CONFIG_FILE_NAME: &str = "strata.toml";

/// Default script directory (relative to project root)
pub const SCRIPT_LOCATION: &str = "migrations";

/// Environment variable used when no default database URL is configured
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Strata CLI configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Migration configuration
    pub migrations: MigrateConfig,

    /// Model files owned by the project itself
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<PathBuf>,

    /// Loaded plugins
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginConfig>,
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Relative paths are resolved against the directory holding the file.
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        Ok(config)
    }

    /// Load configuration, or use defaults relative to `path`'s directory
    /// when the file does not exist.
    pub fn load_or_default(path: &Path) -> CliResult<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let mut config = Self::default();
        config.resolve_paths(path.parent().unwrap_or_else(|| Path::new(".")));
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> CliResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let join = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        };

        let script_location = self
            .migrations
            .script_location
            .clone()
            .unwrap_or_else(|| PathBuf::from(SCRIPT_LOCATION));
        self.migrations.script_location = Some(join(&script_location));

        self.migrations.version_locations = match self.migrations.version_locations.take() {
            Some(VersionLocations::Centralized(path)) => {
                Some(VersionLocations::Centralized(join(&path)))
            }
            Some(VersionLocations::PerPlugin(map)) => Some(VersionLocations::PerPlugin(
                map.into_iter().map(|(name, path)| (name, join(&path))).collect(),
            )),
            None => None,
        };

        for model in &mut self.models {
            *model = join(model);
        }
        for plugin in &mut self.plugins {
            plugin.migrations = plugin.migrations.as_deref().map(join);
            plugin.models = plugin.models.as_deref().map(join);
        }
    }

    /// The configured script location.
    pub fn script_location(&self) -> PathBuf {
        self.migrations
            .script_location
            .clone()
            .unwrap_or_else(|| PathBuf::from(SCRIPT_LOCATION))
    }

    /// Plugins as the migration layer sees them.
    pub fn plugin_infos(&self) -> Vec<PluginInfo> {
        self.plugins.iter().map(PluginConfig::to_info).collect()
    }

    /// Register every declared table.
    pub fn registry(&self) -> CliResult<Registry> {
        let mut registry = Registry::with_binds(self.database.binds.keys().cloned());
        for path in &self.models {
            registry.load_model_file(None, path)?;
        }
        for plugin in &self.plugins {
            let Some(path) = &plugin.models else {
                continue;
            };
            for mut table in ModelFile::load(path)?.tables {
                if table.bind.is_none() {
                    table.bind = plugin.bind.clone();
                }
                registry.register(Some(&plugin.name), table)?;
            }
        }
        Ok(registry)
    }

    /// Database URL for the default bind.
    pub fn default_url(&self) -> Option<String> {
        self.database
            .url
            .clone()
            .or_else(|| std::env::var(DATABASE_URL_ENV).ok())
    }

    /// Bind name to database URL, the default bind first.
    pub fn bind_urls(&self) -> CliResult<Vec<(String, String)>> {
        let mut urls = Vec::new();
        if let Some(url) = self.default_url() {
            urls.push((String::new(), url));
        }
        for (name, url) in &self.database.binds {
            if name.is_empty() {
                return Err(CliError::Config(
                    "use database.url for the default bind".to_string(),
                ));
            }
            urls.push((name.clone(), url.clone()));
        }
        Ok(urls)
    }
}

/// Database configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database URL of the default bind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Additional binds: name to database URL
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub binds: IndexMap<String, String>,
}

/// A plugin entry in the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Unique plugin name
    pub name: String,

    /// Plugin that loads this one
    #[serde(default)]
    pub parent: Option<String>,

    /// Directory with the plugin's revision scripts
    #[serde(default)]
    pub migrations: Option<PathBuf>,

    /// Model file declaring the plugin's tables
    #[serde(default)]
    pub models: Option<PathBuf>,

    /// Whether the plugin is developed in this project
    #[serde(default)]
    pub editable: bool,

    /// Bind for tables that do not request one
    #[serde(default)]
    pub bind: Option<String>,
}

impl PluginConfig {
    fn to_info(&self) -> PluginInfo {
        let mut info = PluginInfo::new(&self.name).editable(self.editable);
        if let Some(parent) = &self.parent {
            info = info.parent(parent);
        }
        if let Some(dir) = &self.migrations {
            info = info.migrations(dir);
        }
        info
    }
}
