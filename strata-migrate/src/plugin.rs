//! Loaded plugins as seen by the migration layer.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A loaded plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Unique plugin name.
    pub name: String,
    /// Name of the plugin that loaded this one.
    #[serde(default)]
    pub parent: Option<String>,
    /// Directory with the plugin's own revision scripts.
    #[serde(default)]
    pub migrations: Option<PathBuf>,
    /// Whether the plugin is developed in this project. Its scripts are
    /// read and written in place instead of being copied.
    #[serde(default)]
    pub editable: bool,
}

impl PluginInfo {
    /// Create a top-level plugin without scripts.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            migrations: None,
            editable: false,
        }
    }

    /// Set the parent plugin.
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Set the scripts directory.
    pub fn migrations(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations = Some(dir.into());
        self
    }

    /// Mark as locally editable.
    pub fn editable(mut self, editable: bool) -> Self {
        self.editable = editable;
        self
    }
}

/// Plugins in load order.
#[derive(Debug, Clone, Default)]
pub struct PluginSet {
    plugins: IndexMap<String, PluginInfo>,
}

impl PluginSet {
    /// Build from a list. Later duplicates replace earlier ones.
    pub fn new(plugins: impl IntoIterator<Item = PluginInfo>) -> Self {
        let mut set = Self::default();
        for plugin in plugins {
            set.plugins.insert(plugin.name.clone(), plugin);
        }
        set
    }

    /// Look up a plugin.
    pub fn get(&self, name: &str) -> Option<&PluginInfo> {
        self.plugins.get(name)
    }

    /// Whether a plugin is loaded.
    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// Plugins in load order.
    pub fn iter(&self) -> impl Iterator<Item = &PluginInfo> {
        self.plugins.values()
    }

    /// Number of plugins.
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether no plugin is loaded.
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Ownership chain of a plugin, outermost first, ending with `name`.
    ///
    /// Unknown parents end the chain.
    pub fn chain<'a>(&'a self, name: &'a str) -> Vec<&'a str> {
        let mut chain = vec![name];
        let mut current = name;
        while let Some(parent) = self
            .plugins
            .get(current)
            .and_then(|p| p.parent.as_deref())
        {
            if chain.contains(&parent) {
                break;
            }
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// Relative directory of a plugin inside the merged workspace.
    pub fn workspace_path(&self, name: &str) -> PathBuf {
        self.chain(name).iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_chain() {
        let set = PluginSet::new([
            PluginInfo::new("outer"),
            PluginInfo::new("inner").parent("outer"),
            PluginInfo::new("innermost").parent("inner"),
        ]);
        assert_eq!(set.chain("innermost"), vec!["outer", "inner", "innermost"]);
        assert_eq!(
            set.workspace_path("inner"),
            PathBuf::from("outer").join("inner")
        );
        assert_eq!(set.chain("unknown"), vec!["unknown"]);
    }

    #[test]
    fn test_parent_cycle_terminates() {
        let set = PluginSet::new([
            PluginInfo::new("a").parent("b"),
            PluginInfo::new("b").parent("a"),
        ]);
        assert_eq!(set.chain("a"), vec!["b", "a"]);
    }
}
