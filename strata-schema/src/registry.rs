//! Explicit table registration.
//!
//! Plugins hand their tables to a [`Registry`] instead of relying on import
//! side effects. The registry decides which bind each table lives on and
//! refuses to put the same table on two binds.

use std::collections::HashMap;
use std::path::Path;

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{SchemaError, SchemaResult};
use crate::metadata::MetaData;
use crate::model_file::ModelFile;
use crate::table::Table;

/// Name of the default bind.
pub const DEFAULT_BIND: &str = "";

/// Bind name to declared tables.
#[derive(Debug, Clone)]
pub struct Registry {
    binds: IndexMap<String, MetaData>,
    table_binds: HashMap<String, String>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create a registry with only the default bind.
    pub fn new() -> Self {
        let mut binds = IndexMap::new();
        binds.insert(DEFAULT_BIND.to_string(), MetaData::new());
        Self {
            binds,
            table_binds: HashMap::new(),
        }
    }

    /// Create a registry with the default bind plus the given binds.
    pub fn with_binds<I, S>(binds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self::new();
        for bind in binds {
            registry.add_bind(bind);
        }
        registry
    }

    /// Declare a bind.
    pub fn add_bind(&mut self, name: impl Into<String>) {
        self.binds.entry(name.into()).or_default();
    }

    /// Whether a bind is declared.
    pub fn has_bind(&self, name: &str) -> bool {
        self.binds.contains_key(name)
    }

    /// The bind a table registered by `owner` with `bind_key` lands on.
    ///
    /// An explicit key wins, then the owner's name; either only counts when
    /// it names a declared bind. Everything else goes to the default bind.
    pub fn resolve_bind<'a>(&'a self, owner: Option<&str>, bind_key: Option<&str>) -> &'a str {
        bind_key
            .or(owner)
            .and_then(|key| self.binds.get_key_value(key))
            .map(|(name, _)| name.as_str())
            .unwrap_or(DEFAULT_BIND)
    }

    /// Register a table on behalf of `owner`. Returns the bind it landed on.
    pub fn register(&mut self, owner: Option<&str>, mut table: Table) -> SchemaResult<String> {
        table.validate()?;

        let bind = self
            .resolve_bind(owner, table.bind.as_deref())
            .to_string();

        if let Some(existing) = self.table_binds.get(&table.name) {
            return Err(SchemaError::DuplicateTable {
                table: table.name.clone(),
                bind,
                existing: existing.clone(),
            });
        }

        if table.owner.is_none() {
            table.owner = owner.map(str::to_string);
        }

        debug!(table = %table.name, bind = %bind, "Registered table");
        self.table_binds.insert(table.name.clone(), bind.clone());
        self.binds.entry(bind.clone()).or_default().add_table(table);
        Ok(bind)
    }

    /// Register every table of a model file.
    pub fn load_model_file(&mut self, owner: Option<&str>, path: &Path) -> SchemaResult<usize> {
        let file = ModelFile::load(path)?;
        let count = file.tables.len();
        for table in file.tables {
            self.register(owner, table)?;
        }
        Ok(count)
    }

    /// Tables declared on a bind.
    pub fn metadata(&self, bind: &str) -> Option<&MetaData> {
        self.binds.get(bind)
    }

    /// The bind a table was registered on.
    pub fn bind_of(&self, table: &str) -> Option<&str> {
        self.table_binds.get(table).map(String::as_str)
    }

    /// Iterate over binds and their tables.
    pub fn binds(&self) -> impl Iterator<Item = (&str, &MetaData)> {
        self.binds.iter().map(|(name, md)| (name.as_str(), md))
    }

    /// Declared bind names.
    pub fn bind_names(&self) -> Vec<&str> {
        self.binds.keys().map(String::as_str).collect()
    }
}
